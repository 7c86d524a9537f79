use assert_cmd::cargo::cargo_bin_cmd;
use serde::Deserialize;
use std::{error::Error, fs, path::Path};

#[derive(Deserialize)]
struct Beat {
    index: usize,
}

#[derive(Deserialize)]
struct DetectOutput {
    fs: f64,
    sample_count: usize,
    beats: Vec<Beat>,
    noise: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
struct Outlier {
    kind: String,
    time: f64,
}

#[derive(Deserialize)]
struct OutlierOutput {
    method: String,
    outliers: Vec<Outlier>,
    corrections: Vec<serde_json::Value>,
    beats: Vec<usize>,
    noise: Vec<serde_json::Value>,
}

fn sine_rr(count: usize) -> Vec<f64> {
    (0..count)
        .map(|i| 1.0 + 0.02 * (0.9 * i as f64).sin())
        .collect()
}

fn write_rr(path: &Path, rr: &[f64]) -> Result<(), Box<dyn Error>> {
    let text: String = rr.iter().map(|v| format!("{v}\n")).collect();
    fs::write(path, text)?;
    Ok(())
}

fn simulate(extra: &[&str]) -> Result<Vec<u8>, Box<dyn Error>> {
    let mut cmd = cargo_bin_cmd!("rrtrack");
    cmd.args(["simulate", "--fs", "250", "--duration-s", "60", "--bpm", "60"]);
    cmd.args(extra);
    Ok(cmd.assert().success().get_output().stdout.clone())
}

#[test]
fn simulated_ecg_detects_one_beat_per_second() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let ecg = dir.path().join("ecg.txt");
    fs::write(&ecg, simulate(&[])?)?;

    let mut cmd = cargo_bin_cmd!("rrtrack");
    cmd.args(["detect", "--fs", "250", "--input", ecg.to_str().expect("utf8 path")]);
    let output = cmd.assert().success().get_output().stdout.clone();
    let detection: DetectOutput = serde_json::from_slice(&output)?;

    assert_eq!(detection.fs, 250.0);
    assert_eq!(detection.sample_count, 15_000);
    assert!((59..=61).contains(&detection.beats.len()));
    assert!(detection.noise.is_empty());
    assert!(detection.beats.windows(2).all(|w| w[0].index < w[1].index));
    Ok(())
}

#[test]
fn detect_reads_stdin_when_no_input_given() -> Result<(), Box<dyn Error>> {
    let samples = simulate(&["--jitter-s", "0.05", "--seed", "7"])?;
    let mut cmd = cargo_bin_cmd!("rrtrack");
    cmd.args(["detect", "--fs", "250"]).write_stdin(samples);
    let output = cmd.assert().success().get_output().stdout.clone();
    let detection: DetectOutput = serde_json::from_slice(&output)?;
    assert!((57..=62).contains(&detection.beats.len()));
    Ok(())
}

#[test]
fn algorithm_finds_and_fills_a_missed_beat() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let rr_path = dir.path().join("rr.txt");
    let mut rr = sine_rr(60);
    let merged = rr[30] + rr[31];
    rr.splice(30..32, [merged]);
    write_rr(&rr_path, &rr)?;

    let mut cmd = cargo_bin_cmd!("rrtrack");
    cmd.args([
        "outliers",
        "--fs",
        "1000",
        "--rr-input",
        rr_path.to_str().expect("utf8 path"),
        "--method",
        "algorithm",
        "--apply",
    ]);
    let output = cmd.assert().success().get_output().stdout.clone();
    let report: OutlierOutput = serde_json::from_slice(&output)?;

    assert_eq!(report.method, "algorithm");
    assert_eq!(report.outliers.len(), 1);
    assert_eq!(report.outliers[0].kind, "missed");
    assert_eq!(report.corrections.len(), 1);
    assert_eq!(report.corrections[0]["edit"], "inserted");
    // 59 intervals plus the seed beat, plus the inserted one
    assert_eq!(report.beats.len(), rr.len() + 2);
    assert!(report.noise.is_empty());
    Ok(())
}

#[test]
fn threshold_flags_spike_without_applying() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let rr_path = dir.path().join("rr_ms.txt");
    let mut rr = vec![800.0; 30];
    rr[15] = 1300.0;
    write_rr(&rr_path, &rr)?;

    let mut cmd = cargo_bin_cmd!("rrtrack");
    cmd.args([
        "outliers",
        "--fs",
        "1000",
        "--rr-input",
        rr_path.to_str().expect("utf8 path"),
        "--method",
        "threshold",
        "--level",
        "low",
    ]);
    let output = cmd.assert().success().get_output().stdout.clone();
    let report: OutlierOutput = serde_json::from_slice(&output)?;

    assert_eq!(report.method, "threshold");
    assert_eq!(report.outliers.len(), 1);
    assert_eq!(report.outliers[0].kind, "threshold");
    // millisecond input is converted: the spike ends 16 beats in
    assert!((report.outliers[0].time - (15.0 * 0.8 + 1.3)).abs() < 1e-9);
    assert!(report.corrections.is_empty());
    assert_eq!(report.beats.len(), 31);
    Ok(())
}

#[test]
fn track_writes_one_row_per_beat() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let rr_path = dir.path().join("rr.txt");
    let out = dir.path().join("track.csv");
    write_rr(&rr_path, &sine_rr(40))?;

    let mut cmd = cargo_bin_cmd!("rrtrack");
    cmd.args([
        "track",
        "--fs",
        "1000",
        "--rr-input",
        rr_path.to_str().expect("utf8 path"),
        "--out",
        out.to_str().expect("utf8 path"),
    ]);
    cmd.assert().success();

    let mut reader = csv::Reader::from_path(&out)?;
    let headers = reader.headers()?.clone();
    assert_eq!(
        headers.iter().collect::<Vec<_>>(),
        vec!["time_s", "rr_s", "interpolated", "in_noise"]
    );
    let rows: Vec<csv::StringRecord> = reader.records().collect::<Result<_, _>>()?;
    assert_eq!(rows.len(), 41);
    assert_eq!(rows[0][0].parse::<f64>()?, 0.0);
    assert!(rows.iter().all(|r| &r[2] == "false" && &r[3] == "false"));
    Ok(())
}

#[test]
fn malformed_config_is_reported() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let cfg = dir.path().join("bad.toml");
    let rr_path = dir.path().join("rr.txt");
    fs::write(&cfg, "[threshold]\nwindow = \"ten\"\n")?;
    write_rr(&rr_path, &sine_rr(20))?;

    let mut cmd = cargo_bin_cmd!("rrtrack");
    cmd.args([
        "outliers",
        "--rr-input",
        rr_path.to_str().expect("utf8 path"),
        "--config",
        cfg.to_str().expect("utf8 path"),
    ]);
    cmd.assert().failure();
    Ok(())
}

#[test]
fn track_accepts_a_beat_list_for_a_recording() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let samples = dir.path().join("ecg.txt");
    let beats = dir.path().join("beats.txt");
    let out = dir.path().join("track.csv");
    fs::write(&samples, "0\n".repeat(1000))?;
    // the last index lies past the recording and is dropped
    fs::write(&beats, "100\n300\n500\n700\n2000\n")?;

    let mut cmd = cargo_bin_cmd!("rrtrack");
    cmd.args([
        "track",
        "--fs",
        "250",
        "--input",
        samples.to_str().expect("utf8 path"),
        "--beats",
        beats.to_str().expect("utf8 path"),
        "--out",
        out.to_str().expect("utf8 path"),
    ]);
    let output = cmd.assert().success().get_output().stdout.clone();
    let summary: serde_json::Value = serde_json::from_slice(&output)?;
    assert_eq!(summary["beats"], 4);

    let mut reader = csv::Reader::from_path(&out)?;
    let rr: Vec<f64> = reader
        .records()
        .map(|r| Ok(r?[1].parse::<f64>()?))
        .collect::<Result<_, Box<dyn Error>>>()?;
    assert_eq!(rr, vec![0.8, 0.8, 0.8, 0.8]);
    Ok(())
}
