use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use env_logger::Env;
use log::{info, warn};
use rand::{rngs::StdRng, Rng, SeedableRng};
use rrtrack_lib::{
    config::EngineConfig,
    detectors::{detect, Detection},
    io::text as text_io,
    noise::{NoiseInterval, NoiseSet},
    outliers::{
        apply_algorithm_corrections, apply_cluster_noise, apply_threshold_outliers,
        record_times, run_algorithm_outliers, run_threshold_outliers, OutlierRecord,
        RevertEntry, ThresholdLevel,
    },
    session::Session,
    signal::{bandpass, synthetic_ecg, TimeSeries},
};
use serde::Serialize;
use std::{
    io::{self, BufWriter, Read, Write},
    path::{Path, PathBuf},
};

#[derive(Parser)]
#[command(
    name = "rrtrack",
    version,
    about = "rrtrack: ECG beat detection and RR-interval editing tools"
)]
struct Cli {
    /// Logging verbosity (e.g., debug, info, warn)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Method {
    Threshold,
    Algorithm,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Level {
    VeryLow,
    Low,
    Medium,
    High,
    VeryHigh,
}

impl From<Level> for ThresholdLevel {
    fn from(level: Level) -> Self {
        match level {
            Level::VeryLow => ThresholdLevel::VeryLow,
            Level::Low => ThresholdLevel::Low,
            Level::Medium => ThresholdLevel::Medium,
            Level::High => ThresholdLevel::High,
            Level::VeryHigh => ThresholdLevel::VeryHigh,
        }
    }
}

/// Where the beats of a session come from.
#[derive(clap::Args)]
struct Source {
    /// Sampling frequency of the ECG, or the beat grid for RR input (Hz)
    #[arg(long, default_value_t = 250.0)]
    fs: f64,
    /// Newline-delimited ECG samples (stdin when neither input is given)
    #[arg(long, conflicts_with = "rr_input")]
    input: Option<PathBuf>,
    /// Newline-delimited RR intervals (seconds or milliseconds)
    #[arg(long)]
    rr_input: Option<PathBuf>,
    /// Newline-delimited beat sample indices used instead of detection
    #[arg(long, conflicts_with = "rr_input")]
    beats: Option<PathBuf>,
    /// Skip the 5-15 Hz prefilter (input is already filtered)
    #[arg(long)]
    no_prefilter: bool,
    /// TOML file overriding engine parameters
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a synthetic ECG (one sample per line) to stdout
    Simulate {
        #[arg(long, default_value_t = 250.0)]
        fs: f64,
        #[arg(long, default_value_t = 60.0)]
        duration_s: f64,
        #[arg(long, default_value_t = 60.0)]
        bpm: f64,
        /// Uniform RR jitter amplitude (seconds)
        #[arg(long, default_value_t = 0.0)]
        jitter_s: f64,
        #[arg(long, default_value_t = 0)]
        seed: u64,
        /// Leave out the beat with this ordinal
        #[arg(long)]
        drop_beat: Option<usize>,
    },
    /// Detect beats and signal noise; prints JSON
    Detect {
        #[command(flatten)]
        source: Source,
    },
    /// Flag outlier beats, optionally correcting them; prints JSON
    Outliers {
        #[command(flatten)]
        source: Source,
        #[arg(long, value_enum, default_value = "algorithm")]
        method: Method,
        /// Threshold preset (threshold method only)
        #[arg(long, value_enum)]
        level: Option<Level>,
        /// Apply the corrections to the beat list
        #[arg(long)]
        apply: bool,
        /// Cluster outliers into noise intervals
        #[arg(long)]
        cluster: bool,
    },
    /// Export the per-beat RR track as CSV
    Track {
        #[command(flatten)]
        source: Source,
        #[arg(long)]
        out: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(Env::default().default_filter_or(&cli.log_level)).init();
    match cli.command {
        Commands::Simulate {
            fs,
            duration_s,
            bpm,
            jitter_s,
            seed,
            drop_beat,
        } => cmd_simulate(fs, duration_s, bpm, jitter_s, seed, drop_beat)?,
        Commands::Detect { source } => cmd_detect(&source)?,
        Commands::Outliers {
            source,
            method,
            level,
            apply,
            cluster,
        } => cmd_outliers(&source, method, level, apply, cluster)?,
        Commands::Track { source, out } => cmd_track(&source, &out)?,
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    toml::from_str(&contents).with_context(|| format!("parsing config {}", path.display()))
}

fn read_samples(input: Option<&Path>) -> Result<Vec<f64>> {
    match input {
        Some(path) => text_io::read_samples(path),
        None => {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf)?;
            text_io::parse_samples(&buf)
        }
    }
}

fn detect_signal(source: &Source, cfg: &EngineConfig) -> Result<(TimeSeries, Detection)> {
    check_fs(source.fs)?;
    let raw = TimeSeries::new(source.fs, read_samples(source.input.as_deref())?);
    let signal = if source.no_prefilter {
        raw
    } else {
        bandpass(&raw, cfg.qrs.prefilter_low_hz, cfg.qrs.prefilter_high_hz)
    };
    let detection = detect(&signal, &cfg.qrs, &cfg.signal_noise);
    info!(
        "detected {} beats and {} noise interval(s) in {:.1} s",
        detection.beats.len(),
        detection.noise.len(),
        signal.duration()
    );
    Ok((signal, detection))
}

fn check_fs(fs: f64) -> Result<()> {
    if !fs.is_finite() || fs <= 0.0 {
        bail!("sampling frequency must be positive, got {}", fs);
    }
    Ok(())
}

fn load_session(source: &Source, cfg: &EngineConfig) -> Result<Session> {
    check_fs(source.fs)?;
    if let Some(path) = source.rr_input.as_deref() {
        let rr = text_io::read_rr_intervals(path)?;
        return Ok(Session::from_rr_intervals(&rr, source.fs, cfg.track));
    }
    if let Some(path) = source.beats.as_deref() {
        let samples = read_samples(source.input.as_deref())?;
        let beats = text_io::read_beat_indices(path)?;
        let dropped = beats.iter().filter(|&&b| b >= samples.len()).count();
        if dropped > 0 {
            warn!("dropped {} beat(s) past the end of the recording", dropped);
        }
        return Ok(Session::with_beats(
            samples.len(),
            source.fs,
            beats,
            NoiseSet::new(),
            cfg.track,
        ));
    }
    let (signal, detection) = detect_signal(source, cfg)?;
    Ok(Session::from_detection(&signal, &detection, cfg.track))
}

fn cmd_simulate(
    fs: f64,
    duration_s: f64,
    bpm: f64,
    jitter_s: f64,
    seed: u64,
    drop_beat: Option<usize>,
) -> Result<()> {
    check_fs(fs)?;
    if bpm <= 0.0 || duration_s <= 0.0 {
        bail!("bpm and duration must be positive");
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let period = 60.0 / bpm;
    let jitter = jitter_s.abs().min(period * 0.5);
    let mut beat_times = Vec::new();
    let mut t = 0.5;
    let mut ordinal = 0usize;
    while t < duration_s - 0.25 {
        if drop_beat != Some(ordinal) {
            beat_times.push(t);
        }
        ordinal += 1;
        let offset = if jitter > 0.0 {
            rng.gen_range(-jitter..=jitter)
        } else {
            0.0
        };
        t += period + offset;
    }
    let ts = synthetic_ecg(fs, duration_s, &beat_times);
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    for sample in &ts.data {
        writeln!(out, "{:.6}", sample)?;
    }
    out.flush()?;
    Ok(())
}

fn cmd_detect(source: &Source) -> Result<()> {
    if source.rr_input.is_some() || source.beats.is_some() {
        bail!("detect needs ECG samples only");
    }
    let cfg = load_config(source.config.as_deref())?;
    let (_, detection) = detect_signal(source, &cfg)?;
    println!("{}", serde_json::to_string(&detection)?);
    Ok(())
}

#[derive(Serialize)]
struct OutlierReport<'a> {
    method: &'static str,
    fs: f64,
    outliers: &'a [OutlierRecord],
    corrections: &'a [RevertEntry],
    beats: &'a [usize],
    noise: &'a [NoiseInterval],
}

fn cmd_outliers(
    source: &Source,
    method: Method,
    level: Option<Level>,
    apply: bool,
    cluster: bool,
) -> Result<()> {
    let cfg = load_config(source.config.as_deref())?;
    let mut session = load_session(source, &cfg)?;
    let threshold = level.map_or(cfg.threshold, |l| ThresholdLevel::from(l).config());

    let (name, outliers) = match method {
        Method::Threshold => (
            "threshold",
            run_threshold_outliers(&session, threshold.window, threshold.tau_s),
        ),
        Method::Algorithm => ("algorithm", run_algorithm_outliers(&session, &cfg.algorithm)),
    };
    let corrections = match (apply, method) {
        (false, _) => Default::default(),
        (true, Method::Threshold) => apply_threshold_outliers(&mut session, &outliers),
        (true, Method::Algorithm) => apply_algorithm_corrections(&mut session, &outliers),
    };
    if cluster {
        let (intervals, _) =
            apply_cluster_noise(&mut session, &record_times(&outliers), &cfg.cluster);
        info!("{} detected noise interval(s)", intervals.len());
    }

    let report = OutlierReport {
        method: name,
        fs: session.fs(),
        outliers: &outliers,
        corrections: corrections.entries(),
        beats: session.beats(),
        noise: session.noise().as_slice(),
    };
    println!("{}", serde_json::to_string(&report)?);
    Ok(())
}

#[derive(Serialize)]
struct TrackRow {
    time_s: f64,
    rr_s: f64,
    interpolated: bool,
    in_noise: bool,
}

fn cmd_track(source: &Source, out: &Path) -> Result<()> {
    let cfg = load_config(source.config.as_deref())?;
    let session = load_session(source, &cfg)?;
    let mut writer =
        csv::Writer::from_path(out).with_context(|| format!("creating {}", out.display()))?;
    let intervals = session.intervals();
    for (&beat, &rr_s) in session.beats().iter().zip(&intervals) {
        let time_s = session.time_of(beat);
        writer.serialize(TrackRow {
            time_s,
            rr_s,
            interpolated: session.track().is_interpolated(beat),
            in_noise: session.noise().contains(time_s),
        })?;
    }
    writer.flush()?;
    println!(
        "{}",
        serde_json::json!({
            "beats": session.beats().len(),
            "noise": session.noise().len(),
            "out": out.display().to_string(),
        })
    );
    Ok(())
}
