//! Newline-delimited text ingest: one value per line, blank lines and `#` comments skipped.

use anyhow::{bail, Context, Result};
use log::debug;
use std::path::Path;
use std::str::FromStr;

fn parse_lines<T: FromStr>(text: &str, what: &str) -> Result<Vec<T>>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let mut out = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let value = trimmed
            .parse::<T>()
            .with_context(|| format!("line {} is not a valid {}: {}", idx + 1, what, trimmed))?;
        out.push(value);
    }
    if out.is_empty() {
        bail!("no {} values found", what);
    }
    Ok(out)
}

fn read_text(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

/// ECG samples.
pub fn parse_samples(text: &str) -> Result<Vec<f64>> {
    parse_lines(text, "sample")
}

pub fn read_samples(path: &Path) -> Result<Vec<f64>> {
    parse_samples(&read_text(path)?)
}

/// RR intervals in seconds. Files whose median exceeds 10 are taken to be in milliseconds.
pub fn parse_rr_intervals(text: &str) -> Result<Vec<f64>> {
    let mut rr: Vec<f64> = parse_lines(text, "RR interval")?;
    if let Some((line, bad)) = rr.iter().enumerate().find(|(_, v)| !(v.is_finite() && **v > 0.0)) {
        bail!("RR interval #{} is not positive: {}", line + 1, bad);
    }
    if crate::stats::median(&rr).map_or(false, |m| m > 10.0) {
        debug!("RR intervals look like milliseconds, converting");
        rr.iter_mut().for_each(|v| *v /= 1000.0);
    }
    Ok(rr)
}

pub fn read_rr_intervals(path: &Path) -> Result<Vec<f64>> {
    parse_rr_intervals(&read_text(path)?)
}

/// Beat sample indices, as exported by an earlier editing pass.
pub fn parse_beat_indices(text: &str) -> Result<Vec<usize>> {
    parse_lines(text, "beat index")
}

pub fn read_beat_indices(path: &Path) -> Result<Vec<usize>> {
    parse_beat_indices(&read_text(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comments_and_blanks_are_skipped() {
        let samples = parse_samples("# lead II\n0.5\n\n-1.25\n").unwrap();
        assert_eq!(samples, vec![0.5, -1.25]);
    }

    #[test]
    fn bad_lines_name_their_position() {
        let err = parse_beat_indices("10\n20\nabc\n").unwrap_err();
        assert!(err.to_string().contains("line 3"));
        assert!(parse_samples("# nothing\n").is_err());
    }

    #[test]
    fn rr_in_milliseconds_is_rescaled() {
        assert_eq!(parse_rr_intervals("800\n1000\n900\n").unwrap(), vec![0.8, 1.0, 0.9]);
        assert_eq!(parse_rr_intervals("0.8\n1.0\n").unwrap(), vec![0.8, 1.0]);
        assert!(parse_rr_intervals("0.8\n-1.0\n").is_err());
    }

    #[test]
    fn files_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("beats.txt");
        std::fs::write(&path, "100\n350\n600\n").unwrap();
        assert_eq!(read_beat_indices(&path).unwrap(), vec![100, 350, 600]);
        assert!(read_samples(&dir.path().join("missing.txt")).is_err());
    }
}
