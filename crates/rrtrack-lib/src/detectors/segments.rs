use crate::{signal::seconds_to_samples, stats::median};
use log::debug;
use serde::{Deserialize, Serialize};

/// Flatline / saturation detection on the filtered signal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalNoiseConfig {
    /// Samples below this fraction of median |signal| count as flatline.
    pub low_amplitude_fraction: f64,
    /// Shortest flatline kept (seconds).
    pub min_low_run_s: f64,
    /// Saturation threshold as a multiple of the median candidate amplitude.
    pub high_amplitude_multiplier: f64,
    /// Saturated runs closer than this are joined (seconds).
    pub high_merge_s: f64,
    /// Runs of either class closer than this become one interval (seconds).
    pub combine_distance_s: f64,
    /// Padding added on both sides of every interval (seconds).
    pub edge_margin_s: f64,
}

impl Default for SignalNoiseConfig {
    fn default() -> Self {
        Self {
            low_amplitude_fraction: 0.1,
            min_low_run_s: 1.0,
            high_amplitude_multiplier: 10.0,
            high_merge_s: 0.5,
            combine_distance_s: 2.0,
            edge_margin_s: 0.1,
        }
    }
}

/// Maximal inclusive runs of samples satisfying `pred`.
fn runs_where(data: &[f64], pred: impl Fn(f64) -> bool) -> Vec<(usize, usize)> {
    let mut runs = Vec::new();
    let mut start = None;
    for (i, &x) in data.iter().enumerate() {
        match (pred(x), start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                runs.push((s, i - 1));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        runs.push((s, data.len() - 1));
    }
    runs
}

/// Join sorted runs separated by at most `gap` samples.
fn merge_runs(mut runs: Vec<(usize, usize)>, gap: usize) -> Vec<(usize, usize)> {
    runs.sort_unstable();
    let mut merged: Vec<(usize, usize)> = Vec::with_capacity(runs.len());
    for (start, end) in runs {
        match merged.last_mut() {
            Some(last) if start <= last.1 + gap => last.1 = last.1.max(end),
            _ => merged.push((start, end)),
        }
    }
    merged
}

pub fn low_amplitude_runs(data: &[f64], fs: f64, cfg: &SignalNoiseConfig) -> Vec<(usize, usize)> {
    let magnitudes: Vec<f64> = data.iter().map(|x| x.abs()).collect();
    let threshold = match median(&magnitudes) {
        Some(m) if m > 0.0 => cfg.low_amplitude_fraction * m,
        _ => return Vec::new(),
    };
    let min_len = seconds_to_samples(cfg.min_low_run_s, fs);
    runs_where(&magnitudes, |m| m < threshold)
        .into_iter()
        .filter(|(s, e)| e - s + 1 >= min_len)
        .collect()
}

/// Runs above `multiplier * median(|signal at candidates|)`.
pub fn high_amplitude_runs(
    data: &[f64],
    candidates: &[usize],
    fs: f64,
    cfg: &SignalNoiseConfig,
) -> Vec<(usize, usize)> {
    let amplitudes: Vec<f64> = candidates
        .iter()
        .filter_map(|&c| data.get(c))
        .map(|x| x.abs())
        .collect();
    let threshold = match median(&amplitudes) {
        Some(m) if m > 0.0 => cfg.high_amplitude_multiplier * m,
        _ => return Vec::new(),
    };
    merge_runs(
        runs_where(data, |x| x.abs() > threshold),
        seconds_to_samples(cfg.high_merge_s, fs),
    )
}

/// Both classes combined, padded and clamped to the record. Inclusive sample ranges.
pub fn noise_segments(
    data: &[f64],
    candidates: &[usize],
    fs: f64,
    cfg: &SignalNoiseConfig,
) -> Vec<(usize, usize)> {
    if data.is_empty() {
        return Vec::new();
    }
    let low = low_amplitude_runs(data, fs, cfg);
    let high = high_amplitude_runs(data, candidates, fs, cfg);
    debug!(
        "signal noise: {} flatline run(s), {} saturated run(s)",
        low.len(),
        high.len()
    );
    let mut runs = low;
    runs.extend(high);
    let combined = merge_runs(runs, seconds_to_samples(cfg.combine_distance_s, fs));
    let margin = (cfg.edge_margin_s * fs).round().max(0.0) as usize;
    let last = data.len() - 1;
    let padded = combined
        .into_iter()
        .map(|(s, e)| (s.saturating_sub(margin), (e + margin).min(last)))
        .collect();
    merge_runs(padded, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_dropouts_are_ignored() {
        let mut data = vec![1.0; 1000];
        data[100..150].iter_mut().for_each(|v| *v = 0.0);
        data[400..700].iter_mut().for_each(|v| *v = 0.0);
        let runs = low_amplitude_runs(&data, 100.0, &SignalNoiseConfig::default());
        assert_eq!(runs, vec![(400, 699)]);
    }

    #[test]
    fn saturation_runs_merge_and_combine() {
        let mut data = vec![1.0; 2000];
        data[500..520].iter_mut().for_each(|v| *v = 40.0);
        data[540..560].iter_mut().for_each(|v| *v = -40.0);
        let candidates = [100, 300, 900, 1500];
        let cfg = SignalNoiseConfig::default();
        assert_eq!(
            high_amplitude_runs(&data, &candidates, 100.0, &cfg),
            vec![(500, 559)]
        );
        assert_eq!(
            noise_segments(&data, &candidates, 100.0, &cfg),
            vec![(490, 569)]
        );
    }

    #[test]
    fn silent_signal_has_no_noise() {
        let data = vec![0.0; 500];
        assert!(noise_segments(&data, &[], 250.0, &SignalNoiseConfig::default()).is_empty());
    }
}
