//! Beat detection over a filtered single-lead ECG.

pub mod qrs;
pub mod segments;

pub use qrs::QrsConfig;
pub use segments::SignalNoiseConfig;

use crate::{
    noise::{NoiseInterval, NoiseLabel},
    signal::TimeSeries,
};
use log::debug;
use serde::{Deserialize, Serialize};

/// Which branch of the classifier accepted a beat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BeatKind {
    /// Above the primary threshold.
    Primary,
    /// Recovered by searching back through a long gap.
    SearchBack,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectedBeat {
    pub index: usize,
    /// Refined signal amplitude at the beat.
    pub amplitude: f64,
    /// Position of the amplitude between the noise and signal levels, in `[0, 1]`.
    pub confidence: f64,
    pub kind: BeatKind,
}

/// Output of [`detect`]: beats outside flagged ranges plus the flagged ranges themselves.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Detection {
    pub fs: f64,
    pub sample_count: usize,
    pub candidate_count: usize,
    pub beats: Vec<DetectedBeat>,
    pub noise: Vec<NoiseInterval>,
}

impl Detection {
    pub fn beat_indices(&self) -> Vec<usize> {
        self.beats.iter().map(|b| b.index).collect()
    }
}

/// Detect beats and signal-level noise in a filtered ECG.
///
/// Never fails: an empty, silent or too short signal gives an empty detection.
pub fn detect(signal: &TimeSeries, qrs: &QrsConfig, noise: &SignalNoiseConfig) -> Detection {
    let data = &signal.data;
    let fs = signal.fs;
    let mut detection = Detection {
        fs,
        sample_count: data.len(),
        ..Detection::default()
    };
    if data.len() < 3 || !(fs > 0.0) {
        debug!("signal too short for detection ({} samples)", data.len());
        return detection;
    }

    let envelope = qrs::energy_envelope(data, fs, qrs);
    let candidates = qrs::find_candidates(&envelope, fs, qrs);
    let flagged = segments::noise_segments(data, &candidates, fs, noise);
    let inside = |index: usize| flagged.iter().any(|&(s, e)| s <= index && index <= e);

    let clean: Vec<usize> = candidates.iter().copied().filter(|&c| !inside(c)).collect();
    debug!(
        "{} envelope candidates, {} outside {} flagged range(s)",
        candidates.len(),
        clean.len(),
        flagged.len()
    );
    detection.candidate_count = candidates.len();
    detection.beats = qrs::classify(data, fs, &clean, qrs)
        .into_iter()
        .filter(|b| !inside(b.index))
        .collect();
    detection.noise = flagged
        .iter()
        .map(|&(s, e)| NoiseInterval::new(s as f64 / fs, e as f64 / fs, NoiseLabel::Ecg))
        .collect();
    detection
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::{bandpass, synthetic_ecg};

    fn one_hertz_rhythm(duration_s: f64) -> TimeSeries {
        let times: Vec<f64> = (0..)
            .map(|k| 0.5 + k as f64)
            .take_while(|t| *t < duration_s)
            .collect();
        synthetic_ecg(250.0, duration_s, &times)
    }

    #[test]
    fn sixty_second_rhythm_gives_sixty_beats() {
        let ts = one_hertz_rhythm(60.0);
        let detection = detect(&ts, &QrsConfig::default(), &SignalNoiseConfig::default());
        assert!(
            (59..=61).contains(&detection.beats.len()),
            "found {} beats",
            detection.beats.len()
        );
        assert!(detection.noise.is_empty());
        for pair in detection.beats.windows(2) {
            let rr = (pair[1].index - pair[0].index) as f64 / ts.fs;
            assert!((rr - 1.0).abs() < 0.02, "rr {rr}");
        }
    }

    #[test]
    fn prefiltered_rhythm_is_detected() {
        let ts = one_hertz_rhythm(30.0);
        let cfg = QrsConfig::default();
        let filtered = bandpass(&ts, cfg.prefilter_low_hz, cfg.prefilter_high_hz);
        let detection = detect(&filtered, &cfg, &SignalNoiseConfig::default());
        assert!((29..=31).contains(&detection.beats.len()));
    }

    #[test]
    fn all_zero_signal_is_empty() {
        let ts = TimeSeries::new(250.0, vec![0.0; 5000]);
        let detection = detect(&ts, &QrsConfig::default(), &SignalNoiseConfig::default());
        assert!(detection.beats.is_empty());
        assert!(detection.noise.is_empty());
        let tiny = TimeSeries::new(250.0, vec![1.0]);
        assert!(detect(&tiny, &QrsConfig::default(), &SignalNoiseConfig::default())
            .beats
            .is_empty());
    }

    #[test]
    fn flatline_becomes_ecg_noise() {
        let mut ts = one_hertz_rhythm(40.0);
        let (start, end) = (20.2, 23.2);
        for (i, v) in ts.data.iter_mut().enumerate() {
            let t = i as f64 / ts.fs;
            if (start..end).contains(&t) {
                *v = 0.0;
            }
        }
        let detection = detect(&ts, &QrsConfig::default(), &SignalNoiseConfig::default());
        assert_eq!(detection.noise.len(), 1);
        let interval = detection.noise[0];
        assert_eq!(interval.label, NoiseLabel::Ecg);
        assert!(interval.start <= start + 0.01 && interval.end >= end - 0.01);
        assert!(detection
            .beats
            .iter()
            .all(|b| !interval.contains(b.index as f64 / ts.fs)));
        assert!((35..=38).contains(&detection.beats.len()));
    }

    #[test]
    fn saturation_burst_is_excluded() {
        let mut ts = one_hertz_rhythm(60.0);
        for (i, v) in ts.data.iter_mut().enumerate() {
            let t = i as f64 / ts.fs;
            if (30.2..31.2).contains(&t) {
                *v = 50.0;
            }
        }
        let detection = detect(&ts, &QrsConfig::default(), &SignalNoiseConfig::default());
        assert_eq!(detection.noise.len(), 1);
        assert!(detection.noise[0].contains(30.7));
        assert!(detection
            .beats
            .iter()
            .all(|b| !(30.2..31.2).contains(&(b.index as f64 / ts.fs))));
        assert!((57..=60).contains(&detection.beats.len()));
    }
}
