use super::{OutlierKind, OutlierRecord, RevertEntry, RevertLog};
use crate::{
    session::{EditOp, Session},
    stats::mean,
};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// Discrete sensitivity presets. Higher levels flag smaller deviations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdLevel {
    VeryLow,
    Low,
    #[default]
    Medium,
    High,
    VeryHigh,
}

impl ThresholdLevel {
    pub const WINDOW: usize = 10;

    pub fn tau(self) -> f64 {
        match self {
            ThresholdLevel::VeryLow => 0.45,
            ThresholdLevel::Low => 0.35,
            ThresholdLevel::Medium => 0.25,
            ThresholdLevel::High => 0.15,
            ThresholdLevel::VeryHigh => 0.05,
        }
    }

    pub fn config(self) -> ThresholdConfig {
        ThresholdConfig {
            window: Self::WINDOW,
            tau_s: self.tau(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    /// Neighbouring intervals averaged around each beat.
    pub window: usize,
    /// Allowed deviation from the local mean (seconds).
    pub tau_s: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        ThresholdLevel::default().config()
    }
}

/// Indices into `rr` deviating from the mean of their `window` neighbours by more than `tau`.
/// The first and last `window / 2` intervals are never flagged.
pub fn threshold_flags(rr: &[f64], window: usize, tau: f64) -> Vec<usize> {
    let half = (window / 2).max(1);
    if rr.len() < 2 * half + 1 {
        return Vec::new();
    }
    (half..rr.len() - half)
        .filter(|&i| {
            let neighbours: Vec<f64> = rr[i - half..i]
                .iter()
                .chain(&rr[i + 1..=i + half])
                .copied()
                .collect();
            mean(&neighbours).map_or(false, |m| (m - rr[i]).abs() > tau)
        })
        .collect()
}

/// Flag intervals over every clean run of the session.
pub fn run_threshold_outliers(session: &Session, window: usize, tau: f64) -> Vec<OutlierRecord> {
    let beats = session.beats();
    let mut records = Vec::new();
    for run in session.clean_runs() {
        let rr = session.run_intervals(&run);
        for i in threshold_flags(&rr, window, tau) {
            records.push(OutlierRecord {
                kind: OutlierKind::Threshold,
                time: session.time_of(beats[run.start + i]),
                interval_s: rr[i],
            });
        }
    }
    debug!(
        "threshold pass (window {}, tau {:.2} s) flagged {} interval(s)",
        window,
        tau,
        records.len()
    );
    records
}

/// Interpolate every flagged beat that can be. Beats already interpolated or under noise
/// are skipped.
pub fn apply_threshold_outliers(session: &mut Session, records: &[OutlierRecord]) -> RevertLog {
    let mut log = RevertLog::new();
    for record in records {
        let Some(beat) = session.beat_at_time(record.time) else {
            warn!("no beat at {:.3} s, threshold outlier skipped", record.time);
            continue;
        };
        match session.edit(EditOp::Interpolate, beat) {
            Ok(_) => {
                let original = session
                    .track()
                    .substitution(beat)
                    .map_or(record.interval_s, |s| s.original);
                log.push(RevertEntry::Interpolated { beat, original });
            }
            Err(err) => warn!("threshold outlier at {:.3} s skipped: {}", record.time, err),
        }
    }
    log
}
