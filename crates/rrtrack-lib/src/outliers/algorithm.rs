//! Quartile-deviation classifier for extra, missed, ectopic and long/short beats.
//!
//! Each clean run of intervals is classified from scratch. Corrections reference beats by
//! time and are resolved to sample indices only right before each edit, so earlier edits
//! never invalidate later ones.

use super::{revert_corrections, OutlierKind, OutlierRecord, RevertEntry, RevertLog};
use crate::{
    session::{EditOp, Session},
    stats::{median, quartile_deviation, rolling},
};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct AlgorithmConfig {
    /// Scale applied to the quartile deviation to form both thresholds.
    pub alpha: f64,
    pub c1: f64,
    pub c2: f64,
    /// Beats on each side in the quartile-deviation windows.
    pub quartile_half_window: usize,
    /// Beats on each side in the median window.
    pub median_half_window: usize,
    /// |mRR_norm| above this marks a long or short interval.
    pub median_limit: f64,
    /// Thresholds at or below this skip the beat.
    pub min_threshold: f64,
}

impl Default for AlgorithmConfig {
    fn default() -> Self {
        Self {
            alpha: 5.2,
            c1: 0.13,
            c2: 0.17,
            quartile_half_window: 45,
            median_half_window: 5,
            median_limit: 3.0,
            min_threshold: 1e-9,
        }
    }
}

/// Normalised features of one run.
struct Features {
    drr_norm: Vec<Option<f64>>,
    mrr_norm: Vec<Option<f64>>,
    med_rr: Vec<Option<f64>>,
    th2: Vec<Option<f64>>,
}

fn normalise(values: &[f64], cfg: &AlgorithmConfig) -> (Vec<Option<f64>>, Vec<Option<f64>>) {
    let magnitudes: Vec<f64> = values.iter().map(|v| v.abs()).collect();
    let thresholds: Vec<Option<f64>> = rolling(&magnitudes, cfg.quartile_half_window, |w| {
        quartile_deviation(w).map(|qd| cfg.alpha * qd)
    })
    .into_iter()
    .map(|th| th.filter(|t| *t > cfg.min_threshold))
    .collect();
    let normalised = values
        .iter()
        .zip(&thresholds)
        .map(|(v, th)| th.map(|t| v / t))
        .collect();
    (normalised, thresholds)
}

fn features(rr: &[f64], cfg: &AlgorithmConfig) -> Features {
    let drr: Vec<f64> = (0..rr.len())
        .map(|i| if i == 0 { 0.0 } else { rr[i] - rr[i - 1] })
        .collect();
    let (drr_norm, _) = normalise(&drr, cfg);
    let med_rr = rolling(rr, cfg.median_half_window, median);
    let mrr: Vec<f64> = rr
        .iter()
        .zip(&med_rr)
        .map(|(r, m)| {
            let d = r - m.unwrap_or(*r);
            if d < 0.0 {
                2.0 * d
            } else {
                d
            }
        })
        .collect();
    let (mrr_norm, th2) = normalise(&mrr, cfg);
    Features {
        drr_norm,
        mrr_norm,
        med_rr,
        th2,
    }
}

/// Classify every interval of one contiguous run. Returns `(index into rr, kind)` pairs.
pub fn classify_run(rr: &[f64], cfg: &AlgorithmConfig) -> Vec<(usize, OutlierKind)> {
    let n = rr.len();
    if n < 3 {
        return Vec::new();
    }
    let f = features(rr, cfg);
    let dn = |j: usize| f.drr_norm.get(j).copied().flatten().unwrap_or(0.0);
    let mut flags = Vec::new();
    for i in 0..n {
        let (Some(d), Some(m), Some(med), Some(th2)) =
            (f.drr_norm[i], f.mrr_norm[i], f.med_rr[i], f.th2[i])
        else {
            continue;
        };
        let s12 = if i == 0 || i == n - 1 {
            0.0
        } else if d > 0.0 {
            dn(i - 1).max(dn(i + 1))
        } else {
            dn(i - 1).min(dn(i + 1))
        };
        let ectopic = (d > 1.0 && s12 < -cfg.c1 * d + cfg.c2)
            || (d < -1.0 && s12 > -cfg.c1 * d - cfg.c2);
        if ectopic {
            flags.push((i, OutlierKind::Ectopic));
            continue;
        }
        if d.abs() <= 1.0 && m.abs() <= cfg.median_limit {
            continue;
        }
        let sign = d.signum();
        let follows = sign * dn(i + 1) < -1.0
            || m.abs() > cfg.median_limit
            || sign * dn(i + 2) < -1.0;
        if !follows {
            continue;
        }
        let kind = if (rr[i] / 2.0 - med).abs() < th2 {
            OutlierKind::Missed
        } else if i + 1 < n && (rr[i] + rr[i + 1] - med).abs() < th2 {
            OutlierKind::Extra
        } else {
            OutlierKind::LongShort
        };
        flags.push((i, kind));
    }
    flags
}

/// Run the classifier over every clean run of the session.
pub fn run_algorithm_outliers(session: &Session, cfg: &AlgorithmConfig) -> Vec<OutlierRecord> {
    let beats = session.beats();
    let mut records = Vec::new();
    for run in session.clean_runs() {
        let rr = session.run_intervals(&run);
        records.extend(classify_run(&rr, cfg).into_iter().map(|(i, kind)| OutlierRecord {
            kind,
            time: session.time_of(beats[run.start + i]),
            interval_s: rr[i],
        }));
    }
    debug!("algorithm pass flagged {} interval(s)", records.len());
    records
}

/// Apply corrections: delete extra beats, insert missed ones at the midpoint with their
/// predecessor, then interpolate ectopic and long/short beats.
pub fn apply_algorithm_corrections(session: &mut Session, records: &[OutlierRecord]) -> RevertLog {
    let mut log = RevertLog::new();
    let of_kind = |kinds: &[OutlierKind]| {
        records
            .iter()
            .filter(|r| kinds.contains(&r.kind))
            .copied()
            .collect::<Vec<_>>()
    };

    for record in of_kind(&[OutlierKind::Extra]) {
        let Some(beat) = session.beat_at_time(record.time) else {
            warn!("extra beat at {:.3} s no longer present", record.time);
            continue;
        };
        match session.edit(EditOp::Delete, beat) {
            Ok(_) => log.push(RevertEntry::Deleted { beat }),
            Err(err) => warn!("extra beat at {:.3} s kept: {}", record.time, err),
        }
    }

    for record in of_kind(&[OutlierKind::Missed]) {
        let Some(beat) = session.beat_at_time(record.time) else {
            warn!("missed beat before {:.3} s: anchor gone", record.time);
            continue;
        };
        let previous = match session.store().position(beat) {
            Ok(pos) if pos > 0 => session.beats()[pos - 1],
            _ => {
                warn!("missed beat before {:.3} s has no predecessor", record.time);
                continue;
            }
        };
        let midpoint = previous + (beat - previous) / 2;
        match session.edit(EditOp::Add, midpoint) {
            Ok(_) => log.push(RevertEntry::Inserted { beat: midpoint }),
            Err(err) => warn!("missed beat before {:.3} s not inserted: {}", record.time, err),
        }
    }

    for record in of_kind(&[OutlierKind::Ectopic, OutlierKind::LongShort]) {
        let Some(beat) = session.beat_at_time(record.time) else {
            warn!("{:?} beat at {:.3} s no longer present", record.kind, record.time);
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
            Err(err) => warn!("{:?} beat at {:.3} s skipped: {}", record.kind, record.time, err),
        }
    }
    debug!("applied {} correction(s)", log.len());
    log
}

/// Revert previously applied corrections, then classify again from scratch.
pub fn rerun_algorithm_outliers(
    session: &mut Session,
    applied: &mut RevertLog,
    cfg: &AlgorithmConfig,
) -> Vec<OutlierRecord> {
    revert_corrections(session, std::mem::take(applied));
    run_algorithm_outliers(session, cfg)
}
