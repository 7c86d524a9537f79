//! Beat-level outlier detection and the corrections derived from it.

pub mod algorithm;
pub mod cluster;
pub mod threshold;

pub use algorithm::{
    apply_algorithm_corrections, rerun_algorithm_outliers, run_algorithm_outliers,
    AlgorithmConfig,
};
pub use cluster::{apply_cluster_noise, cluster_noise, ClusterConfig};
pub use threshold::{
    apply_threshold_outliers, run_threshold_outliers, ThresholdConfig, ThresholdLevel,
};

use crate::session::{EditOp, Session, TrackDelta};
use log::warn;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutlierKind {
    Extra,
    Missed,
    Ectopic,
    LongShort,
    Threshold,
}

/// One flagged interval, referenced by the time of the beat that ends it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OutlierRecord {
    pub kind: OutlierKind,
    pub time: f64,
    /// Interval in effect when the record was made (seconds).
    pub interval_s: f64,
}

pub fn count_kind(records: &[OutlierRecord], kind: OutlierKind) -> usize {
    records.iter().filter(|r| r.kind == kind).count()
}

pub fn record_times(records: &[OutlierRecord]) -> Vec<f64> {
    records.iter().map(|r| r.time).collect()
}

/// A correction already applied to a session, with what is needed to undo it exactly.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "edit")]
pub enum RevertEntry {
    Inserted { beat: usize },
    Deleted { beat: usize },
    Interpolated { beat: usize, original: f64 },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RevertLog {
    entries: Vec<RevertEntry>,
}

impl RevertLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: RevertEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[RevertEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn extend(&mut self, other: RevertLog) {
        self.entries.extend(other.entries);
    }
}

/// Undo logged corrections, newest first.
pub fn revert_corrections(session: &mut Session, log: RevertLog) -> TrackDelta {
    let mut delta = TrackDelta::empty();
    for entry in log.entries.into_iter().rev() {
        let result = match entry {
            RevertEntry::Inserted { beat } => session.edit(EditOp::Delete, beat),
            RevertEntry::Deleted { beat } => session.edit(EditOp::Add, beat),
            RevertEntry::Interpolated { beat, .. } => {
                session.edit(EditOp::UndoInterpolate, beat)
            }
        };
        match result {
            Ok(touched) => delta = delta.union(touched),
            Err(err) => warn!("could not revert {:?}: {}", entry, err),
        }
    }
    delta
}
