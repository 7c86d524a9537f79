use serde::{Deserialize, Serialize};

/// Where a noise interval came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoiseLabel {
    /// Marked by hand.
    User,
    /// Flatline or saturation found in the ECG itself.
    Ecg,
    /// Cluster of outlier beats.
    Detected,
    /// Gap in the recording.
    MissingData,
}

/// Time range (seconds, inclusive) excluded from interval statistics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoiseInterval {
    pub start: f64,
    pub end: f64,
    pub label: NoiseLabel,
}

impl NoiseInterval {
    pub fn new(start: f64, end: f64, label: NoiseLabel) -> Self {
        let (start, end) = if start <= end {
            (start, end)
        } else {
            (end, start)
        };
        Self { start, end, label }
    }

    pub fn contains(&self, time: f64) -> bool {
        self.start <= time && time <= self.end
    }

    pub fn overlaps(&self, start: f64, end: f64) -> bool {
        self.start <= end && start <= self.end
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// All noise intervals of a session, sorted by start.
///
/// Intervals with the same label never overlap: inserting one merges it with every
/// same-label interval it touches. Intervals with different labels may overlap.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NoiseSet {
    intervals: Vec<NoiseInterval>,
}

impl NoiseSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_intervals(intervals: impl IntoIterator<Item = NoiseInterval>) -> Self {
        let mut set = Self::new();
        for interval in intervals {
            set.insert(interval);
        }
        set
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn as_slice(&self) -> &[NoiseInterval] {
        &self.intervals
    }

    pub fn iter(&self) -> impl Iterator<Item = &NoiseInterval> {
        self.intervals.iter()
    }

    /// Filtered view over one label.
    pub fn with_label(&self, label: NoiseLabel) -> impl Iterator<Item = &NoiseInterval> {
        self.intervals.iter().filter(move |n| n.label == label)
    }

    /// Insert, merging with overlapping intervals of the same label. Returns the stored interval.
    pub fn insert(&mut self, interval: NoiseInterval) -> NoiseInterval {
        let mut merged = interval;
        self.intervals.retain(|existing| {
            if existing.label == merged.label && existing.overlaps(merged.start, merged.end) {
                merged.start = merged.start.min(existing.start);
                merged.end = merged.end.max(existing.end);
                false
            } else {
                true
            }
        });
        // a merge can grow the interval over a neighbour it did not touch before
        if self
            .intervals
            .iter()
            .any(|n| n.label == merged.label && n.overlaps(merged.start, merged.end))
        {
            return self.insert(merged);
        }
        let pos = self.intervals.partition_point(|n| n.start <= merged.start);
        self.intervals.insert(pos, merged);
        merged
    }

    pub fn remove(&mut self, position: usize) -> Option<NoiseInterval> {
        (position < self.intervals.len()).then(|| self.intervals.remove(position))
    }

    /// Remove the first interval covering `time`, optionally restricted to one label.
    pub fn remove_at(&mut self, time: f64, label: Option<NoiseLabel>) -> Option<NoiseInterval> {
        let position = self
            .intervals
            .iter()
            .position(|n| n.contains(time) && label.map_or(true, |l| l == n.label))?;
        self.remove(position)
    }

    /// Drop every interval with `label`, returning them.
    pub fn clear_label(&mut self, label: NoiseLabel) -> Vec<NoiseInterval> {
        let (removed, kept): (Vec<_>, Vec<_>) =
            self.intervals.drain(..).partition(|n| n.label == label);
        self.intervals = kept;
        removed
    }

    pub fn covering(&self, time: f64) -> Option<&NoiseInterval> {
        self.intervals.iter().find(|n| n.contains(time))
    }

    pub fn contains(&self, time: f64) -> bool {
        self.covering(time).is_some()
    }

    /// True when any interval touches `[start, end]`.
    pub fn overlaps(&self, start: f64, end: f64) -> bool {
        self.intervals.iter().any(|n| n.overlaps(start, end))
    }
}
