use crate::{
    annotations::AnnotationStore,
    detectors::Detection,
    error::{EditError, EditResult},
    noise::{NoiseInterval, NoiseLabel, NoiseSet},
    signal::{nearest_sample, TimeSeries},
    stats::mean,
    track::{RRIntervalTrack, Substitution},
};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Editing parameters for the annotation store and RR track.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackConfig {
    /// Minimum spacing between two beats (seconds).
    pub min_distance_s: f64,
    /// Beats on each side averaged when an interval is interpolated.
    pub interpolation_half_window: usize,
}

impl Default for TrackConfig {
    fn default() -> Self {
        Self {
            min_distance_s: 0.2,
            interpolation_half_window: 5,
        }
    }
}

impl TrackConfig {
    pub fn min_distance_samples(&self, fs: f64) -> usize {
        ((self.min_distance_s * fs).round().max(1.0)) as usize
    }
}

/// A single annotation edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "op")]
pub enum EditOp {
    Add,
    Delete,
    /// Replace the interval ending at the beat with the local mean.
    Interpolate,
    UndoInterpolate,
    /// Delete the beat and add one at `to`; nothing changes if the add is refused.
    Move { to: usize },
}

/// Half-open sample range of the RR track touched by an edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct TrackDelta {
    pub start: usize,
    pub end: usize,
}

impl TrackDelta {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    pub fn union(self, other: Self) -> Self {
        if self.is_empty() {
            other
        } else if other.is_empty() {
            self
        } else {
            Self {
                start: self.start.min(other.start),
                end: self.end.max(other.end),
            }
        }
    }
}

impl From<Range<usize>> for TrackDelta {
    fn from(range: Range<usize>) -> Self {
        Self {
            start: range.start,
            end: range.end,
        }
    }
}

/// Everything one recording's editing pass works on: beats, the RR track derived from
/// them and the noise intervals excluding data from analysis.
///
/// Edits are serialized through `&mut self`; each touches only the samples around the
/// changed beat.
#[derive(Debug, Clone)]
pub struct Session {
    fs: f64,
    len: usize,
    store: AnnotationStore,
    track: RRIntervalTrack,
    noise: NoiseSet,
    config: TrackConfig,
}

impl Session {
    pub fn new(len: usize, fs: f64, config: TrackConfig) -> Self {
        Self::with_beats(len, fs, Vec::new(), NoiseSet::new(), config)
    }

    pub fn with_beats(
        len: usize,
        fs: f64,
        beats: impl IntoIterator<Item = usize>,
        noise: NoiseSet,
        config: TrackConfig,
    ) -> Self {
        let store = AnnotationStore::from_indices(
            beats.into_iter().filter(|&b| b < len),
            config.min_distance_samples(fs),
        );
        let track = RRIntervalTrack::build(store.beats(), len, fs, &noise);
        Self {
            fs,
            len,
            store,
            track,
            noise,
            config,
        }
    }

    /// Seed from detector output over `signal`.
    pub fn from_detection(signal: &TimeSeries, detection: &Detection, config: TrackConfig) -> Self {
        Self::with_beats(
            signal.len(),
            signal.fs,
            detection.beat_indices(),
            NoiseSet::from_intervals(detection.noise.iter().copied()),
            config,
        )
    }

    /// Build a session from a bare RR stream (seconds). The first beat sits at sample 0 and
    /// every interval adds one beat, placed on a grid of `fs` Hz.
    pub fn from_rr_intervals(rr: &[f64], fs: f64, config: TrackConfig) -> Self {
        let mut beats = vec![0usize];
        let mut acc = 0.0;
        let mut skipped = 0usize;
        for &interval in rr {
            if !interval.is_finite() || interval <= 0.0 {
                skipped += 1;
                continue;
            }
            acc += interval;
            beats.push((acc * fs).round() as usize);
        }
        if skipped > 0 {
            warn!("skipped {} non-positive RR interval(s)", skipped);
        }
        let len = beats.last().map_or(0, |b| b + 1);
        Self::with_beats(len, fs, beats, NoiseSet::new(), config)
    }

    pub fn fs(&self) -> f64 {
        self.fs
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn config(&self) -> &TrackConfig {
        &self.config
    }

    pub fn store(&self) -> &AnnotationStore {
        &self.store
    }

    pub fn beats(&self) -> &[usize] {
        self.store.beats()
    }

    pub fn track(&self) -> &RRIntervalTrack {
        &self.track
    }

    pub fn noise(&self) -> &NoiseSet {
        &self.noise
    }

    pub fn time_of(&self, index: usize) -> f64 {
        index as f64 / self.fs
    }

    pub fn beat_times(&self) -> Vec<f64> {
        self.beats().iter().map(|&b| self.time_of(b)).collect()
    }

    /// Interval in effect at every beat position (seconds).
    pub fn intervals(&self) -> Vec<f64> {
        self.track.intervals(self.beats())
    }

    pub fn nearest_beat(&self, index: usize) -> Option<usize> {
        self.store.nearest(index)
    }

    /// The beat sitting at `time` (within half a sample), if any.
    pub fn beat_at_time(&self, time: f64) -> Option<usize> {
        if self.len == 0 {
            return None;
        }
        let index = nearest_sample(time, self.fs, self.len);
        let beat = self.store.nearest(index)?;
        ((self.time_of(beat) - time).abs() <= 0.5 / self.fs + 1e-9).then_some(beat)
    }

    /// Apply one edit. A refused edit leaves the session untouched.
    pub fn edit(&mut self, op: EditOp, index: usize) -> EditResult<TrackDelta> {
        let delta = match op {
            EditOp::Add => self.add(index),
            EditOp::Delete => self.delete(index),
            EditOp::Interpolate => self.interpolate(index),
            EditOp::UndoInterpolate => self.undo_interpolate(index),
            EditOp::Move { to } => self.move_beat(index, to),
        }?;
        debug!(
            "{:?} at {} touched samples {}..{}",
            op, index, delta.start, delta.end
        );
        Ok(delta)
    }

    fn add(&mut self, index: usize) -> EditResult<TrackDelta> {
        if index >= self.len {
            return Err(EditError::OutOfRange {
                index,
                len: self.len,
            });
        }
        let pos = self.store.insert(index)?;
        // the first beat borrows its value from the next one, hence two beats of reach after
        Ok(self.refresh(pos.saturating_sub(1), pos + 2))
    }

    fn delete(&mut self, index: usize) -> EditResult<TrackDelta> {
        let pos = self.store.remove(index)?;
        self.track.restore(index);
        self.track.clear_sparse(index);
        let delta = self.refresh(pos.saturating_sub(1), pos + 1);
        Ok(delta.union(TrackDelta {
            start: index,
            end: index + 1,
        }))
    }

    fn locate(&self, index: usize) -> EditResult<usize> {
        if self.store.is_empty() {
            return Err(EditError::EmptyStore);
        }
        self.store
            .position(index)
            .map_err(|_| EditError::NotABeat { index })
    }

    fn interpolate(&mut self, index: usize) -> EditResult<TrackDelta> {
        let pos = self.locate(index)?;
        if self.track.is_interpolated(index) {
            return Err(EditError::AlreadyInterpolated { index });
        }
        if self.noise.contains(self.time_of(index)) {
            return Err(EditError::NoiseCovered { index });
        }
        let beats = self.store.beats();
        let original = RRIntervalTrack::measured_interval(beats, pos, self.fs)
            .ok_or(EditError::NoNeighbors { index })?;
        let half = self.config.interpolation_half_window;
        let lo = pos.saturating_sub(half).max(1);
        let hi = (pos + half).min(beats.len() - 1);
        let neighbors: Vec<f64> = (lo..=hi)
            .filter(|&p| p != pos && !self.noise.contains(self.time_of(beats[p])))
            .filter_map(|p| self.track.value_at(beats, p))
            .collect();
        let value = mean(&neighbors).ok_or(EditError::NoNeighbors { index })?;
        self.track
            .substitute(index, Substitution { original, value });
        Ok(self.refresh(pos.saturating_sub(1), pos + 1))
    }

    fn undo_interpolate(&mut self, index: usize) -> EditResult<TrackDelta> {
        let pos = self.locate(index)?;
        self.track
            .restore(index)
            .ok_or(EditError::NotInterpolated { index })?;
        Ok(self.refresh(pos.saturating_sub(1), pos + 1))
    }

    fn move_beat(&mut self, from: usize, to: usize) -> EditResult<TrackDelta> {
        if to >= self.len {
            return Err(EditError::OutOfRange {
                index: to,
                len: self.len,
            });
        }
        self.locate(from)?;
        let substitution = self.track.substitution(from).copied();
        let removed = self.delete(from)?;
        match self.add(to) {
            Ok(added) => Ok(removed.union(added)),
            Err(err) => {
                self.add(from)?;
                if let Some(substitution) = substitution {
                    self.track.substitute(from, substitution);
                    let pos = self.locate(from)?;
                    self.refresh(pos.saturating_sub(1), pos + 1);
                }
                Err(err)
            }
        }
    }

    fn refresh(&mut self, lo: usize, hi: usize) -> TrackDelta {
        self.track
            .refresh(self.store.beats(), lo, hi, &self.noise)
            .into()
    }

    /// Recompute the beats whose time falls in `[start, end]`.
    fn refresh_time_range(&mut self, start: f64, end: f64) -> TrackDelta {
        let fs = self.fs;
        let beats = self.store.beats();
        let lo = beats.partition_point(|&b| (b as f64 / fs) < start);
        let hi = beats.partition_point(|&b| (b as f64 / fs) <= end);
        if lo >= hi {
            return TrackDelta::empty();
        }
        self.refresh(lo, hi - 1)
    }

    /// Add a noise interval; same-label overlaps merge. Returns the touched samples.
    pub fn add_noise(&mut self, interval: NoiseInterval) -> TrackDelta {
        let stored = self.noise.insert(interval);
        self.refresh_time_range(stored.start, stored.end)
    }

    /// Delete the interval at `position`; the freed region is clean again.
    pub fn remove_noise(&mut self, position: usize) -> Option<(NoiseInterval, TrackDelta)> {
        let removed = self.noise.remove(position)?;
        let delta = self.refresh_time_range(removed.start, removed.end);
        Some((removed, delta))
    }

    pub fn remove_noise_at(
        &mut self,
        time: f64,
        label: Option<NoiseLabel>,
    ) -> Option<(NoiseInterval, TrackDelta)> {
        let removed = self.noise.remove_at(time, label)?;
        let delta = self.refresh_time_range(removed.start, removed.end);
        Some((removed, delta))
    }

    /// Swap every interval carrying `label` for `intervals` (relabelled to `label`).
    pub fn replace_noise(&mut self, label: NoiseLabel, intervals: &[NoiseInterval]) -> TrackDelta {
        let mut delta = TrackDelta::empty();
        for removed in self.noise.clear_label(label) {
            delta = delta.union(self.refresh_time_range(removed.start, removed.end));
        }
        for interval in intervals {
            let relabelled = NoiseInterval::new(interval.start, interval.end, label);
            delta = delta.union(self.add_noise(relabelled));
        }
        delta
    }

    /// True when the interval ending at beat `position` touches no noise.
    pub fn interval_is_clean(&self, position: usize) -> bool {
        let beats = self.beats();
        if position == 0 || position >= beats.len() {
            return false;
        }
        !self
            .noise
            .overlaps(self.time_of(beats[position - 1]), self.time_of(beats[position]))
    }

    /// Maximal runs of beat positions whose preceding intervals are all clean.
    pub fn clean_runs(&self) -> Vec<Range<usize>> {
        let mut runs = Vec::new();
        let mut start: Option<usize> = None;
        for pos in 1..self.beats().len() {
            match (self.interval_is_clean(pos), start) {
                (true, None) => start = Some(pos),
                (false, Some(s)) => {
                    runs.push(s..pos);
                    start = None;
                }
                _ => {}
            }
        }
        if let Some(s) = start {
            runs.push(s..self.beats().len());
        }
        runs
    }

    /// Intervals in effect over a run of beat positions.
    pub fn run_intervals(&self, run: &Range<usize>) -> Vec<f64> {
        let beats = self.beats();
        run.clone()
            .filter_map(|pos| self.track.value_at(beats, pos))
            .collect()
    }

    /// Full recomputation of the track, keeping substitutions.
    pub fn rebuild(&mut self) {
        let substitutions = self.track.substitutions().clone();
        self.track = RRIntervalTrack::build(self.store.beats(), self.len, self.fs, &self.noise);
        for (beat, substitution) in substitutions {
            if self.store.contains(beat) {
                self.track.substitute(beat, substitution);
            }
        }
        if !self.store.is_empty() {
            let last = self.store.len() - 1;
            self.refresh(0, last);
        }
    }
}
