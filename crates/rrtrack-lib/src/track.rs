use crate::noise::NoiseSet;
use serde::Serialize;
use std::collections::BTreeMap;
use std::ops::Range;

/// Interval substituted at a beat, with the measured value it replaced.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Substitution {
    pub original: f64,
    pub value: f64,
}

/// Per-sample RR-interval signal derived from the beat list.
///
/// `interpolated` is a continuous, linearly interpolated RR curve over the whole recording.
/// `sparse` holds the interval value (seconds) at each beat sample outside noise and zero
/// everywhere else. The value at a beat is the interval preceding it; the first beat borrows
/// the interval that follows it. With fewer than two beats both arrays are all zero.
#[derive(Debug, Clone, Serialize)]
pub struct RRIntervalTrack {
    fs: f64,
    interpolated: Vec<f64>,
    sparse: Vec<f64>,
    substitutions: BTreeMap<usize, Substitution>,
}

impl RRIntervalTrack {
    pub fn new(len: usize, fs: f64) -> Self {
        Self {
            fs,
            interpolated: vec![0.0; len],
            sparse: vec![0.0; len],
            substitutions: BTreeMap::new(),
        }
    }

    /// Full recomputation from a beat list. Edits use the localized path instead.
    pub fn build(beats: &[usize], len: usize, fs: f64, noise: &NoiseSet) -> Self {
        let mut track = Self::new(len, fs);
        if !beats.is_empty() {
            track.refresh(beats, 0, beats.len() - 1, noise);
        }
        track
    }

    pub fn len(&self) -> usize {
        self.interpolated.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interpolated.is_empty()
    }

    pub fn fs(&self) -> f64 {
        self.fs
    }

    pub fn interpolated(&self) -> &[f64] {
        &self.interpolated
    }

    pub fn sparse(&self) -> &[f64] {
        &self.sparse
    }

    pub fn substitutions(&self) -> &BTreeMap<usize, Substitution> {
        &self.substitutions
    }

    pub fn substitution(&self, beat: usize) -> Option<&Substitution> {
        self.substitutions.get(&beat)
    }

    pub fn is_interpolated(&self, beat: usize) -> bool {
        self.substitutions.contains_key(&beat)
    }

    /// Measured interval at beat `position`.
    pub fn measured_interval(beats: &[usize], position: usize, fs: f64) -> Option<f64> {
        if beats.len() < 2 || position >= beats.len() {
            return None;
        }
        let (a, b) = if position == 0 { (0, 1) } else { (position - 1, position) };
        Some((beats[b] - beats[a]) as f64 / fs)
    }

    /// Interval in effect at beat `position`: the substitution if there is one, else measured.
    pub fn value_at(&self, beats: &[usize], position: usize) -> Option<f64> {
        let measured = Self::measured_interval(beats, position, self.fs)?;
        Some(
            self.substitutions
                .get(&beats[position])
                .map_or(measured, |s| s.value),
        )
    }

    /// Interval in effect at every beat position.
    pub fn intervals(&self, beats: &[usize]) -> Vec<f64> {
        (0..beats.len())
            .filter_map(|pos| self.value_at(beats, pos))
            .collect()
    }

    pub(crate) fn substitute(&mut self, beat: usize, substitution: Substitution) {
        self.substitutions.insert(beat, substitution);
    }

    pub(crate) fn restore(&mut self, beat: usize) -> Option<Substitution> {
        self.substitutions.remove(&beat)
    }

    pub(crate) fn clear_sparse(&mut self, index: usize) {
        if let Some(slot) = self.sparse.get_mut(index) {
            *slot = 0.0;
        }
    }

    /// Recompute beat positions `lo..=hi` and the samples they span.
    ///
    /// `sparse` is rewritten at exactly those beats; `interpolated` over
    /// `[beats[lo], beats[hi]]`, extended to the recording edges when `lo` / `hi` is the
    /// first / last beat. Every sample is written by exactly one rule (beat value, segment
    /// ramp, head or tail) so a partial refresh matches a full build bit for bit.
    /// Returns the touched sample range.
    pub(crate) fn refresh(
        &mut self,
        beats: &[usize],
        lo: usize,
        hi: usize,
        noise: &NoiseSet,
    ) -> Range<usize> {
        let len = self.len();
        if beats.len() < 2 {
            self.interpolated.iter_mut().for_each(|v| *v = 0.0);
            self.sparse.iter_mut().for_each(|v| *v = 0.0);
            return 0..len;
        }
        let last = beats.len() - 1;
        let lo = lo.min(last);
        let hi = hi.min(last).max(lo);
        let values: Vec<f64> = (lo..=hi)
            .map(|pos| self.value_at(beats, pos).unwrap_or(0.0))
            .collect();

        for (offset, pos) in (lo..=hi).enumerate() {
            let beat = beats[pos];
            if beat >= len {
                continue;
            }
            let time = beat as f64 / self.fs;
            self.interpolated[beat] = values[offset];
            self.sparse[beat] = if noise.contains(time) {
                0.0
            } else {
                values[offset]
            };
        }

        let start = if lo == 0 { 0 } else { beats[lo].min(len) };
        let end = if hi == last {
            len
        } else {
            (beats[hi] + 1).min(len)
        };

        if lo == 0 {
            let head = beats[0].min(len);
            self.interpolated[..head].iter_mut().for_each(|v| *v = values[0]);
        }
        for pos in lo..hi {
            let (a, b) = (beats[pos], beats[pos + 1]);
            let (va, vb) = (values[pos - lo], values[pos + 1 - lo]);
            let span = (b - a) as f64;
            for i in (a + 1)..b.min(len) {
                self.interpolated[i] = va + (vb - va) * (i - a) as f64 / span;
            }
        }
        if hi == last && beats[last] < len {
            let tail = values[hi - lo];
            self.interpolated[beats[last] + 1..]
                .iter_mut()
                .for_each(|v| *v = tail);
        }
        start..end
    }
}
