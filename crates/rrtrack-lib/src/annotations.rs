use crate::error::{EditError, EditResult};
use log::warn;
use serde::Serialize;

/// Ordered set of accepted beat sample indices.
///
/// Beats are strictly increasing and no two are closer than `min_distance` samples.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AnnotationStore {
    beats: Vec<usize>,
    min_distance: usize,
}

impl AnnotationStore {
    pub fn new(min_distance: usize) -> Self {
        Self {
            beats: Vec::new(),
            min_distance,
        }
    }

    /// Seed from detector output or an imported list. Indices are sorted; any index that
    /// would violate the spacing invariant against the previously kept one is dropped.
    pub fn from_indices(indices: impl IntoIterator<Item = usize>, min_distance: usize) -> Self {
        let mut sorted: Vec<usize> = indices.into_iter().collect();
        sorted.sort_unstable();
        sorted.dedup();
        let mut beats: Vec<usize> = Vec::with_capacity(sorted.len());
        let mut dropped = 0usize;
        for index in sorted {
            match beats.last() {
                Some(&last) if index - last < min_distance => dropped += 1,
                _ => beats.push(index),
            }
        }
        if dropped > 0 {
            warn!(
                "dropped {} annotation(s) closer than {} samples to a previous beat",
                dropped, min_distance
            );
        }
        Self {
            beats,
            min_distance,
        }
    }

    pub fn beats(&self) -> &[usize] {
        &self.beats
    }

    pub fn len(&self) -> usize {
        self.beats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.beats.is_empty()
    }

    pub fn min_distance(&self) -> usize {
        self.min_distance
    }

    pub fn get(&self, position: usize) -> Option<usize> {
        self.beats.get(position).copied()
    }

    /// Binary search: `Ok(position)` for a beat, `Err(insertion point)` otherwise.
    pub fn position(&self, index: usize) -> Result<usize, usize> {
        self.beats.binary_search(&index)
    }

    pub fn contains(&self, index: usize) -> bool {
        self.position(index).is_ok()
    }

    /// Position of the beat closest to `index`; ties go to the earlier beat.
    pub fn nearest_position(&self, index: usize) -> Option<usize> {
        if self.beats.is_empty() {
            return None;
        }
        match self.position(index) {
            Ok(pos) => Some(pos),
            Err(0) => Some(0),
            Err(pos) if pos == self.beats.len() => Some(pos - 1),
            Err(pos) => {
                let before = index - self.beats[pos - 1];
                let after = self.beats[pos] - index;
                Some(if after < before { pos } else { pos - 1 })
            }
        }
    }

    pub fn nearest(&self, index: usize) -> Option<usize> {
        self.nearest_position(index).map(|pos| self.beats[pos])
    }

    /// Position a new beat at `index` would take, or the spacing rule it would break.
    pub fn check_insert(&self, index: usize) -> EditResult<usize> {
        let pos = match self.position(index) {
            Ok(_) => {
                return Err(EditError::BlockedZone {
                    index,
                    neighbor: index,
                    min_distance: self.min_distance,
                })
            }
            Err(pos) => pos,
        };
        let blocked = |neighbor: usize| EditError::BlockedZone {
            index,
            neighbor,
            min_distance: self.min_distance,
        };
        if pos > 0 {
            let prev = self.beats[pos - 1];
            if index - prev < self.min_distance {
                return Err(blocked(prev));
            }
        }
        if let Some(&next) = self.beats.get(pos) {
            if next - index < self.min_distance {
                return Err(blocked(next));
            }
        }
        Ok(pos)
    }

    pub fn insert(&mut self, index: usize) -> EditResult<usize> {
        let pos = self.check_insert(index)?;
        self.beats.insert(pos, index);
        Ok(pos)
    }

    /// Remove the beat at exactly `index`, returning the position it occupied.
    pub fn remove(&mut self, index: usize) -> EditResult<usize> {
        if self.beats.is_empty() {
            return Err(EditError::EmptyStore);
        }
        let pos = self
            .position(index)
            .map_err(|_| EditError::NotABeat { index })?;
        self.beats.remove(pos);
        Ok(pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeding_sorts_and_enforces_spacing() {
        let store = AnnotationStore::from_indices([500, 100, 110, 300, 300], 50);
        assert_eq!(store.beats(), &[100, 300, 500]);
    }

    #[test]
    fn insert_respects_blocked_zone() {
        let mut store = AnnotationStore::from_indices([100, 300], 50);
        assert_eq!(
            store.insert(330),
            Err(EditError::BlockedZone {
                index: 330,
                neighbor: 300,
                min_distance: 50
            })
        );
        assert!(store.insert(100).is_err());
        assert_eq!(store.insert(200), Ok(1));
        assert_eq!(store.beats(), &[100, 200, 300]);
    }

    #[test]
    fn remove_requires_exact_beat() {
        let mut empty = AnnotationStore::new(10);
        assert_eq!(empty.remove(5), Err(EditError::EmptyStore));
        let mut store = AnnotationStore::from_indices([100, 200], 10);
        assert_eq!(store.remove(150), Err(EditError::NotABeat { index: 150 }));
        assert_eq!(store.remove(200), Ok(1));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn nearest_lookup() {
        let store = AnnotationStore::from_indices([100, 200, 400], 10);
        assert_eq!(store.nearest(0), Some(100));
        assert_eq!(store.nearest(149), Some(100));
        assert_eq!(store.nearest(151), Some(200));
        assert_eq!(store.nearest(150), Some(100));
        assert_eq!(store.nearest(1000), Some(400));
        assert_eq!(AnnotationStore::new(1).nearest(5), None);
    }
}
