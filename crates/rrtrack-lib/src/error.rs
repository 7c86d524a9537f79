use thiserror::Error;

/// Reasons an annotation edit is refused. A refused edit never mutates the session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EditError {
    #[error("sample {index} is outside the recording (length {len})")]
    OutOfRange { index: usize, len: usize },
    #[error("sample {index} is within {min_distance} samples of the beat at {neighbor}")]
    BlockedZone {
        index: usize,
        neighbor: usize,
        min_distance: usize,
    },
    #[error("no beat at sample {index}")]
    NotABeat { index: usize },
    #[error("beat at sample {index} lies inside a noise interval")]
    NoiseCovered { index: usize },
    #[error("beat at sample {index} is already interpolated")]
    AlreadyInterpolated { index: usize },
    #[error("beat at sample {index} is not interpolated")]
    NotInterpolated { index: usize },
    #[error("beat at sample {index} has no clean neighbouring intervals")]
    NoNeighbors { index: usize },
    #[error("annotation store is empty")]
    EmptyStore,
}

pub type EditResult<T> = std::result::Result<T, EditError>;
