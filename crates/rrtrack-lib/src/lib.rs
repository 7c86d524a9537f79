pub mod annotations;
pub mod config;
pub mod detectors;
pub mod error;
pub mod io;
pub mod noise;
pub mod outliers;
pub mod session;
pub mod signal;
pub mod stats;
pub mod track;

pub use annotations::AnnotationStore;
pub use config::EngineConfig;
pub use detectors::{detect, BeatKind, DetectedBeat, Detection, QrsConfig, SignalNoiseConfig};
pub use error::{EditError, EditResult};
pub use noise::{NoiseInterval, NoiseLabel, NoiseSet};
pub use outliers::*;
pub use session::{EditOp, Session, TrackConfig, TrackDelta};
pub use signal::*;
pub use track::{RRIntervalTrack, Substitution};
