use crate::{
    detectors::{QrsConfig, SignalNoiseConfig},
    outliers::{AlgorithmConfig, ClusterConfig, ThresholdConfig},
    session::TrackConfig,
};
use serde::{Deserialize, Serialize};

/// Every tunable of the engine in one place. Missing sections and fields take their defaults,
/// so a partial settings file only lists what it changes.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub qrs: QrsConfig,
    pub signal_noise: SignalNoiseConfig,
    pub track: TrackConfig,
    pub threshold: ThresholdConfig,
    pub algorithm: AlgorithmConfig,
    pub cluster: ClusterConfig,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outliers::ThresholdLevel;

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg: EngineConfig = toml::from_str(
            r#"
            [track]
            min_distance_s = 0.3

            [threshold]
            tau_s = 0.15
            "#,
        )
        .unwrap();
        assert_eq!(cfg.track.min_distance_s, 0.3);
        assert_eq!(cfg.track.interpolation_half_window, 5);
        assert_eq!(cfg.threshold.tau_s, ThresholdLevel::High.tau());
        assert_eq!(cfg.threshold.window, 10);
        assert_eq!(cfg.qrs.long_gap_s, 1.4);
        assert_eq!(cfg.algorithm.alpha, 5.2);
        assert_eq!(cfg.cluster.noise_length_limit, 5);
    }

    #[test]
    fn empty_document_is_the_default() {
        let cfg: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.signal_noise.combine_distance_s, 2.0);
        assert_eq!(cfg.qrs.searchback_weight, 0.75);
    }
}
