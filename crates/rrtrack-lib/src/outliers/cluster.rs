use crate::{
    noise::{NoiseInterval, NoiseLabel},
    session::{Session, TrackDelta},
};
use log::debug;
use serde::{Deserialize, Serialize};

/// Rules turning dense outlier runs into noise intervals.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Consecutive clean beats that close a cluster.
    pub noise_length_limit: usize,
    /// Share of the cluster's RR time that must be outlier time.
    pub noise_size_limit: f64,
    /// A cluster needs more outliers than this.
    pub minimum_noise_beats: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            noise_length_limit: 5,
            noise_size_limit: 0.3,
            minimum_noise_beats: 2,
        }
    }
}

fn nearest_position(beat_times: &[f64], time: f64) -> usize {
    let pos = beat_times.partition_point(|&t| t < time);
    if pos == 0 {
        0
    } else if pos == beat_times.len() {
        pos - 1
    } else if beat_times[pos] - time < time - beat_times[pos - 1] {
        pos
    } else {
        pos - 1
    }
}

fn interval(beat_times: &[f64], pos: usize) -> f64 {
    match pos {
        0 => beat_times[1] - beat_times[0],
        _ => beat_times[pos] - beat_times[pos - 1],
    }
}

/// Group outlier beats into noise windows.
///
/// Outliers are mapped to their nearest beat. A cluster spans from the interval ending at
/// its first outlier to its last outlier and is emitted only when it holds more than
/// `minimum_noise_beats` outliers whose intervals exceed `noise_size_limit` of its RR time.
pub fn cluster_noise(
    outlier_times: &[f64],
    beat_times: &[f64],
    cfg: &ClusterConfig,
) -> Vec<NoiseInterval> {
    if outlier_times.is_empty() || beat_times.len() < 2 {
        return Vec::new();
    }
    let mut positions: Vec<usize> = outlier_times
        .iter()
        .map(|&t| nearest_position(beat_times, t))
        .collect();
    positions.sort_unstable();
    positions.dedup();

    let mut clusters: Vec<Vec<usize>> = Vec::new();
    for pos in positions {
        match clusters.last_mut() {
            Some(cluster)
                if cluster
                    .last()
                    .map_or(false, |&prev| pos - prev - 1 < cfg.noise_length_limit) =>
            {
                cluster.push(pos)
            }
            _ => clusters.push(vec![pos]),
        }
    }

    let intervals: Vec<NoiseInterval> = clusters
        .into_iter()
        .filter_map(|cluster| {
            let (first, last) = (cluster[0], cluster[cluster.len() - 1]);
            let outlier_time: f64 = cluster.iter().map(|&p| interval(beat_times, p)).sum();
            let span_time: f64 = (first..=last).map(|p| interval(beat_times, p)).sum();
            let ratio = if span_time > 0.0 {
                outlier_time / span_time
            } else {
                0.0
            };
            (ratio > cfg.noise_size_limit && cluster.len() > cfg.minimum_noise_beats).then(|| {
                NoiseInterval::new(
                    beat_times[first.saturating_sub(1)],
                    beat_times[last],
                    NoiseLabel::Detected,
                )
            })
        })
        .collect();
    debug!("clustered outliers into {} noise interval(s)", intervals.len());
    intervals
}

/// Replace the session's detected-noise intervals with fresh clusters.
pub fn apply_cluster_noise(
    session: &mut Session,
    outlier_times: &[f64],
    cfg: &ClusterConfig,
) -> (Vec<NoiseInterval>, TrackDelta) {
    let intervals = cluster_noise(outlier_times, &session.beat_times(), cfg);
    let delta = session.replace_noise(NoiseLabel::Detected, &intervals);
    (intervals, delta)
}
