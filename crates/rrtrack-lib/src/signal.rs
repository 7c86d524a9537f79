use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Uniformly sampled single-lead trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSeries {
    /// Uniform sampling frequency in Hz
    pub fs: f64,
    /// Samples
    pub data: Vec<f64>,
}

impl TimeSeries {
    pub fn new(fs: f64, data: Vec<f64>) -> Self {
        Self { fs, data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn duration(&self) -> f64 {
        self.data.len() as f64 / self.fs
    }

    /// Time in seconds of sample `index`.
    pub fn time_of(&self, index: usize) -> f64 {
        index as f64 / self.fs
    }
}

/// Nearest sample index for a time in seconds, clamped to `len - 1`.
pub fn nearest_sample(time: f64, fs: f64, len: usize) -> usize {
    if len == 0 || !time.is_finite() || time <= 0.0 {
        return 0;
    }
    ((time * fs).round() as usize).min(len - 1)
}

/// Convert a duration to a sample count, never below one sample.
pub fn seconds_to_samples(seconds: f64, fs: f64) -> usize {
    ((seconds * fs).round().max(1.0)) as usize
}

/// Prefilter used ahead of beat detection: single-pole high-pass then single-pole low-pass.
///
/// A cutoff of zero (or a low-pass cutoff at or above Nyquist) disables that stage.
pub fn bandpass(ts: &TimeSeries, low_hz: f64, high_hz: f64) -> TimeSeries {
    let fs = ts.fs.max(1.0);
    let data = &ts.data;
    if data.is_empty() {
        return TimeSeries::new(ts.fs, Vec::new());
    }
    let hp = if low_hz > 0.0 {
        single_pole_highpass(data, fs, low_hz)
    } else {
        data.to_vec()
    };
    let out = if high_hz <= 0.0 || high_hz >= fs * 0.5 {
        hp
    } else {
        single_pole_lowpass(&hp, fs, high_hz)
    };
    TimeSeries::new(ts.fs, out)
}

fn single_pole_highpass(data: &[f64], fs: f64, cutoff: f64) -> Vec<f64> {
    let dt = 1.0 / fs;
    let rc = 1.0 / (2.0 * PI * cutoff.max(0.01));
    let alpha = rc / (rc + dt);
    let mut out = Vec::with_capacity(data.len());
    let mut prev_y = 0.0;
    let mut prev_x = data[0];
    for &x in data {
        let y = alpha * (prev_y + x - prev_x);
        out.push(y);
        prev_y = y;
        prev_x = x;
    }
    out
}

fn single_pole_lowpass(data: &[f64], fs: f64, cutoff: f64) -> Vec<f64> {
    let dt = 1.0 / fs;
    let rc = 1.0 / (2.0 * PI * cutoff.max(0.01));
    let alpha = dt / (rc + dt);
    let mut out = Vec::with_capacity(data.len());
    let mut prev = data[0];
    for &x in data {
        prev += alpha * (x - prev);
        out.push(prev);
    }
    out
}

pub(crate) fn derivative(data: &[f64]) -> Vec<f64> {
    let mut out = vec![0.0; data.len()];
    for i in 1..data.len() {
        out[i] = data[i] - data[i - 1];
    }
    out
}

pub(crate) fn square(data: &[f64]) -> Vec<f64> {
    data.iter().map(|x| x * x).collect()
}

/// Zero-phase moving average: each output is the mean of the window centred on it,
/// truncated at the edges.
pub(crate) fn moving_average_centered(data: &[f64], win: usize) -> Vec<f64> {
    if data.is_empty() || win <= 1 {
        return data.to_vec();
    }
    let mut prefix = Vec::with_capacity(data.len() + 1);
    prefix.push(0.0);
    let mut acc = 0.0;
    for &sample in data {
        acc += sample;
        prefix.push(acc);
    }
    let before = win / 2;
    let after = win - before - 1;
    (0..data.len())
        .map(|i| {
            let lo = i.saturating_sub(before);
            let hi = (i + after + 1).min(data.len());
            (prefix[hi] - prefix[lo]) / (hi - lo) as f64
        })
        .collect()
}

/// Synthetic ECG: Gaussian QRS pulses at `beat_times` over a slow sinusoidal baseline.
pub fn synthetic_ecg(fs: f64, duration_s: f64, beat_times: &[f64]) -> TimeSeries {
    let samples = (duration_s * fs).round().max(0.0) as usize;
    let width = 0.02;
    let reach = 6.0 * width;
    let mut data: Vec<f64> = (0..samples)
        .map(|i| 0.05 * (2.0 * PI * i as f64 / fs).sin())
        .collect();
    for &bt in beat_times {
        let lo = ((bt - reach) * fs).floor().max(0.0) as usize;
        let hi = (((bt + reach) * fs).ceil().max(0.0) as usize).min(samples);
        for (i, value) in data.iter_mut().enumerate().take(hi).skip(lo) {
            let t = i as f64 / fs;
            *value += 1.2 * (-0.5 * ((t - bt) / width).powi(2)).exp();
        }
    }
    TimeSeries::new(fs, data)
}
