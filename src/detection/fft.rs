// src/detection/fft.rs
use std::f64::consts::PI;

use rustfft::{num_complex::Complex64, FftPlanner};

use crate::detection::FrequencyBand;

/// Smallest transform length; shorter signals are zero-padded up to it.
pub const MIN_FFT_SIZE: usize = 64;

/// Power spectrum of one channel, bins `0..=fft_size / 2`.
#[derive(Clone, Debug)]
pub struct PowerSpectrum {
    pub sample_rate_hz: f64,
    pub fft_size: usize,
    pub power: Vec<f64>, // |X[k]|^2
}

impl PowerSpectrum {
    /// Sum of `|X[k]|^2` for `k` in `[floor(low*N/fs), ceil(high*N/fs)]`, clamped to `[0, N/2]`.
    pub fn band_power(&self, band: FrequencyBand) -> f64 {
        let n = self.fft_size as f64;
        let k_max = (self.fft_size / 2) as i64;
        let k1 = ((band.low_hz * n / self.sample_rate_hz).floor() as i64).max(0);
        let k2 = ((band.high_hz * n / self.sample_rate_hz).ceil() as i64).min(k_max);
        if k2 < k1 {
            return 0.0;
        }
        self.power[k1 as usize..=k2 as usize].iter().sum()
    }
}

/// Builds Hann-tapered, zero-padded power spectra. Holds a planner so repeated sizes reuse plans.
pub struct SpectrumBuilder {
    planner: FftPlanner<f64>,
}

impl Default for SpectrumBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SpectrumBuilder {
    pub fn new() -> Self {
        Self {
            planner: FftPlanner::new(),
        }
    }

    /// Transform length used for `len` samples: next power of two, at least [`MIN_FFT_SIZE`].
    pub fn fft_size(len: usize) -> usize {
        len.next_power_of_two().max(MIN_FFT_SIZE)
    }

    pub fn compute(&mut self, samples: &[f64], sample_rate_hz: f64) -> PowerSpectrum {
        let fft_size = Self::fft_size(samples.len());
        let mut buffer = vec![Complex64::new(0.0, 0.0); fft_size];

        let n = samples.len();
        if n > 0 {
            let mean = samples.iter().sum::<f64>() / n as f64;
            if n == 1 {
                buffer[0] = Complex64::new(samples[0] - mean, 0.0);
            } else {
                let span = (n - 1) as f64;
                for (i, (slot, &x)) in buffer.iter_mut().zip(samples).enumerate() {
                    let w = 0.5 - 0.5 * (2.0 * PI * i as f64 / span).cos();
                    *slot = Complex64::new((x - mean) * w, 0.0);
                }
            }
        }

        let fft = self.planner.plan_fft_forward(fft_size);
        fft.process(&mut buffer);

        PowerSpectrum {
            sample_rate_hz,
            fft_size,
            power: buffer
                .iter()
                .take(fft_size / 2 + 1)
                .map(|c| c.norm_sqr())
                .collect(),
        }
    }
}

/// One-off band power of a single channel.
pub fn band_power(samples: &[f64], low_hz: f64, high_hz: f64, sample_rate_hz: f64) -> f64 {
    SpectrumBuilder::new()
        .compute(samples, sample_rate_hz)
        .band_power(FrequencyBand::new(low_hz, high_hz))
}
