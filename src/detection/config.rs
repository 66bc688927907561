// src/detection/config.rs
use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::detection::ConfigError;

/// Milliseconds to whole samples, rounding half to even.
pub fn ms_to_samples(sample_rate_hz: f64, ms: f64) -> i64 {
    (sample_rate_hz * ms / 1000.0).round_ties_even() as i64
}

/// Stage1 screening parameters. Units: samples in microvolts, durations in ms.
///
/// Missing upper bounds default to infinity.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct ScreenerConfig {
    pub channel_count: usize,
    pub sample_rate_hz: f64,
    pub window_ms: f64,
    pub step_ms: f64,
    pub warmup_ms: f64,
    pub rms_min: f64,
    pub rms_max: f64,
    pub line_length_min: f64,
    pub line_length_max: f64,
    pub min_channels_to_trigger: usize,
    pub stop_after_trigger: bool,
    pub queue_capacity: usize,
    pub stage2_lookback_ms: f64,
    pub stage2_window_ms: f64,
    pub history_ms: f64,
    pub stage2_min_interval_ms: f64,
}

impl Default for ScreenerConfig {
    fn default() -> Self {
        Self {
            channel_count: 8,
            sample_rate_hz: 500.0,
            window_ms: 200.0,
            step_ms: 50.0,
            warmup_ms: 1000.0,
            rms_min: 80.0,
            rms_max: f64::INFINITY,
            line_length_min: 2000.0,
            line_length_max: f64::INFINITY,
            min_channels_to_trigger: 3,
            stop_after_trigger: false,
            queue_capacity: 5000,
            stage2_lookback_ms: 400.0,
            stage2_window_ms: 600.0,
            history_ms: 2000.0,
            stage2_min_interval_ms: 100.0,
        }
    }
}

/// Sample counts derived once from a validated [`ScreenerConfig`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScreenerPlan {
    pub window_samples: usize,
    pub step_samples: usize,
    pub warmup_samples: usize,
    pub stage2_samples: usize,
    pub history_samples: usize,
    pub min_interval_samples: i64,
}

impl ScreenerPlan {
    /// Sample index of the first evaluated window's last sample.
    pub fn first_evaluation(&self) -> u64 {
        (self.warmup_samples + self.window_samples - 1) as u64
    }
}

impl ScreenerConfig {
    pub fn validate(&self) -> Result<ScreenerPlan, ConfigError> {
        if self.channel_count == 0 {
            return Err(ConfigError::InvalidChannelCount);
        }
        sample_rate(self.sample_rate_hz)?;
        positive("window_ms", self.window_ms)?;
        positive("step_ms", self.step_ms)?;
        finite("warmup_ms", self.warmup_ms)?;
        if self.warmup_ms < 0.0 {
            return Err(ConfigError::NegativeDuration {
                name: "warmup_ms",
                value: self.warmup_ms,
            });
        }
        finite("stage2_lookback_ms", self.stage2_lookback_ms)?;
        finite("stage2_window_ms", self.stage2_window_ms)?;
        finite("history_ms", self.history_ms)?;
        finite("stage2_min_interval_ms", self.stage2_min_interval_ms)?;
        ordered("rms", self.rms_min, self.rms_max)?;
        ordered("line length", self.line_length_min, self.line_length_max)?;
        if self.min_channels_to_trigger < 1 {
            return Err(ConfigError::InvalidTriggerCount(self.min_channels_to_trigger));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::InvalidQueueCapacity);
        }

        let rate = self.sample_rate_hz;
        let window_samples = ms_to_samples(rate, self.window_ms).max(2) as usize;
        let step_samples = ms_to_samples(rate, self.step_ms).max(1) as usize;
        let warmup_samples = ms_to_samples(rate, self.warmup_ms).max(0) as usize;
        let lookback = ms_to_samples(rate, self.stage2_lookback_ms).max(0) as usize;
        let stage2_samples = (ms_to_samples(rate, self.stage2_window_ms).max(0) as usize)
            .max(window_samples + lookback);
        let history_samples = (ms_to_samples(rate, self.history_ms).max(0) as usize)
            .max(stage2_samples)
            .max(16);
        let min_interval_samples = if self.stage2_min_interval_ms > 0.0 {
            ms_to_samples(rate, self.stage2_min_interval_ms)
        } else {
            0
        };

        Ok(ScreenerPlan {
            window_samples,
            step_samples,
            warmup_samples,
            stage2_samples,
            history_samples,
            min_interval_samples,
        })
    }
}

/// Inclusive frequency range in Hz.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrequencyBand {
    pub low_hz: f64,
    pub high_hz: f64,
}

impl FrequencyBand {
    pub const fn new(low_hz: f64, high_hz: f64) -> Self {
        Self { low_hz, high_hz }
    }

    fn validate(&self, name: &'static str) -> Result<(), ConfigError> {
        let ok = self.low_hz >= 0.0 && self.high_hz.is_finite() && self.high_hz > self.low_hz;
        if ok {
            Ok(())
        } else {
            Err(ConfigError::InvalidBand {
                name,
                low: self.low_hz,
                high: self.high_hz,
            })
        }
    }
}

/// Stage2 spectral confirmation parameters.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct SpectralConfig {
    pub channel_count: usize,
    pub sample_rate_hz: f64,
    pub delta: FrequencyBand,
    pub theta: FrequencyBand,
    pub alpha: FrequencyBand,
    pub beta: FrequencyBand,
    /// alpha / (delta + theta + alpha + beta) needed for a channel to pass.
    pub relative_threshold: f64,
    pub min_channels_to_trigger: usize,
    pub relative_increase_enabled: bool,
    /// 0.20 means the next block must be 20% above the baseline.
    pub relative_increase: f64,
    pub queue_capacity: usize,
    pub stop_after_trigger: bool,
}

impl Default for SpectralConfig {
    fn default() -> Self {
        Self {
            channel_count: 8,
            sample_rate_hz: 500.0,
            delta: FrequencyBand::new(0.5, 4.0),
            theta: FrequencyBand::new(4.0, 8.0),
            alpha: FrequencyBand::new(8.0, 13.0),
            beta: FrequencyBand::new(13.0, 30.0),
            relative_threshold: 0.35,
            min_channels_to_trigger: 2,
            relative_increase_enabled: true,
            relative_increase: 0.20,
            queue_capacity: 32,
            stop_after_trigger: false,
        }
    }
}

impl SpectralConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channel_count == 0 {
            return Err(ConfigError::InvalidChannelCount);
        }
        sample_rate(self.sample_rate_hz)?;
        self.delta.validate("delta")?;
        self.theta.validate("theta")?;
        self.alpha.validate("alpha")?;
        self.beta.validate("beta")?;
        if !(0.0..=1.0).contains(&self.relative_threshold) {
            return Err(ConfigError::InvalidThreshold(self.relative_threshold));
        }
        if self.min_channels_to_trigger < 1 {
            return Err(ConfigError::InvalidTriggerCount(self.min_channels_to_trigger));
        }
        if !(self.relative_increase >= 0.0 && self.relative_increase.is_finite()) {
            return Err(ConfigError::InvalidIncrease(self.relative_increase));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::InvalidQueueCapacity);
        }
        Ok(())
    }
}

/// Both stages of the cascade, loadable from one JSON document.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct CascadeConfig {
    pub screener: ScreenerConfig,
    pub spectral: SpectralConfig,
}

impl CascadeConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.screener.validate()?;
        self.spectral.validate()?;
        if self.screener.channel_count != self.spectral.channel_count {
            return Err(ConfigError::StageMismatch {
                field: "channel_count",
                screener: self.screener.channel_count as f64,
                spectral: self.spectral.channel_count as f64,
            });
        }
        if self.screener.sample_rate_hz != self.spectral.sample_rate_hz {
            return Err(ConfigError::StageMismatch {
                field: "sample_rate_hz",
                screener: self.screener.sample_rate_hz,
                spectral: self.spectral.sample_rate_hz,
            });
        }
        Ok(())
    }
}

fn sample_rate(value: f64) -> Result<(), ConfigError> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::InvalidSampleRate(value))
    }
}

fn finite(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::NonFiniteDuration { name, value })
    }
}

fn positive(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::NonPositiveDuration { name, value })
    }
}

fn ordered(name: &'static str, min: f64, max: f64) -> Result<(), ConfigError> {
    if min <= max {
        Ok(())
    } else {
        Err(ConfigError::InvertedRange { name, min, max })
    }
}
