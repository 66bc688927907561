// src/detection/error.rs
use thiserror::Error;

/// Construction-time validation failures. Nothing is allocated when one of these is returned.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("channel count must be greater than zero")]
    InvalidChannelCount,
    #[error("sample rate must be finite and greater than zero, got {0}")]
    InvalidSampleRate(f64),
    #[error("{name} must be greater than zero, got {value} ms")]
    NonPositiveDuration { name: &'static str, value: f64 },
    #[error("{name} must be zero or positive, got {value} ms")]
    NegativeDuration { name: &'static str, value: f64 },
    #[error("{name} must be finite, got {value} ms")]
    NonFiniteDuration { name: &'static str, value: f64 },
    #[error("{name} range inverted: min {min} > max {max}")]
    InvertedRange { name: &'static str, min: f64, max: f64 },
    #[error("minimum channels to trigger must be at least 1, got {0}")]
    InvalidTriggerCount(usize),
    #[error("queue capacity must be at least 1")]
    InvalidQueueCapacity,
    #[error("{name} band invalid: [{low}, {high}]")]
    InvalidBand {
        name: &'static str,
        low: f64,
        high: f64,
    },
    #[error("relative power threshold must be within [0, 1], got {0}")]
    InvalidThreshold(f64),
    #[error("relative increase must be finite and zero or positive, got {0}")]
    InvalidIncrease(f64),
    #[error("stage mismatch: screener {field} = {screener}, spectral {field} = {spectral}")]
    StageMismatch {
        field: &'static str,
        screener: f64,
        spectral: f64,
    },
}

/// Reasons an ingested item was dropped. Every variant leaves detector state untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum IngestError {
    #[error("channel count mismatch: expected {expected}, got {actual}")]
    ChannelMismatch { expected: usize, actual: usize },
    #[error("window has no channels")]
    EmptyWindow,
    #[error("channel index count {indices} does not match window channel count {channels}")]
    IndexMismatch { channels: usize, indices: usize },
    #[error("queue full, item dropped")]
    QueueFull,
    #[error("detector is not running")]
    NotRunning,
}

/// Faults raised while a worker is running or being torn down.
#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("non-finite sample on channel {channel}")]
    NonFiniteSample { channel: usize },
    #[error("worker panicked: {0}")]
    WorkerPanicked(String),
    #[error("{stage} worker did not exit within {waited_ms} ms")]
    StopTimeout { stage: &'static str, waited_ms: u64 },
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}
