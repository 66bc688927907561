// src/detection/mod.rs
pub mod buffer;
pub mod cascade;
pub mod config;
pub mod error;
pub mod events;
pub mod fft;
pub mod queue;
pub mod screener;
pub mod source;
pub mod spectral;
pub mod trigger;
pub mod worker;

pub use buffer::RingBuffer;
pub use cascade::SeizureCascade;
pub use config::{
    ms_to_samples, CascadeConfig, FrequencyBand, ScreenerConfig, ScreenerPlan, SpectralConfig,
};
pub use error::{ConfigError, DetectionError, IngestError};
pub use events::{
    CandidateBlock, ScreenerEvent, SpectralEvent, SpectralReport, Subscribers, TriggerMode,
    TriggerReport, WindowReport,
};
pub use fft::{band_power, PowerSpectrum, SpectrumBuilder};
pub use screener::{FrameIngestor, FrameOutcome, ScreenerCore, SeizureScreener};
pub use source::{Burst, FrameSource, ManualSource, SimulatedSource};
pub use spectral::{BandPowers, SpectralCore, SpectralDetector, WindowIngestor};
pub use trigger::{Baseline, BaselineState, TriggerPolicy};
