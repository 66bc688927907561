// src/lib.rs
//! Two-stage screening of a live multi-channel EEG stream for transient events.
//!
//! Stage1 ([`SeizureScreener`]) evaluates RMS and line length on a sliding
//! window and hands candidate blocks to Stage2 ([`SpectralDetector`]), which
//! confirms them through alpha relative band power. Each stage drains its own
//! bounded queue on a dedicated worker thread.
pub mod detection;

pub use detection::{
    CascadeConfig, ScreenerConfig, ScreenerEvent, SeizureCascade, SeizureScreener,
    SpectralConfig, SpectralDetector, SpectralEvent,
};
