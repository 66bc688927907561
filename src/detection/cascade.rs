// src/detection/cascade.rs
use crossbeam_channel::Receiver;
use log::info;

use crate::detection::events::{ScreenerEvent, SpectralEvent};
use crate::detection::screener::SeizureScreener;
use crate::detection::source::FrameSource;
use crate::detection::spectral::SpectralDetector;
use crate::detection::{CascadeConfig, ConfigError, DetectionError, IngestError};

/// Stage1 screener feeding a Stage2 spectral detector.
pub struct SeizureCascade {
    screener: SeizureScreener,
    spectral: SpectralDetector,
}

impl SeizureCascade {
    pub fn new(config: CascadeConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            screener: SeizureScreener::new(config.screener)?,
            spectral: SpectralDetector::new(config.spectral)?,
        })
    }

    pub fn subscribe_screener(&mut self) -> Receiver<ScreenerEvent> {
        self.screener.subscribe()
    }

    pub fn subscribe_spectral(&mut self) -> Receiver<SpectralEvent> {
        self.spectral.subscribe()
    }

    pub fn screener(&self) -> &SeizureScreener {
        &self.screener
    }

    pub fn spectral(&self) -> &SpectralDetector {
        &self.spectral
    }

    pub fn is_running(&self) -> bool {
        self.screener.is_running()
    }

    /// Starts Stage2 first so Stage1 always has a live queue to emit into.
    pub fn start(&mut self) -> Result<(), DetectionError> {
        if self.screener.is_running() {
            return Ok(());
        }
        self.spectral.start()?;
        if let Some(ingestor) = self.spectral.ingestor() {
            self.screener.connect_stage2(ingestor);
        }
        if let Err(err) = self.screener.start() {
            self.spectral.stop().ok();
            return Err(err);
        }
        info!("cascade started");
        Ok(())
    }

    /// Stops Stage1 then Stage2. Both are stopped even if the first reports an error.
    pub fn stop(&mut self) -> Result<(), DetectionError> {
        let first = self.screener.stop();
        self.screener.disconnect_stage2();
        let second = self.spectral.stop();
        info!("cascade stopped");
        first.and(second)
    }

    pub fn ingest(&self, frame: &[f64]) -> Result<(), IngestError> {
        self.screener.ingest(frame)
    }

    /// Drains `source` into Stage1 and returns how many frames were accepted.
    pub fn pump<S: FrameSource>(&self, source: &mut S) -> usize {
        let mut accepted = 0;
        while let Some(frame) = source.next_frame() {
            if self.ingest(&frame).is_ok() {
                accepted += 1;
            }
        }
        accepted
    }
}
