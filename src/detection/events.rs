// src/detection/events.rs
use crossbeam_channel::{Receiver, Sender};
use serde::Serialize;

/// Fan-out list of event receivers. Publishing never blocks; closed receivers are skipped.
#[derive(Debug)]
pub struct Subscribers<E> {
    senders: Vec<Sender<E>>,
}

impl<E> Default for Subscribers<E> {
    fn default() -> Self {
        Self {
            senders: Vec::new(),
        }
    }
}

impl<E> Clone for Subscribers<E> {
    fn clone(&self) -> Self {
        Self {
            senders: self.senders.clone(),
        }
    }
}

impl<E: Clone> Subscribers<E> {
    pub fn subscribe(&mut self) -> Receiver<E> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.senders.push(tx);
        rx
    }

    pub fn publish(&self, event: E) {
        if let Some((last, rest)) = self.senders.split_last() {
            for tx in rest {
                tx.send(event.clone()).ok();
            }
            last.send(event).ok();
        }
    }
}

/// Stage1 metrics for one evaluated window.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WindowReport {
    pub window_start: u64,
    pub window_end: u64,
    pub rms: Vec<f64>,
    pub line_length: Vec<f64>,
    /// Channels whose RMS and line length both fell inside their ranges.
    pub passed_channels: Vec<usize>,
    pub passed: usize,
}

/// Candidate block handed from Stage1 to Stage2.
///
/// `window[k]` holds the samples of source channel `channel_indices[k]`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CandidateBlock {
    pub window: Vec<Vec<f64>>,
    pub channel_indices: Vec<usize>,
    pub start: u64,
    pub end: u64,
}

impl CandidateBlock {
    pub fn channels(&self) -> usize {
        self.window.len()
    }
}

/// Notifications published by the Stage1 screener, in evaluation order.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ScreenerEvent {
    Evaluated(WindowReport),
    /// One-shot per run; fires on the first window meeting the channel minimum.
    SeizureTriggered(WindowReport),
    CandidateEmitted {
        start: u64,
        end: u64,
        channels: Vec<usize>,
    },
    Fault {
        message: String,
    },
}

/// Stage2 band powers and relative ratios for one candidate block.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SpectralReport {
    pub window_start: u64,
    pub window_end: u64,
    pub channel_indices: Vec<usize>,
    pub delta_power: Vec<f64>,
    pub theta_power: Vec<f64>,
    pub alpha_power: Vec<f64>,
    pub beta_power: Vec<f64>,
    /// Alpha relative power per block channel.
    pub ratios: Vec<f64>,
    /// Ratios re-mapped onto the full channel space; `None` where the channel was not in the block.
    pub ratios_by_channel: Vec<Option<f64>>,
    pub passed: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerMode {
    ImmediateThreshold,
    RelativeIncrease,
}

/// A fired Stage2 trigger policy.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TriggerReport {
    pub mode: TriggerMode,
    pub window_start: u64,
    pub window_end: u64,
    /// Source channel numbers involved in the trigger.
    pub channels: Vec<usize>,
    pub current: Vec<f64>,
    /// Baseline ratios, paired with `channels`; relative-increase triggers only.
    pub previous: Option<Vec<f64>>,
}

/// Notifications published by the Stage2 detector, in evaluation order.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SpectralEvent {
    Evaluated(SpectralReport),
    Triggered(TriggerReport),
    Fault { message: String },
}
