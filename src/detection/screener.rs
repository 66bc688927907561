// src/detection/screener.rs
use std::time::Duration;

use log::{debug, info};

use crate::detection::buffer::RingBuffer;
use crate::detection::events::{CandidateBlock, ScreenerEvent, Subscribers, WindowReport};
use crate::detection::queue::{self, QueueProducer};
use crate::detection::spectral::WindowIngestor;
use crate::detection::worker::{QueueHandler, Worker, STOP_TIMEOUT};
use crate::detection::{ConfigError, DetectionError, IngestError, ScreenerConfig, ScreenerPlan};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Events and the optional Stage2 candidate produced by one frame.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrameOutcome {
    pub events: Vec<ScreenerEvent>,
    pub candidate: Option<CandidateBlock>,
}

/// Single-threaded Stage1 state: window and history rings plus the evaluation schedule.
pub struct ScreenerCore {
    config: ScreenerConfig,
    plan: ScreenerPlan,
    window: RingBuffer,
    history: RingBuffer,
    total_samples: u64,
    next_evaluation: u64,
    last_emission: Option<u64>,
    triggered: bool,
}

impl ScreenerCore {
    pub fn new(config: ScreenerConfig) -> Result<Self, ConfigError> {
        let plan = config.validate()?;
        Ok(Self::build(config, plan))
    }

    fn build(config: ScreenerConfig, plan: ScreenerPlan) -> Self {
        Self {
            window: RingBuffer::new(config.channel_count, plan.window_samples),
            history: RingBuffer::new(config.channel_count, plan.history_samples),
            total_samples: 0,
            next_evaluation: plan.first_evaluation(),
            last_emission: None,
            triggered: false,
            config,
            plan,
        }
    }

    pub fn plan(&self) -> &ScreenerPlan {
        &self.plan
    }

    pub fn total_samples(&self) -> u64 {
        self.total_samples
    }

    /// Whether the one-shot seizure trigger has fired since creation or reset.
    pub fn triggered(&self) -> bool {
        self.triggered
    }

    pub fn reset(&mut self) {
        self.window.reset();
        self.history.reset();
        self.total_samples = 0;
        self.next_evaluation = self.plan.first_evaluation();
        self.last_emission = None;
        self.triggered = false;
    }

    /// Feeds one frame. A frame of the wrong length is ignored without touching any state.
    pub fn process(&mut self, frame: &[f64]) -> FrameOutcome {
        if frame.len() != self.config.channel_count {
            return FrameOutcome::default();
        }
        let sample_index = self.total_samples;
        self.window.push(frame);
        self.history.push(frame);
        self.total_samples += 1;

        if self.triggered && self.config.stop_after_trigger {
            return FrameOutcome::default();
        }
        if sample_index < self.next_evaluation {
            return FrameOutcome::default();
        }

        let window_end = self.next_evaluation;
        let window_start = window_end + 1 - self.plan.window_samples as u64;
        let outcome = self.evaluate(window_start, window_end);
        self.next_evaluation += self.plan.step_samples as u64;
        outcome
    }

    fn evaluate(&mut self, window_start: u64, window_end: u64) -> FrameOutcome {
        let n = self.plan.window_samples;
        let channels = self.config.channel_count;
        let oldest = self.window.write_position() as isize;

        let mut rms = Vec::with_capacity(channels);
        let mut line_length = Vec::with_capacity(channels);
        let mut passed_channels = Vec::new();

        for ch in 0..channels {
            let mut prev = self.window.read(ch, oldest);
            let mut sum_sq = prev * prev;
            let mut sum_abs_diff = 0.0;
            for k in 1..n as isize {
                let x = self.window.read(ch, oldest + k);
                sum_sq += x * x;
                sum_abs_diff += (x - prev).abs();
                prev = x;
            }
            let r = (sum_sq / n as f64).sqrt();
            let l = sum_abs_diff / (n - 1) as f64;
            rms.push(r);
            line_length.push(l);

            let rms_ok = r >= self.config.rms_min && r <= self.config.rms_max;
            let ll_ok = l >= self.config.line_length_min && l <= self.config.line_length_max;
            if rms_ok && ll_ok {
                passed_channels.push(ch);
            }
        }

        let report = WindowReport {
            window_start,
            window_end,
            rms,
            line_length,
            passed: passed_channels.len(),
            passed_channels,
        };

        let mut outcome = FrameOutcome::default();
        let met = report.passed >= self.config.min_channels_to_trigger;
        if met {
            outcome.candidate = self.extract_candidate(window_end, &report.passed_channels);
        }
        let fire = met && !self.triggered;
        if fire {
            self.triggered = true;
            info!(
                "stage1 triggered at sample {window_end} on channels {:?}",
                report.passed_channels
            );
        }

        outcome.events.push(ScreenerEvent::Evaluated(report.clone()));
        if let Some(block) = &outcome.candidate {
            outcome.events.push(ScreenerEvent::CandidateEmitted {
                start: block.start,
                end: block.end,
                channels: block.channel_indices.clone(),
            });
        }
        if fire {
            outcome.events.push(ScreenerEvent::SeizureTriggered(report));
        }
        outcome
    }

    /// History slice of `channels` ending at `end`, or `None` when rate-limited or not yet available.
    fn extract_candidate(&mut self, end: u64, channels: &[usize]) -> Option<CandidateBlock> {
        if channels.is_empty() {
            return None;
        }
        if self.plan.min_interval_samples > 0 {
            if let Some(last) = self.last_emission {
                if (end as i64 - last as i64) < self.plan.min_interval_samples {
                    return None;
                }
            }
        }
        let n = self.plan.stage2_samples;
        let start = end as i64 - n as i64 + 1;
        if start < 0 {
            return None;
        }
        let age = self.total_samples as i64 - 1 - end as i64;
        if age < 0 || age as usize + n > self.history.len() {
            return None;
        }

        let window = channels
            .iter()
            .map(|&ch| self.history.copy_recent(ch, age as usize, n))
            .collect();
        self.last_emission = Some(end);
        Some(CandidateBlock {
            window,
            channel_indices: channels.to_vec(),
            start: start as u64,
            end,
        })
    }
}

struct ScreenerHandler {
    core: ScreenerCore,
    stage2: Option<WindowIngestor>,
    subscribers: Subscribers<ScreenerEvent>,
}

impl QueueHandler<Vec<f64>> for ScreenerHandler {
    fn handle(&mut self, frame: Vec<f64>) -> Result<(), DetectionError> {
        let outcome = self.core.process(&frame);
        if let (Some(block), Some(stage2)) = (outcome.candidate, &self.stage2) {
            let end = block.end;
            if let Err(err) = stage2.push_block(block) {
                debug!("stage2 candidate ending at {end} dropped: {err}");
            }
        }
        for event in outcome.events {
            self.subscribers.publish(event);
        }
        Ok(())
    }

    fn fault(&mut self, error: DetectionError) {
        self.subscribers.publish(ScreenerEvent::Fault {
            message: error.to_string(),
        });
    }
}

/// Producer handle for a running Stage1 queue. Clone it into any thread.
#[derive(Clone, Debug)]
pub struct FrameIngestor {
    channel_count: usize,
    producer: QueueProducer<Vec<f64>>,
}

impl FrameIngestor {
    pub fn ingest(&self, frame: &[f64]) -> Result<(), IngestError> {
        if frame.len() != self.channel_count {
            return Err(IngestError::ChannelMismatch {
                expected: self.channel_count,
                actual: frame.len(),
            });
        }
        self.producer.push(frame.to_vec())
    }
}

/// Stage1 amplitude/variability screener running on its own worker thread.
pub struct SeizureScreener {
    config: ScreenerConfig,
    plan: ScreenerPlan,
    subscribers: Subscribers<ScreenerEvent>,
    stage2: Option<WindowIngestor>,
    worker: Option<Worker<Vec<f64>>>,
}

impl SeizureScreener {
    pub fn new(config: ScreenerConfig) -> Result<Self, ConfigError> {
        let plan = config.validate()?;
        Ok(Self {
            config,
            plan,
            subscribers: Subscribers::default(),
            stage2: None,
            worker: None,
        })
    }

    /// Registers an event receiver. Receivers added while running see events from the next start.
    pub fn subscribe(&mut self) -> crossbeam_channel::Receiver<ScreenerEvent> {
        self.subscribers.subscribe()
    }

    /// Routes candidate blocks to a Stage2 queue from the next start on.
    pub fn connect_stage2(&mut self, ingestor: WindowIngestor) {
        self.stage2 = Some(ingestor);
    }

    pub fn disconnect_stage2(&mut self) {
        self.stage2 = None;
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Starts from empty buffers and a cleared trigger latch. No-op when already running.
    pub fn start(&mut self) -> Result<(), DetectionError> {
        if self.worker.is_some() {
            return Ok(());
        }
        let handler = ScreenerHandler {
            core: ScreenerCore::build(self.config.clone(), self.plan),
            stage2: self.stage2.clone(),
            subscribers: self.subscribers.clone(),
        };
        let (producer, consumer) = queue::bounded(self.config.queue_capacity);
        self.worker = Some(Worker::spawn(
            "stage1",
            producer,
            consumer,
            POLL_INTERVAL,
            handler,
        )?);
        info!(
            "stage1 started: window {} step {} warm-up {} stage2 {} samples",
            self.plan.window_samples,
            self.plan.step_samples,
            self.plan.warmup_samples,
            self.plan.stage2_samples
        );
        Ok(())
    }

    /// Cancels the worker and abandons queued frames. Safe to call when stopped.
    pub fn stop(&mut self) -> Result<(), DetectionError> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        debug!("stage1 stopping, {} frames dropped", worker.producer().dropped());
        let result = worker.stop(STOP_TIMEOUT);
        info!("stage1 stopped");
        result
    }

    pub fn ingestor(&self) -> Option<FrameIngestor> {
        self.worker.as_ref().map(|w| FrameIngestor {
            channel_count: self.config.channel_count,
            producer: w.producer().clone(),
        })
    }

    /// Queues one frame without blocking. Wrong-length frames and full queues are dropped.
    pub fn ingest(&self, frame: &[f64]) -> Result<(), IngestError> {
        if frame.len() != self.config.channel_count {
            return Err(IngestError::ChannelMismatch {
                expected: self.config.channel_count,
                actual: frame.len(),
            });
        }
        match &self.worker {
            Some(worker) => worker.producer().push(frame.to_vec()),
            None => Err(IngestError::NotRunning),
        }
    }

    pub fn accepted(&self) -> u64 {
        self.worker.as_ref().map_or(0, |w| w.producer().accepted())
    }

    pub fn dropped(&self) -> u64 {
        self.worker.as_ref().map_or(0, |w| w.producer().dropped())
    }
}

impl Drop for SeizureScreener {
    fn drop(&mut self) {
        self.stop().ok();
    }
}
