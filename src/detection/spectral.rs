// src/detection/spectral.rs
use std::time::Duration;

use log::{debug, info, warn};

use crate::detection::events::{
    CandidateBlock, SpectralEvent, SpectralReport, Subscribers, TriggerMode,
};
use crate::detection::fft::SpectrumBuilder;
use crate::detection::queue::{self, QueueProducer};
use crate::detection::trigger::{TriggerPolicy, RATIO_EPSILON};
use crate::detection::worker::{QueueHandler, Worker, STOP_TIMEOUT};
use crate::detection::{ConfigError, DetectionError, IngestError, SpectralConfig};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Channels shorter than this get zero band powers.
pub const MIN_SPECTRAL_SAMPLES: usize = 8;

/// Per-channel band powers for one block channel.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BandPowers {
    pub delta: f64,
    pub theta: f64,
    pub alpha: f64,
    pub beta: f64,
}

impl BandPowers {
    const NAN: Self = Self {
        delta: f64::NAN,
        theta: f64::NAN,
        alpha: f64::NAN,
        beta: f64::NAN,
    };

    /// alpha / (delta + theta + alpha + beta), zero when the total vanishes.
    pub fn relative_alpha(&self) -> f64 {
        let total = self.delta + self.theta + self.alpha + self.beta;
        if total <= RATIO_EPSILON {
            0.0
        } else {
            self.alpha / total
        }
    }
}

/// Single-threaded Stage2 state: spectral metrics plus the trigger policy.
pub struct SpectralCore {
    config: SpectralConfig,
    spectra: SpectrumBuilder,
    policy: TriggerPolicy,
    halted: bool,
}

impl SpectralCore {
    pub fn new(config: SpectralConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: SpectralConfig) -> Self {
        let policy = TriggerPolicy::new(
            config.channel_count,
            config.relative_threshold,
            config.min_channels_to_trigger,
            config.relative_increase_enabled,
            config.relative_increase,
        );
        Self {
            config,
            spectra: SpectrumBuilder::new(),
            policy,
            halted: false,
        }
    }

    pub fn reset(&mut self) {
        self.policy.reset();
        self.halted = false;
    }

    pub fn band_powers(&mut self, samples: &[f64]) -> BandPowers {
        if samples.len() < MIN_SPECTRAL_SAMPLES {
            return BandPowers::default();
        }
        let spectrum = self.spectra.compute(samples, self.config.sample_rate_hz);
        BandPowers {
            delta: spectrum.band_power(self.config.delta),
            theta: spectrum.band_power(self.config.theta),
            alpha: spectrum.band_power(self.config.alpha),
            beta: spectrum.band_power(self.config.beta),
        }
    }

    /// Evaluates one block and returns the events it produced, `Evaluated` first.
    ///
    /// A channel holding a non-finite sample gets NaN powers and ratio, so it never passes;
    /// the block is still evaluated and a `Fault` naming the channel follows the triggers.
    /// After a trigger with `stop_after_trigger` set, later blocks return nothing.
    pub fn process(&mut self, block: CandidateBlock) -> Vec<SpectralEvent> {
        if self.halted {
            return Vec::new();
        }
        if block.window.is_empty() || block.channel_indices.len() != block.window.len() {
            return Vec::new();
        }

        let mut faults = Vec::new();
        let m = block.channels();
        let mut report = SpectralReport {
            window_start: block.start,
            window_end: block.end,
            channel_indices: block.channel_indices.clone(),
            delta_power: Vec::with_capacity(m),
            theta_power: Vec::with_capacity(m),
            alpha_power: Vec::with_capacity(m),
            beta_power: Vec::with_capacity(m),
            ratios: Vec::with_capacity(m),
            ratios_by_channel: vec![None; self.config.channel_count],
            passed: 0,
        };

        for (&channel, samples) in block.channel_indices.iter().zip(&block.window) {
            let powers = if samples.iter().all(|x| x.is_finite()) {
                self.band_powers(samples)
            } else {
                faults.push(DetectionError::NonFiniteSample { channel });
                BandPowers::NAN
            };
            let ratio = powers.relative_alpha();
            report.delta_power.push(powers.delta);
            report.theta_power.push(powers.theta);
            report.alpha_power.push(powers.alpha);
            report.beta_power.push(powers.beta);
            report.ratios.push(ratio);
            if let Some(slot) = report.ratios_by_channel.get_mut(channel) {
                *slot = Some(ratio);
            }
            if ratio >= self.config.relative_threshold {
                report.passed += 1;
            }
        }

        let fired = self.policy.evaluate(
            &report.channel_indices,
            &report.ratios,
            report.passed,
            (block.start, block.end),
        );

        let mut events = Vec::with_capacity(1 + fired.len());
        events.push(SpectralEvent::Evaluated(report));
        for trigger in fired {
            match trigger.mode {
                TriggerMode::ImmediateThreshold => info!(
                    "stage2 threshold trigger on channels {:?} (block {}..={})",
                    trigger.channels, trigger.window_start, trigger.window_end
                ),
                TriggerMode::RelativeIncrease => info!(
                    "stage2 relative increase on channels {:?}: {:?} -> {:?}",
                    trigger.channels, trigger.previous, trigger.current
                ),
            }
            if self.config.stop_after_trigger {
                self.halted = true;
            }
            events.push(SpectralEvent::Triggered(trigger));
        }
        for fault in faults {
            warn!("stage2 block {}..={}: {fault}", block.start, block.end);
            events.push(SpectralEvent::Fault {
                message: fault.to_string(),
            });
        }
        events
    }
}

struct SpectralHandler {
    core: SpectralCore,
    subscribers: Subscribers<SpectralEvent>,
}

impl QueueHandler<CandidateBlock> for SpectralHandler {
    fn handle(&mut self, block: CandidateBlock) -> Result<(), DetectionError> {
        for event in self.core.process(block) {
            self.subscribers.publish(event);
        }
        Ok(())
    }

    fn fault(&mut self, error: DetectionError) {
        self.subscribers.publish(SpectralEvent::Fault {
            message: error.to_string(),
        });
    }
}

/// Producer handle for a running Stage2 queue. Clone it into any thread.
#[derive(Clone, Debug)]
pub struct WindowIngestor {
    producer: QueueProducer<CandidateBlock>,
}

impl WindowIngestor {
    pub fn ingest(
        &self,
        window: Vec<Vec<f64>>,
        channel_indices: Vec<usize>,
        start: u64,
        end: u64,
    ) -> Result<(), IngestError> {
        if window.is_empty() {
            return Err(IngestError::EmptyWindow);
        }
        if channel_indices.len() != window.len() {
            return Err(IngestError::IndexMismatch {
                channels: window.len(),
                indices: channel_indices.len(),
            });
        }
        self.producer.push(CandidateBlock {
            window,
            channel_indices,
            start,
            end,
        })
    }

    pub fn push_block(&self, block: CandidateBlock) -> Result<(), IngestError> {
        self.ingest(block.window, block.channel_indices, block.start, block.end)
    }
}

/// Stage2 spectral confirmation detector running on its own worker thread.
pub struct SpectralDetector {
    config: SpectralConfig,
    subscribers: Subscribers<SpectralEvent>,
    worker: Option<Worker<CandidateBlock>>,
}

impl SpectralDetector {
    pub fn new(config: SpectralConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            subscribers: Subscribers::default(),
            worker: None,
        })
    }

    /// Registers an event receiver. Receivers added while running see events from the next start.
    pub fn subscribe(&mut self) -> crossbeam_channel::Receiver<SpectralEvent> {
        self.subscribers.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Starts from a clean state. No-op when already running.
    pub fn start(&mut self) -> Result<(), DetectionError> {
        if self.worker.is_some() {
            return Ok(());
        }
        let core = SpectralCore::build(self.config.clone());
        let (producer, consumer) = queue::bounded(self.config.queue_capacity);
        let handler = SpectralHandler {
            core,
            subscribers: self.subscribers.clone(),
        };
        self.worker = Some(Worker::spawn(
            "stage2",
            producer,
            consumer,
            POLL_INTERVAL,
            handler,
        )?);
        info!("stage2 started ({} channels)", self.config.channel_count);
        Ok(())
    }

    /// Cancels the worker and abandons queued blocks. Safe to call when stopped.
    pub fn stop(&mut self) -> Result<(), DetectionError> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        debug!("stage2 stopping, {} blocks dropped", worker.producer().dropped());
        let result = worker.stop(STOP_TIMEOUT);
        info!("stage2 stopped");
        result
    }

    /// Handle for other producers (Stage1 among them); `None` when not running.
    pub fn ingestor(&self) -> Option<WindowIngestor> {
        self.worker.as_ref().map(|w| WindowIngestor {
            producer: w.producer().clone(),
        })
    }

    pub fn ingest(
        &self,
        window: Vec<Vec<f64>>,
        channel_indices: Vec<usize>,
        start: u64,
        end: u64,
    ) -> Result<(), IngestError> {
        match self.ingestor() {
            Some(ingestor) => ingestor.ingest(window, channel_indices, start, end),
            None => Err(IngestError::NotRunning),
        }
    }

    /// Treats `window[k]` as channel `k`.
    pub fn ingest_unindexed(
        &self,
        window: Vec<Vec<f64>>,
        start: u64,
        end: u64,
    ) -> Result<(), IngestError> {
        let indices = (0..window.len()).collect();
        self.ingest(window, indices, start, end)
    }

    pub fn accepted(&self) -> u64 {
        self.worker.as_ref().map_or(0, |w| w.producer().accepted())
    }

    pub fn dropped(&self) -> u64 {
        self.worker.as_ref().map_or(0, |w| w.producer().dropped())
    }
}

impl Drop for SpectralDetector {
    fn drop(&mut self) {
        self.stop().ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::trigger::BaselineState;
    use std::f64::consts::PI;

    const RATE: f64 = 500.0;

    fn tone(parts: &[(f64, f64)], len: usize) -> Vec<f64> {
        (0..len)
            .map(|i| {
                let t = i as f64 / RATE;
                parts
                    .iter()
                    .map(|&(freq, amp)| amp * (2.0 * PI * freq * t).sin())
                    .sum()
            })
            .collect()
    }

    fn block(window: Vec<Vec<f64>>, indices: Vec<usize>) -> CandidateBlock {
        CandidateBlock {
            window,
            channel_indices: indices,
            start: 0,
            end: 1999,
        }
    }

    fn core(min_channels: usize) -> SpectralCore {
        SpectralCore::new(SpectralConfig {
            min_channels_to_trigger: min_channels,
            ..SpectralConfig::default()
        })
        .unwrap()
    }

    fn triggers(events: &[SpectralEvent]) -> Vec<TriggerMode> {
        events
            .iter()
            .filter_map(|e| match e {
                SpectralEvent::Triggered(t) => Some(t.mode),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn pure_alpha_tone_ratio_approaches_one() {
        let mut core = core(1);
        let ratio = core.band_powers(&tone(&[(10.5, 40.0)], 2000)).relative_alpha();
        assert!(ratio > 0.99, "ratio {ratio}");
    }

    #[test]
    fn silent_or_short_channels_have_zero_ratio() {
        let mut core = core(1);
        assert_eq!(core.band_powers(&vec![0.0; 600]).relative_alpha(), 0.0);
        assert_eq!(core.band_powers(&[1.0, -1.0, 1.0]), BandPowers::default());
    }

    #[test]
    fn evaluated_report_maps_back_to_original_channels() {
        let mut core = core(2);
        let events = core
            .process(block(
                vec![tone(&[(10.5, 40.0)], 2000), tone(&[(2.0, 40.0)], 2000)],
                vec![5, 1],
            ));
        let SpectralEvent::Evaluated(report) = &events[0] else {
            panic!("expected evaluated first, got {:?}", events[0]);
        };
        assert_eq!(report.passed, 1);
        assert_eq!(report.ratios_by_channel.len(), 8);
        assert!(report.ratios_by_channel[5].unwrap() > 0.99);
        assert!(report.ratios_by_channel[1].unwrap() < 0.01);
        assert_eq!(report.ratios_by_channel[0], None);
        assert!(triggers(&events).is_empty());
    }

    #[test]
    fn relative_increase_confirms_on_next_block() {
        let mut core = core(1);
        // alpha plus strong theta keeps the ratio well under 1 / 1.2
        let mixed = tone(&[(10.5, 40.0), (6.0, 45.0)], 2000);
        let first = core.process(block(vec![mixed], vec![2]));
        assert_eq!(triggers(&first), vec![TriggerMode::ImmediateThreshold]);

        let pure = tone(&[(10.5, 40.0)], 2000);
        let second = core.process(block(vec![pure.clone()], vec![2]));
        assert_eq!(
            triggers(&second),
            vec![TriggerMode::RelativeIncrease, TriggerMode::ImmediateThreshold]
        );
        let SpectralEvent::Triggered(relative) = &second[1] else {
            panic!("expected trigger");
        };
        let previous = relative.previous.as_ref().unwrap()[0];
        assert!(relative.current[0] >= previous * 1.2);

        // no further increase possible from ~1.0
        let third = core.process(block(vec![pure], vec![2]));
        assert_eq!(triggers(&third), vec![TriggerMode::ImmediateThreshold]);
    }

    #[test]
    fn stop_after_trigger_halts_evaluation() {
        let mut core = SpectralCore::new(SpectralConfig {
            min_channels_to_trigger: 1,
            stop_after_trigger: true,
            ..SpectralConfig::default()
        })
        .unwrap();
        let pure = tone(&[(10.5, 40.0)], 2000);
        assert_eq!(core.process(block(vec![pure.clone()], vec![0])).len(), 2);
        assert!(core.process(block(vec![pure.clone()], vec![0])).is_empty());
        core.reset();
        assert_eq!(core.process(block(vec![pure], vec![0])).len(), 2);
    }

    #[test]
    fn non_finite_block_is_evaluated_and_spends_the_baseline() {
        let mut core = core(1);
        let mixed = tone(&[(10.5, 40.0), (6.0, 45.0)], 2000);
        let pure = tone(&[(10.5, 40.0)], 2000);
        let armed = core.process(block(vec![mixed], vec![2]));
        assert_eq!(triggers(&armed), vec![TriggerMode::ImmediateThreshold]);

        let mut broken = pure.clone();
        broken[10] = f64::NAN;
        let events = core.process(block(vec![broken, vec![0.0; 2000]], vec![2, 5]));
        let SpectralEvent::Evaluated(report) = &events[0] else {
            panic!("expected evaluated first, got {:?}", events[0]);
        };
        assert_eq!(report.passed, 0);
        assert!(report.ratios[0].is_nan());
        assert_eq!(report.ratios[1], 0.0);
        assert!(triggers(&events).is_empty());
        assert!(matches!(
            events.last(),
            Some(SpectralEvent::Fault { message }) if message.contains("channel 2")
        ));
        assert_eq!(core.policy.state(), &BaselineState::Idle);

        // would confirm against the first block if the opportunity were still pending
        let after = core.process(block(vec![pure], vec![2]));
        assert_eq!(triggers(&after), vec![TriggerMode::ImmediateThreshold]);
    }

    #[test]
    fn ingest_validates_shape_and_running_state() {
        let mut detector = SpectralDetector::new(SpectralConfig::default()).unwrap();
        assert_eq!(
            detector.ingest(vec![vec![0.0; 8]], vec![0], 0, 7),
            Err(IngestError::NotRunning)
        );
        detector.start().unwrap();
        assert_eq!(
            detector.ingest(Vec::new(), Vec::new(), 0, 0),
            Err(IngestError::EmptyWindow)
        );
        assert_eq!(
            detector.ingest(vec![vec![0.0; 8]], vec![0, 1], 0, 7),
            Err(IngestError::IndexMismatch {
                channels: 1,
                indices: 2
            })
        );
        detector.stop().unwrap();
    }

    #[test]
    fn worker_publishes_in_evaluation_order() {
        let mut detector = SpectralDetector::new(SpectralConfig {
            min_channels_to_trigger: 1,
            ..SpectralConfig::default()
        })
        .unwrap();
        let events = detector.subscribe();
        detector.start().unwrap();
        detector
            .ingest_unindexed(vec![tone(&[(10.5, 40.0)], 1000)], 0, 999)
            .unwrap();
        let first = events.recv_timeout(Duration::from_secs(5)).unwrap();
        let second = events.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(first, SpectralEvent::Evaluated(_)));
        assert!(matches!(
            second,
            SpectralEvent::Triggered(ref t) if t.mode == TriggerMode::ImmediateThreshold
        ));
        assert_eq!(detector.accepted(), 1);
        detector.stop().unwrap();
        assert!(!detector.is_running());
    }

    #[test]
    fn worker_reports_non_finite_channels_and_keeps_running() {
        let mut detector = SpectralDetector::new(SpectralConfig::default()).unwrap();
        let events = detector.subscribe();
        detector.start().unwrap();
        detector
            .ingest(vec![vec![f64::INFINITY; 16]], vec![0], 0, 15)
            .unwrap();
        detector.ingest(vec![vec![0.0; 16]], vec![0], 16, 31).unwrap();
        let received: Vec<SpectralEvent> = (0..3)
            .map(|_| events.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert!(matches!(received[0], SpectralEvent::Evaluated(ref r) if r.passed == 0));
        assert!(matches!(received[1], SpectralEvent::Fault { .. }));
        assert!(matches!(received[2], SpectralEvent::Evaluated(ref r) if r.window_start == 16));
        detector.stop().unwrap();
    }

    #[test]
    fn restart_clears_pending_baseline_and_replays() {
        let mut detector = SpectralDetector::new(SpectralConfig {
            min_channels_to_trigger: 1,
            ..SpectralConfig::default()
        })
        .unwrap();
        let events = detector.subscribe();
        let mixed = tone(&[(10.5, 40.0), (6.0, 45.0)], 2000);
        let pure = tone(&[(10.5, 40.0)], 2000);

        let run = |detector: &SpectralDetector| -> Vec<SpectralEvent> {
            detector.ingest(vec![mixed.clone()], vec![2], 0, 1999).unwrap();
            detector.ingest(vec![pure.clone()], vec![2], 2000, 3999).unwrap();
            // Evaluated + Immediate, then Evaluated + Relative + Immediate
            (0..5)
                .map(|_| events.recv_timeout(Duration::from_secs(5)).unwrap())
                .collect()
        };

        detector.start().unwrap();
        let first = run(&detector);
        // the last block re-armed the baseline; stopping must discard it
        detector.stop().unwrap();

        detector.start().unwrap();
        detector.ingest(vec![pure.clone()], vec![2], 0, 1999).unwrap();
        let fresh: Vec<SpectralEvent> = (0..2)
            .map(|_| events.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert!(matches!(
            fresh[1],
            SpectralEvent::Triggered(ref t) if t.mode == TriggerMode::ImmediateThreshold
        ));
        detector.stop().unwrap();

        detector.start().unwrap();
        let second = run(&detector);
        detector.stop().unwrap();

        assert_eq!(first, second);
        assert_eq!(
            triggers(&first[2..]),
            vec![TriggerMode::RelativeIncrease, TriggerMode::ImmediateThreshold]
        );
        assert!(events.try_recv().is_err());
    }
}
