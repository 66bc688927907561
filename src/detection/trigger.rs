// src/detection/trigger.rs
use std::collections::HashMap;
use std::mem;

use crate::detection::events::{TriggerMode, TriggerReport};

/// Ratios at or below this are treated as zero when used as a baseline.
pub const RATIO_EPSILON: f64 = 1e-12;

/// Channels and ratios captured when the immediate-threshold policy fired.
#[derive(Clone, Debug, PartialEq)]
pub struct Baseline {
    pub channels: Vec<usize>,
    pub ratios: Vec<f64>,
}

/// Relative-increase opportunity: armed by an immediate trigger, consumed by the next block.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum BaselineState {
    #[default]
    Idle,
    PendingConfirmation(Baseline),
}

/// Both Stage2 trigger policies. Owned by the Stage2 worker thread only.
#[derive(Clone, Debug)]
pub struct TriggerPolicy {
    channel_count: usize,
    threshold: f64,
    min_channels: usize,
    increase_enabled: bool,
    increase: f64,
    state: BaselineState,
}

impl TriggerPolicy {
    pub fn new(
        channel_count: usize,
        threshold: f64,
        min_channels: usize,
        increase_enabled: bool,
        increase: f64,
    ) -> Self {
        Self {
            channel_count,
            threshold,
            min_channels,
            increase_enabled,
            increase,
            state: BaselineState::Idle,
        }
    }

    pub fn state(&self) -> &BaselineState {
        &self.state
    }

    pub fn reset(&mut self) {
        self.state = BaselineState::Idle;
    }

    /// Applies relative-increase then immediate-threshold to one block.
    ///
    /// `indices[k]` is the source channel of `ratios[k]`. Returns fired triggers in that order.
    pub fn evaluate(
        &mut self,
        indices: &[usize],
        ratios: &[f64],
        passed: usize,
        window: (u64, u64),
    ) -> Vec<TriggerReport> {
        let mut fired = Vec::new();

        // the pending opportunity is spent on this block whatever the outcome
        if let BaselineState::PendingConfirmation(baseline) =
            mem::take(&mut self.state)
        {
            if self.increase_enabled {
                if let Some(current) = self.confirm(&baseline, indices, ratios) {
                    fired.push(TriggerReport {
                        mode: TriggerMode::RelativeIncrease,
                        window_start: window.0,
                        window_end: window.1,
                        channels: baseline.channels.clone(),
                        current,
                        previous: Some(baseline.ratios),
                    });
                }
            }
        }

        if passed >= self.min_channels {
            let baseline = self.capture(indices, ratios);
            fired.push(TriggerReport {
                mode: TriggerMode::ImmediateThreshold,
                window_start: window.0,
                window_end: window.1,
                channels: baseline.channels.clone(),
                current: baseline.ratios.clone(),
                previous: None,
            });
            if self.increase_enabled {
                self.state = BaselineState::PendingConfirmation(baseline);
            }
        }

        fired
    }

    fn capture(&self, indices: &[usize], ratios: &[f64]) -> Baseline {
        let (channels, ratios) = indices
            .iter()
            .zip(ratios)
            .filter(|&(&ch, &ratio)| ratio >= self.threshold && ch < self.channel_count)
            .map(|(&ch, &ratio)| (ch, ratio))
            .unzip();
        Baseline { channels, ratios }
    }

    /// Current ratios of every baseline channel, or `None` if any is missing or not high enough.
    fn confirm(&self, baseline: &Baseline, indices: &[usize], ratios: &[f64]) -> Option<Vec<f64>> {
        if baseline.channels.is_empty() || baseline.channels.len() != baseline.ratios.len() {
            return None;
        }
        let current: HashMap<usize, f64> = indices
            .iter()
            .zip(ratios)
            .filter(|&(&ch, _)| ch < self.channel_count)
            .map(|(&ch, &ratio)| (ch, ratio))
            .collect();
        let factor = 1.0 + self.increase;
        baseline
            .channels
            .iter()
            .zip(&baseline.ratios)
            .map(|(ch, &previous)| {
                let now = *current.get(ch)?;
                (previous > RATIO_EPSILON && now >= previous * factor).then_some(now)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(min_channels: usize) -> TriggerPolicy {
        TriggerPolicy::new(8, 0.35, min_channels, true, 0.20)
    }

    #[test]
    fn immediate_then_relative_increase() {
        let mut p = policy(1);
        let first = p.evaluate(&[1, 2], &[0.10, 0.40], 1, (0, 299));
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].mode, TriggerMode::ImmediateThreshold);
        assert_eq!(first[0].channels, vec![2]);
        assert_eq!(first[0].current, vec![0.40]);
        assert_eq!(
            p.state(),
            &BaselineState::PendingConfirmation(Baseline {
                channels: vec![2],
                ratios: vec![0.40],
            })
        );

        let second = p.evaluate(&[2], &[0.50], 1, (25, 324));
        assert_eq!(second.len(), 2);
        assert_eq!(second[0].mode, TriggerMode::RelativeIncrease);
        assert_eq!(second[0].channels, vec![2]);
        assert_eq!(second[0].previous, Some(vec![0.40]));
        assert_eq!(second[0].current, vec![0.50]);
        // same block re-arms through the immediate policy
        assert_eq!(second[1].mode, TriggerMode::ImmediateThreshold);
        assert!(matches!(p.state(), BaselineState::PendingConfirmation(_)));
    }

    #[test]
    fn opportunity_is_consumed_on_failure() {
        let mut p = policy(2);
        assert_eq!(p.evaluate(&[0, 1], &[0.5, 0.6], 2, (0, 1)).len(), 1);
        // 0.55 < 0.5 * 1.2; nothing fires and the baseline is gone
        assert!(p.evaluate(&[0, 1], &[0.55, 0.9], 1, (1, 2)).is_empty());
        assert_eq!(p.state(), &BaselineState::Idle);
        assert!(p.evaluate(&[0, 1], &[0.9, 0.9], 1, (2, 3)).is_empty());
    }

    #[test]
    fn missing_baseline_channel_fails_the_check() {
        let mut p = policy(1);
        p.evaluate(&[3, 4], &[0.4, 0.4], 2, (0, 1));
        let next = p.evaluate(&[3], &[0.9], 0, (1, 2));
        assert!(next.is_empty());
        assert_eq!(p.state(), &BaselineState::Idle);
    }

    #[test]
    fn exact_increase_boundary_passes() {
        let mut p = TriggerPolicy::new(4, 0.25, 1, true, 1.0);
        p.evaluate(&[0], &[0.25], 1, (0, 1));
        let next = p.evaluate(&[0], &[0.5], 0, (1, 2));
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].mode, TriggerMode::RelativeIncrease);
    }

    #[test]
    fn zero_baseline_never_confirms() {
        let mut p = TriggerPolicy::new(4, 0.0, 1, true, 0.2);
        p.evaluate(&[0], &[0.0], 1, (0, 1));
        let next = p.evaluate(&[0], &[0.3], 0, (1, 2));
        assert!(next.is_empty());
    }

    #[test]
    fn disabled_policy_never_arms() {
        let mut p = TriggerPolicy::new(8, 0.35, 1, false, 0.2);
        assert_eq!(p.evaluate(&[0], &[0.4], 1, (0, 1)).len(), 1);
        assert_eq!(p.state(), &BaselineState::Idle);
        let next = p.evaluate(&[0], &[0.9], 1, (1, 2));
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].mode, TriggerMode::ImmediateThreshold);
    }

    #[test]
    fn out_of_range_channels_are_left_out_of_the_baseline() {
        let mut p = policy(1);
        let fired = p.evaluate(&[9, 1], &[0.8, 0.5], 2, (0, 1));
        assert_eq!(fired[0].channels, vec![1]);
    }
}
