// Budget accounting and termination policy

use crate::config::BudgetConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;
use tracing::info;

/// Why a run stopped. Variants are listed in priority order: when several
/// limits are hit at once, the first one wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionReason {
    ManualStop,
    MaxStepsReached,
    MaxStatesReached,
    Stagnation,
    MaxDepthReached,
    TimeLimit,
}

impl ExhaustionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExhaustionReason::ManualStop => "manual_stop",
            ExhaustionReason::MaxStepsReached => "max_steps_reached",
            ExhaustionReason::MaxStatesReached => "max_states_reached",
            ExhaustionReason::Stagnation => "stagnation",
            ExhaustionReason::MaxDepthReached => "max_depth_reached",
            ExhaustionReason::TimeLimit => "time_limit",
        }
    }
}

impl fmt::Display for ExhaustionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the counters, with the derived verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetStatus {
    pub steps_used: usize,
    pub unique_states: usize,
    pub current_depth: usize,
    pub steps_since_last_gain: usize,
    pub elapsed_ms: u64,
    pub can_continue: bool,
    pub exhaustion_reason: Option<ExhaustionReason>,
    /// Remaining share of the tightest resource, 0-100.
    pub remaining_percent: f64,
}

#[derive(Debug)]
pub struct BudgetTracker {
    config: BudgetConfig,
    steps_used: usize,
    unique_states: usize,
    current_depth: usize,
    steps_since_last_gain: usize,
    started: Instant,
    stop_reason: Option<String>,
}

impl BudgetTracker {
    pub fn new(config: BudgetConfig) -> Self {
        Self {
            config,
            steps_used: 0,
            unique_states: 0,
            current_depth: 0,
            steps_since_last_gain: 0,
            started: Instant::now(),
            stop_reason: None,
        }
    }

    pub fn config(&self) -> &BudgetConfig {
        &self.config
    }

    pub fn record_step(&mut self, had_gain: bool) {
        self.steps_used += 1;
        if had_gain {
            self.steps_since_last_gain = 0;
        } else {
            self.steps_since_last_gain += 1;
        }
    }

    pub fn set_depth(&mut self, depth: usize) {
        self.current_depth = depth;
    }

    /// Unique states only grow within a run.
    pub fn set_unique_states(&mut self, count: usize) {
        debug_assert!(
            count >= self.unique_states,
            "unique state count went backwards: {} -> {}",
            self.unique_states,
            count
        );
        self.unique_states = self.unique_states.max(count);
    }

    pub fn stop(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        info!(reason = %reason, "Exploration stopped manually");
        self.stop_reason = Some(reason);
    }

    pub fn stop_message(&self) -> Option<&str> {
        self.stop_reason.as_deref()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    pub fn can_continue(&self) -> bool {
        self.exhaustion_reason().is_none()
    }

    /// First triggered limit, evaluated against the current counters.
    pub fn exhaustion_reason(&self) -> Option<ExhaustionReason> {
        self.exhaustion_reason_at(self.elapsed_ms())
    }

    fn exhaustion_reason_at(&self, elapsed_ms: u64) -> Option<ExhaustionReason> {
        let c = &self.config;
        if self.stop_reason.is_some() {
            Some(ExhaustionReason::ManualStop)
        } else if self.steps_used >= c.max_total_steps {
            Some(ExhaustionReason::MaxStepsReached)
        } else if self.unique_states >= c.max_unique_states {
            Some(ExhaustionReason::MaxStatesReached)
        } else if self.steps_since_last_gain >= c.stagnation_threshold {
            Some(ExhaustionReason::Stagnation)
        } else if self.current_depth > c.max_depth {
            Some(ExhaustionReason::MaxDepthReached)
        } else if elapsed_ms >= c.time_limit_ms {
            Some(ExhaustionReason::TimeLimit)
        } else {
            None
        }
    }

    pub fn remaining_percent(&self) -> f64 {
        self.remaining_percent_at(self.elapsed_ms())
    }

    fn remaining_percent_at(&self, elapsed_ms: u64) -> f64 {
        let c = &self.config;
        let remaining = |used: f64, limit: f64| {
            if limit <= 0.0 {
                0.0
            } else {
                (1.0 - used / limit).clamp(0.0, 1.0)
            }
        };
        let ratios = [
            remaining(self.steps_used as f64, c.max_total_steps as f64),
            remaining(self.unique_states as f64, c.max_unique_states as f64),
            remaining(elapsed_ms as f64, c.time_limit_ms as f64),
            remaining(
                self.steps_since_last_gain as f64,
                c.stagnation_threshold as f64,
            ),
        ];
        ratios.into_iter().fold(1.0, f64::min) * 100.0
    }

    pub fn get_status(&self) -> BudgetStatus {
        let elapsed_ms = self.elapsed_ms();
        let exhaustion_reason = self.exhaustion_reason_at(elapsed_ms);
        BudgetStatus {
            steps_used: self.steps_used,
            unique_states: self.unique_states,
            current_depth: self.current_depth,
            steps_since_last_gain: self.steps_since_last_gain,
            elapsed_ms,
            can_continue: exhaustion_reason.is_none(),
            exhaustion_reason,
            remaining_percent: self.remaining_percent_at(elapsed_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BudgetConfig {
        BudgetConfig {
            max_total_steps: 10,
            max_unique_states: 10,
            max_depth: 3,
            stagnation_threshold: 4,
            time_limit_ms: 3_600_000,
        }
    }

    #[test]
    fn test_remaining_percent_tracks_tightest_resource() {
        let mut budget = BudgetTracker::new(config());
        // 2 of 10 steps but 2 of 4 stagnation steps
        budget.record_step(false);
        budget.record_step(false);
        let remaining = budget.remaining_percent();
        assert!((remaining - 50.0).abs() < 0.5, "got {}", remaining);
    }

    #[test]
    fn test_depth_triggers_only_beyond_limit() {
        let mut budget = BudgetTracker::new(config());
        budget.set_depth(3);
        assert!(budget.can_continue());
        budget.set_depth(4);
        assert_eq!(
            budget.exhaustion_reason(),
            Some(ExhaustionReason::MaxDepthReached)
        );
        budget.set_depth(2);
        assert!(budget.can_continue());
    }

    #[test]
    fn test_reason_display_is_snake_case() {
        assert_eq!(
            ExhaustionReason::MaxStepsReached.to_string(),
            "max_steps_reached"
        );
    }
}
