// Tests for budget accounting

use wayfinder_core::budget::{BudgetTracker, ExhaustionReason};
use wayfinder_core::config::BudgetConfig;

fn tight() -> BudgetConfig {
    BudgetConfig {
        max_total_steps: 3,
        max_unique_states: 5,
        max_depth: 2,
        stagnation_threshold: 3,
        time_limit_ms: 3_600_000,
    }
}

// ============================================================================
// Counter Tests
// ============================================================================

#[test]
fn test_fresh_budget_can_continue() {
    let budget = BudgetTracker::new(BudgetConfig::default());
    let status = budget.get_status();

    assert!(status.can_continue);
    assert_eq!(status.steps_used, 0);
    assert_eq!(status.exhaustion_reason, None);
    assert!(status.remaining_percent > 99.0);
}

#[test]
fn test_gain_resets_stagnation_counter() {
    let mut budget = BudgetTracker::new(BudgetConfig::default());
    budget.record_step(false);
    budget.record_step(false);
    assert_eq!(budget.get_status().steps_since_last_gain, 2);

    budget.record_step(true);
    let status = budget.get_status();
    assert_eq!(status.steps_since_last_gain, 0);
    assert_eq!(status.steps_used, 3);
}

#[test]
fn test_unique_states_never_decrease() {
    let mut budget = BudgetTracker::new(BudgetConfig::default());
    budget.set_unique_states(4);
    budget.set_unique_states(4);
    assert_eq!(budget.get_status().unique_states, 4);
}

// ============================================================================
// Exhaustion Tests
// ============================================================================

#[test]
fn test_step_limit_exhausts() {
    let mut budget = BudgetTracker::new(tight());
    for _ in 0..3 {
        assert!(budget.can_continue());
        budget.record_step(true);
    }
    assert!(!budget.can_continue());
    assert_eq!(
        budget.exhaustion_reason(),
        Some(ExhaustionReason::MaxStepsReached)
    );
}

#[test]
fn test_stagnation_exhausts() {
    let mut budget = BudgetTracker::new(BudgetConfig {
        max_total_steps: 100,
        ..tight()
    });
    budget.record_step(false);
    budget.record_step(false);
    assert!(budget.can_continue());
    budget.record_step(false);
    assert_eq!(
        budget.exhaustion_reason(),
        Some(ExhaustionReason::Stagnation)
    );
}

#[test]
fn test_state_limit_exhausts() {
    let mut budget = BudgetTracker::new(tight());
    budget.set_unique_states(5);
    assert_eq!(
        budget.exhaustion_reason(),
        Some(ExhaustionReason::MaxStatesReached)
    );
}

#[test]
fn test_step_limit_wins_over_other_limits() {
    let mut budget = BudgetTracker::new(tight());
    // Steps, stagnation, states and depth all trip together
    for _ in 0..3 {
        budget.record_step(false);
    }
    budget.set_unique_states(5);
    budget.set_depth(3);

    assert_eq!(
        budget.get_status().exhaustion_reason,
        Some(ExhaustionReason::MaxStepsReached)
    );
}

#[test]
fn test_zero_time_limit_exhausts_immediately() {
    let budget = BudgetTracker::new(BudgetConfig {
        time_limit_ms: 0,
        ..BudgetConfig::default()
    });
    assert_eq!(budget.exhaustion_reason(), Some(ExhaustionReason::TimeLimit));
    assert_eq!(budget.remaining_percent(), 0.0);
}

#[test]
fn test_manual_stop_takes_priority() {
    let mut budget = BudgetTracker::new(tight());
    for _ in 0..3 {
        budget.record_step(true);
    }
    budget.stop("operator requested");

    let status = budget.get_status();
    assert!(!status.can_continue);
    assert_eq!(status.exhaustion_reason, Some(ExhaustionReason::ManualStop));
    assert_eq!(budget.stop_message(), Some("operator requested"));
}

#[test]
fn test_reason_serializes_as_snake_case() {
    let json = serde_json::to_string(&ExhaustionReason::TimeLimit).unwrap();
    assert_eq!(json, "\"time_limit\"");
}
