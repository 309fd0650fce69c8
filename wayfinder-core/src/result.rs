use crate::action::Action;
use crate::budget::{BudgetStatus, ExhaustionReason};
use crate::coverage::{CoverageGain, CoverageStats};
use crate::decision::{DecisionStats, DecisionTier};
use crate::events::Phase;
use crate::fingerprint::StateFingerprint;
use crate::graph::GraphExport;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Failed,
    Skipped,
}

/// Why a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TerminationReason {
    /// A budget limit was reached.
    Budget { reason: ExhaustionReason },
    /// Every reachable branch ran out of pending actions.
    GraphExhausted,
    /// A blocking error aborted the run.
    Blocked { error: String },
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationReason::Budget { reason } => write!(f, "{}", reason),
            TerminationReason::GraphExhausted => f.write_str("graph_exhausted"),
            TerminationReason::Blocked { error } => write!(f, "blocked: {}", error),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Blocked,
}

/// One performed action and what it did to the page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub step_index: usize,
    pub unit: usize,
    pub depth: usize,
    pub action: Action,
    pub edge_key: String,
    pub tier: DecisionTier,
    pub confidence: u8,
    pub reason: String,
    pub url_before: String,
    pub url_after: Option<String>,
    pub before: StateFingerprint,
    pub after: Option<StateFingerprint>,
    pub from_node: String,
    pub to_node: Option<String>,
    pub new_state: bool,
    pub coverage_gain: CoverageGain,
    pub status: StepStatus,
    pub error: Option<String>,
    /// Raw screenshot bytes; kept in memory only.
    #[serde(skip)]
    pub screenshot: Option<Vec<u8>>,
}

/// A recorded non-blocking failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    pub step_index: usize,
    pub unit: usize,
    pub url: String,
    pub message: String,
    pub blocking: bool,
}

/// Terminal summary of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplorationResult {
    pub start_urls: Vec<String>,
    pub status: RunStatus,
    pub termination_reason: TerminationReason,
    pub last_phase: Phase,
    pub blocking_error: Option<String>,
    pub total_steps: usize,
    pub unique_states: usize,
    pub unique_urls: usize,
    /// Steps ordered by step index.
    pub steps: Vec<StepRecord>,
    pub errors: Vec<ErrorLogEntry>,
    pub coverage: CoverageStats,
    pub budget: BudgetStatus,
    pub decisions: DecisionStats,
    pub graph: GraphExport,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ExplorationResult {
    pub fn is_blocked(&self) -> bool {
        self.status == RunStatus::Blocked
    }

    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }

    pub fn successful_steps(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Success)
            .count()
    }

    pub fn screenshots(&self) -> impl Iterator<Item = (usize, &[u8])> {
        self.steps
            .iter()
            .filter_map(|s| s.screenshot.as_deref().map(|bytes| (s.step_index, bytes)))
    }
}
