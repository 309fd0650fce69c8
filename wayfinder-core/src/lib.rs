pub mod action;
pub mod budget;
pub mod candidates;
pub mod config;
pub mod coverage;
pub mod decision;
pub mod error;
pub mod events;
pub mod executor;
pub mod explorer;
pub mod fingerprint;
pub mod graph;
pub mod heuristic;
pub mod interaction;
pub mod pool;
pub mod result;
pub mod retry;
pub mod scorer;

pub use action::{Action, ActionCandidate, ActionKind, ElementInfo};
pub use budget::{BudgetStatus, BudgetTracker, ExhaustionReason};
pub use config::{ExploreMode, ExplorerConfig};
pub use coverage::{CoverageGain, CoverageSnapshot, CoverageStats, CoverageTracker};
pub use decision::{Decision, DecisionEngine, DecisionTier};
pub use error::{ErrorClass, ExploreError, Result};
pub use events::{EventBus, ExplorationEvent, Phase, create_event_channel};
pub use executor::{Executor, run_exploration};
pub use fingerprint::{Fingerprinter, PageObservation, StateFingerprint};
pub use graph::{ExplorationGraph, GraphNode};
pub use result::{ExplorationResult, RunStatus, StepRecord, TerminationReason};
pub use scorer::ActionScorer;
