use crate::result::{StepStatus, TerminationReason};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;

/// Coarse stages of a run, reported on failure as the last phase reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Launching browser sessions and observing start pages
    #[default]
    Launch,
    /// Running work units
    Explore,
    /// Ordering evidence from all units
    Stitch,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Launch => "launch",
            Phase::Explore => "explore",
            Phase::Stitch => "stitch",
        };
        f.write_str(name)
    }
}

/// Progress messages published while a run is in flight
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ExplorationEvent {
    PhaseStarted {
        phase: Phase,
    },
    PhaseCompleted {
        phase: Phase,
    },
    /// A work unit took a browser from the pool
    UnitStarted {
        unit: usize,
        url: String,
    },
    UnitCompleted {
        unit: usize,
        steps: usize,
        error: Option<String>,
    },
    StepStarted {
        step: usize,
        unit: usize,
        action: String,
    },
    StepCompleted {
        step: usize,
        unit: usize,
        status: StepStatus,
        coverage_gain: usize,
        new_state: bool,
    },
    ScreenshotCaptured {
        step: usize,
        bytes: usize,
    },
    /// First arrival at a fingerprint
    StateDiscovered {
        node: String,
        url: String,
        depth: usize,
    },
    ExplorationComplete {
        reason: TerminationReason,
        total_steps: usize,
        unique_states: usize,
        coverage_score: f64,
    },
}

/// Publishing side of the event stream. Sending never blocks, and a bus
/// without a consumer drops everything.
#[derive(Debug, Clone, Default)]
pub struct EventBus {
    tx: Option<mpsc::UnboundedSender<ExplorationEvent>>,
}

impl EventBus {
    pub fn new(tx: mpsc::UnboundedSender<ExplorationEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: ExplorationEvent) {
        if let Some(tx) = &self.tx {
            // A dropped receiver only means nobody is watching
            let _ = tx.send(event);
        }
    }
}

/// Creates a bus and the receiver a progress UI reads from
pub fn create_event_channel() -> (EventBus, mpsc::UnboundedReceiver<ExplorationEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventBus::new(tx), rx)
}
