//! Concurrent execution of work units over a pool of browser sessions.
//!
//! A run goes through three phases. Launch validates the configuration and,
//! in branches mode, observes each start page to enumerate its outgoing
//! actions. Explore runs every work unit on its own task, bounded by the
//! pool size, all sharing one graph, coverage tracker, budget and scorer.
//! Stitch orders the evidence from every unit by step index and builds the
//! final [`ExplorationResult`].

use crate::budget::BudgetTracker;
use crate::config::{ExploreMode, ExplorerConfig};
use crate::coverage::CoverageTracker;
use crate::decision::DecisionEngine;
use crate::error::{ExploreError, Result};
use crate::events::{EventBus, ExplorationEvent, Phase};
use crate::explorer::UnitExplorer;
use crate::fingerprint::Fingerprinter;
use crate::graph::ExplorationGraph;
use crate::interaction::InputValueResolver;
use crate::pool::BrowserPool;
use crate::result::{ErrorLogEntry, ExplorationResult, RunStatus, StepRecord, TerminationReason};
use crate::scorer::{ActionScorer, ScoringContext};
use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use wayfinder_driver::{BrowserFactory, Decider};

/// State every unit reads and writes. Guarded by one lock so a step's
/// graph, coverage, budget and scorer updates land together.
pub(crate) struct CoreState {
    pub graph: ExplorationGraph,
    pub coverage: CoverageTracker,
    pub budget: BudgetTracker,
    pub scorer: ActionScorer,
}

pub(crate) struct RunContext {
    pub config: ExplorerConfig,
    pub fingerprinter: Fingerprinter,
    pub engine: DecisionEngine,
    pub inputs: InputValueResolver,
    pub events: EventBus,
    pub state: Mutex<CoreState>,
    pub steps: Mutex<Vec<StepRecord>>,
    pub errors: Mutex<Vec<ErrorLogEntry>>,
    pub step_counter: AtomicUsize,
    /// First blocking error and the phase it happened in.
    pub blocked: Mutex<Option<(Phase, String)>>,
    pub phase: Mutex<Phase>,
    pub cancel: CancellationToken,
}

impl RunContext {
    async fn enter_phase(&self, phase: Phase) {
        *self.phase.lock().await = phase;
        self.events.emit(ExplorationEvent::PhaseStarted { phase });
    }

    /// Logs a unit-level failure. A blocking error cancels every unit and
    /// returns true.
    async fn record_failure(&self, unit: usize, url: &str, error: &ExploreError) -> bool {
        let blocking = error.is_blocking(self.config.executor.strict_mode);
        let message = error.to_string();
        self.errors.lock().await.push(ErrorLogEntry {
            step_index: self.step_counter.load(Ordering::SeqCst),
            unit,
            url: url.to_string(),
            message: message.clone(),
            blocking,
        });

        if blocking {
            error!("[Unit {}] Blocking error, stopping run: {}", unit, message);
            let phase = *self.phase.lock().await;
            let mut blocked = self.blocked.lock().await;
            if blocked.is_none() {
                *blocked = Some((phase, message));
            }
            self.cancel.cancel();
        } else {
            warn!("[Unit {}] Unit failed for {}: {}", unit, url, message);
        }
        blocking
    }
}

/// What one task explores.
#[derive(Debug, Clone)]
enum WorkUnit {
    Page {
        url: String,
    },
    Branch {
        root_url: String,
        root_id: String,
        edge_key: String,
    },
}

impl WorkUnit {
    fn url(&self) -> &str {
        match self {
            WorkUnit::Page { url } => url,
            WorkUnit::Branch { root_url, .. } => root_url,
        }
    }
}

/// Runs explorations. Reusable; every call to [`Executor::run`] starts from
/// an empty graph.
pub struct Executor {
    config: ExplorerConfig,
    factory: Arc<dyn BrowserFactory>,
    decider: Option<Arc<dyn Decider>>,
    events: EventBus,
}

impl Executor {
    pub fn new(config: ExplorerConfig, factory: Arc<dyn BrowserFactory>) -> Self {
        Self {
            config,
            factory,
            decider: None,
            events: EventBus::disabled(),
        }
    }

    pub fn with_decider(mut self, decider: Arc<dyn Decider>) -> Self {
        self.decider = Some(decider);
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn config(&self) -> &ExplorerConfig {
        &self.config
    }

    /// Explores from `start_urls` until the budget runs out, every branch
    /// is exhausted, or a blocking error stops the run. Only configuration
    /// problems are returned as errors; everything else ends up in the
    /// result.
    pub async fn run(&self, start_urls: &[String]) -> Result<ExplorationResult> {
        self.config.validate()?;
        let Some(first_url) = start_urls.first() else {
            return Err(ExploreError::Config(
                "at least one start URL is required".to_string(),
            ));
        };

        let started_at = Utc::now();
        info!(
            "Starting exploration of {} start URL(s) with {} browser(s)",
            start_urls.len(),
            self.config.executor.parallel_browsers
        );

        let ctx = Arc::new(self.build_context(first_url));
        let pool = Arc::new(BrowserPool::new(
            self.factory.clone(),
            self.config.executor.parallel_browsers,
            (
                self.config.executor.viewport_width,
                self.config.executor.viewport_height,
            ),
        ));

        ctx.enter_phase(Phase::Launch).await;
        let units = match self.config.executor.mode {
            ExploreMode::Pages => start_urls
                .iter()
                .map(|url| WorkUnit::Page { url: url.clone() })
                .collect(),
            ExploreMode::Branches => plan_branches(&ctx, &pool, start_urls).await,
        };
        ctx.events.emit(ExplorationEvent::PhaseCompleted {
            phase: Phase::Launch,
        });

        if !ctx.cancel.is_cancelled() {
            ctx.enter_phase(Phase::Explore).await;
            debug!("Scheduling {} work unit(s)", units.len());

            let mut handles = Vec::new();
            for (unit, work) in units.into_iter().enumerate() {
                let ctx = ctx.clone();
                let pool = pool.clone();
                handles.push(tokio::spawn(async move {
                    run_unit(ctx, pool, unit, work).await;
                }));
            }
            for joined in join_all(handles).await {
                if let Err(e) = joined {
                    let e = ExploreError::from(e);
                    ctx.record_failure(usize::MAX, "", &e).await;
                }
            }
            ctx.events.emit(ExplorationEvent::PhaseCompleted {
                phase: Phase::Explore,
            });
        }

        if !ctx.cancel.is_cancelled() {
            ctx.enter_phase(Phase::Stitch).await;
        }
        let result = stitch(&ctx, start_urls, started_at).await;
        if result.status == RunStatus::Completed {
            ctx.events.emit(ExplorationEvent::PhaseCompleted {
                phase: Phase::Stitch,
            });
        }
        ctx.events.emit(ExplorationEvent::ExplorationComplete {
            reason: result.termination_reason.clone(),
            total_steps: result.total_steps,
            unique_states: result.unique_states,
            coverage_score: result.coverage.score,
        });
        pool.shutdown().await;

        info!(
            "Exploration finished ({}): {} steps, {} states, {} URLs",
            result.termination_reason, result.total_steps, result.unique_states, result.unique_urls
        );
        Ok(result)
    }

    fn build_context(&self, first_url: &str) -> RunContext {
        let mut scorer = ActionScorer::new(self.config.scorer.clone());
        scorer.derive_base_domain(first_url);

        let mut engine =
            DecisionEngine::new(self.config.decision.clone(), self.config.heuristics.clone());
        let mut inputs = InputValueResolver::new();
        if let Some(decider) = &self.decider {
            engine = engine.with_decider(decider.clone());
            if self.config.decision.use_ai_for_inputs {
                inputs = InputValueResolver::with_decider(
                    decider.clone(),
                    Duration::from_millis(self.config.decision.ai_timeout_ms),
                );
            }
        }

        RunContext {
            config: self.config.clone(),
            fingerprinter: Fingerprinter::new(self.config.fingerprint.clone()),
            engine,
            inputs,
            events: self.events.clone(),
            state: Mutex::new(CoreState {
                graph: ExplorationGraph::new(self.config.executor.max_edge_attempts),
                coverage: CoverageTracker::new(),
                budget: BudgetTracker::new(self.config.budget.clone()),
                scorer,
            }),
            steps: Mutex::new(Vec::new()),
            errors: Mutex::new(Vec::new()),
            step_counter: AtomicUsize::new(0),
            blocked: Mutex::new(None),
            phase: Mutex::new(Phase::Launch),
            cancel: CancellationToken::new(),
        }
    }
}

/// Convenience wrapper around [`Executor`].
pub async fn run_exploration(
    config: ExplorerConfig,
    factory: Arc<dyn BrowserFactory>,
    decider: Option<Arc<dyn Decider>>,
    start_urls: &[String],
) -> Result<ExplorationResult> {
    let mut executor = Executor::new(config, factory);
    if let Some(decider) = decider {
        executor = executor.with_decider(decider);
    }
    executor.run(start_urls).await
}

/// Observes each start page once and turns its performable actions into
/// branch units, best first.
async fn plan_branches(
    ctx: &RunContext,
    pool: &BrowserPool,
    start_urls: &[String],
) -> Vec<WorkUnit> {
    let mut units = Vec::new();

    for (index, url) in start_urls.iter().enumerate() {
        if ctx.cancel.is_cancelled() {
            break;
        }
        let mut browser = match pool.acquire().await {
            Ok(browser) => browser,
            Err(e) => {
                ctx.record_failure(index, url, &e).await;
                continue;
            }
        };

        let surveyed = UnitExplorer::new(index, ctx, browser.browser(), url.as_str())
            .survey()
            .await;
        let root_id = match surveyed {
            Ok(root_id) => root_id,
            Err(e) => {
                if ctx.record_failure(index, url, &e).await {
                    browser.mark_broken();
                }
                continue;
            }
        };

        let state = ctx.state.lock().await;
        let pending: Vec<_> = state
            .graph
            .get_pending_edges(&root_id)
            .into_iter()
            .map(|e| e.candidate)
            .collect();
        let ranked = state.scorer.select_top_actions(
            &pending,
            &ScoringContext::from_coverage(&state.coverage),
            usize::MAX,
        );
        debug!("Root {} offers {} branch(es)", url, ranked.len());
        for candidate in ranked {
            units.push(WorkUnit::Branch {
                root_url: url.clone(),
                root_id: root_id.clone(),
                edge_key: candidate.key(),
            });
        }
    }
    units
}

async fn run_unit(ctx: Arc<RunContext>, pool: Arc<BrowserPool>, unit: usize, work: WorkUnit) {
    let url = work.url().to_string();
    let acquired = tokio::select! {
        _ = ctx.cancel.cancelled() => return,
        acquired = pool.acquire() => acquired,
    };
    if ctx.cancel.is_cancelled() || !ctx.state.lock().await.budget.can_continue() {
        return;
    }
    let mut browser = match acquired {
        Ok(browser) => browser,
        Err(e) => {
            ctx.record_failure(unit, &url, &e).await;
            return;
        }
    };

    ctx.events.emit(ExplorationEvent::UnitStarted {
        unit,
        url: url.clone(),
    });
    let (outcome, steps) = {
        let mut explorer = UnitExplorer::new(unit, &ctx, browser.browser(), url.as_str());
        let outcome = match &work {
            WorkUnit::Page { .. } => explorer.explore_page().await,
            WorkUnit::Branch {
                root_id, edge_key, ..
            } => explorer.explore_branch(root_id, edge_key).await,
        };
        (outcome, explorer.steps_taken())
    };

    let error = match outcome {
        Ok(()) => None,
        Err(e) => {
            if ctx.record_failure(unit, &url, &e).await {
                browser.mark_broken();
            }
            Some(e.to_string())
        }
    };
    debug!("[Unit {}] Finished after {} step(s)", unit, steps);
    ctx.events.emit(ExplorationEvent::UnitCompleted { unit, steps, error });
}

async fn stitch(
    ctx: &RunContext,
    start_urls: &[String],
    started_at: chrono::DateTime<Utc>,
) -> ExplorationResult {
    let mut steps = std::mem::take(&mut *ctx.steps.lock().await);
    steps.sort_by_key(|s| s.step_index);
    let mut errors = std::mem::take(&mut *ctx.errors.lock().await);
    errors.sort_by_key(|e| e.step_index);

    let blocked = ctx.blocked.lock().await.clone();
    let state = ctx.state.lock().await;
    let budget = state.budget.get_status();
    let coverage = state.coverage.get_stats();

    let (status, termination_reason, last_phase, blocking_error) = match blocked {
        Some((phase, error)) => (
            RunStatus::Blocked,
            TerminationReason::Blocked {
                error: error.clone(),
            },
            phase,
            Some(error),
        ),
        None => {
            let reason = match budget.exhaustion_reason {
                Some(reason) => TerminationReason::Budget { reason },
                None => TerminationReason::GraphExhausted,
            };
            (RunStatus::Completed, reason, Phase::Stitch, None)
        }
    };

    ExplorationResult {
        start_urls: start_urls.to_vec(),
        status,
        termination_reason,
        last_phase,
        blocking_error,
        total_steps: steps.len(),
        unique_states: state.graph.node_count(),
        unique_urls: coverage.unique_urls,
        steps,
        errors,
        coverage,
        budget,
        decisions: ctx.engine.stats(),
        graph: state.graph.export(),
        started_at,
        finished_at: Utc::now(),
    }
}
