//! Depth-first exploration driven by one browser session.
//!
//! A [`UnitExplorer`] owns a session for the lifetime of one work unit. It
//! keeps a stack of frames (node, depth, path of actions from the unit's
//! start URL), asks the decision engine what to do at the top frame, and
//! writes every outcome into the shared run state. Locks on the shared state
//! are never held across a browser or decider call.

use crate::action::{Action, ActionKind};
use crate::candidates::extract_candidates;
use crate::coverage::ActionOutcome;
use crate::decision::{Decision, DecisionInput, DecisionTier, EdgeChoice, Prepared};
use crate::error::{ErrorClass, ExploreError, Result};
use crate::events::ExplorationEvent;
use crate::executor::RunContext;
use crate::fingerprint::{PageObservation, StateFingerprint};
use crate::graph::{EdgeUpdate, NodeInsert};
use crate::result::{ErrorLogEntry, StepRecord, StepStatus};
use crate::retry::{RetryPolicy, retry};
use crate::scorer::ScoringContext;
use std::future::Future;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tracing::{debug, info, warn};
use wayfinder_driver::{Browser, DriverError, split_nth};

/// A position on the exploration stack.
#[derive(Debug, Clone)]
pub(crate) struct Frame {
    pub node_id: String,
    pub depth: usize,
    /// Actions that lead from the unit's start URL to this node.
    pub path: Vec<Action>,
}

/// Runs `fut` under a deadline, turning expiry into a timeout error.
async fn timed<T>(
    operation: &str,
    ms: u64,
    fut: impl Future<Output = wayfinder_driver::error::Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(Duration::from_millis(ms), fut).await {
        Ok(result) => result.map_err(ExploreError::from),
        Err(_) => Err(ExploreError::Timeout {
            operation: operation.to_string(),
            ms,
        }),
    }
}

async fn dispatch(browser: &dyn Browser, action: &Action) -> wayfinder_driver::error::Result<()> {
    match action {
        Action::Click { selector } => browser.click(selector).await,
        Action::Fill { selector, value } => browser.fill(selector, value).await,
        Action::Select { selector, value } => browser.select_option(selector, value).await,
        Action::Hover { selector } => browser.hover(selector).await,
        Action::Press { selector, key } => {
            browser.click(selector).await?;
            browser.press(key).await
        }
        Action::Navigate { url } => browser.open(url).await,
    }
}

/// Performs one action. A selector that matches several elements is
/// narrowed to its first match and tried again, up to `selector_retries`
/// times. Returns the action as it was finally performed.
pub async fn perform_action(
    browser: &dyn Browser,
    action: &Action,
    selector_retries: u32,
    timeout_ms: u64,
    strict: bool,
) -> Result<Action> {
    let (base, _) = split_nth(action.target());
    let narrowed = format!("{} >> nth=0", base);
    let policy = RetryPolicy::immediate(selector_retries);
    let is_ambiguous =
        |e: &ExploreError| matches!(e.class(strict), ErrorClass::AmbiguousSelector { .. });

    retry(&policy, is_ambiguous, |attempt| {
        let attempt_action = if attempt == 0 || action.kind() == ActionKind::Navigate {
            action.clone()
        } else {
            debug!(selector = %narrowed, attempt, "Narrowing ambiguous selector");
            action.with_selector(&narrowed)
        };
        async move {
            let operation = attempt_action.describe();
            timed(&operation, timeout_ms, dispatch(browser, &attempt_action)).await?;
            Ok(attempt_action)
        }
    })
    .await
}

pub(crate) struct UnitExplorer<'a> {
    unit: usize,
    ctx: &'a RunContext,
    browser: &'a dyn Browser,
    start_url: String,
    /// Node the session is believed to be on.
    current: Option<String>,
    history: Vec<String>,
    steps_taken: usize,
}

impl<'a> UnitExplorer<'a> {
    pub(crate) fn new(
        unit: usize,
        ctx: &'a RunContext,
        browser: &'a dyn Browser,
        start_url: impl Into<String>,
    ) -> Self {
        Self {
            unit,
            ctx,
            browser,
            start_url: start_url.into(),
            current: None,
            history: Vec::new(),
            steps_taken: 0,
        }
    }

    pub(crate) fn steps_taken(&self) -> usize {
        self.steps_taken
    }

    fn strict(&self) -> bool {
        self.ctx.config.executor.strict_mode
    }

    /// Opens the start URL and registers it as a depth-0 state. Returns the
    /// node id.
    pub(crate) async fn survey(&mut self) -> Result<String> {
        let start_url = self.start_url.clone();
        self.open(&start_url).await?;
        let (observation, fingerprint) = self.observe().await;
        let node_id = fingerprint.combined_hash.clone();
        self.register(&fingerprint, &observation, 0).await;
        self.current = Some(node_id.clone());
        Ok(node_id)
    }

    /// One work unit in pages mode: explore everything reachable from the
    /// start URL.
    pub(crate) async fn explore_page(&mut self) -> Result<()> {
        let node_id = self.survey().await?;
        info!("[Unit {}] Exploring from {}", self.unit, self.start_url);
        self.run_dfs(Frame {
            node_id,
            depth: 0,
            path: Vec::new(),
        })
        .await
    }

    /// One work unit in branches mode: take a single root edge, then explore
    /// below wherever it leads.
    pub(crate) async fn explore_branch(&mut self, root_id: &str, edge_key: &str) -> Result<()> {
        let root = Frame {
            node_id: root_id.to_string(),
            depth: 0,
            path: Vec::new(),
        };
        if !self.return_to(&root).await? {
            warn!("[Unit {}] Could not reach root state, dropping branch {}", self.unit, edge_key);
            return Ok(());
        }

        let candidate = {
            let state = self.ctx.state.lock().await;
            state
                .graph
                .get_node(root_id)
                .and_then(|n| n.edge(edge_key))
                .map(|e| e.candidate.clone())
        };
        let Some(candidate) = candidate else {
            return Err(ExploreError::Other(format!("unknown root edge {}", edge_key)));
        };

        let choice = EdgeChoice {
            edge_key: edge_key.to_string(),
            candidate,
            priority: None,
            rationale: None,
            interaction_hint: None,
        };
        info!("[Unit {}] Exploring branch {}", self.unit, edge_key);
        match self
            .take_edge(&root, choice, DecisionTier::Trivial, 100, "root branch".to_string())
            .await?
        {
            Some(child) => self.run_dfs(child).await,
            None => Ok(()),
        }
    }

    async fn run_dfs(&mut self, bottom: Frame) -> Result<()> {
        let mut stack = vec![bottom];

        while let Some(frame) = stack.last().cloned() {
            if self.ctx.cancel.is_cancelled() {
                debug!("[Unit {}] Cancelled", self.unit);
                break;
            }
            if let Some(limit) = self.ctx.config.executor.max_steps_per_unit
                && self.steps_taken >= limit
            {
                debug!("[Unit {}] Step limit {} reached", self.unit, limit);
                break;
            }
            {
                let mut state = self.ctx.state.lock().await;
                state.budget.set_depth(frame.depth);
                if !state.budget.can_continue() {
                    debug!("[Unit {}] Budget exhausted", self.unit);
                    break;
                }
            }

            if self.current.as_deref() != Some(frame.node_id.as_str())
                && !self.return_to(&frame).await?
            {
                warn!(
                    "[Unit {}] Could not return to {}, abandoning frame",
                    self.unit, frame.node_id
                );
                stack.pop();
                continue;
            }

            match self.decide(&frame.node_id).await {
                Decision::Backtrack { reason } => {
                    debug!("[Unit {}] Backtracking from {}: {}", self.unit, frame.node_id, reason);
                    stack.pop();
                }
                Decision::BranchExhausted { tier, reason } => {
                    info!(
                        "[Unit {}] Branch at {} exhausted ({}): {}",
                        self.unit, frame.node_id, tier, reason
                    );
                    self.skip_pending(&frame.node_id, &reason).await;
                    stack.pop();
                }
                Decision::Take {
                    choice,
                    tier,
                    confidence,
                    reason,
                    annotations,
                } => {
                    self.annotate(&frame.node_id, annotations).await;
                    if let Some(child) = self
                        .take_edge(&frame, choice, tier, confidence, reason)
                        .await?
                        && stack.iter().all(|f| f.node_id != child.node_id)
                    {
                        stack.push(child);
                    }
                }
            }
        }
        Ok(())
    }

    async fn decide(&self, node_id: &str) -> Decision {
        let prepared = {
            let state = self.ctx.state.lock().await;
            let Some(node) = state.graph.get_node(node_id) else {
                return Decision::Backtrack {
                    reason: "unknown node".to_string(),
                };
            };
            let pending = state.graph.get_pending_edges(node_id);
            let input = DecisionInput {
                node,
                pending: &pending,
                scorer: &state.scorer,
                scoring: ScoringContext::from_coverage(&state.coverage),
                history: &self.history,
            };
            self.ctx.engine.prepare(&input)
        };

        match prepared {
            Prepared::Decided(decision) => decision,
            Prepared::Escalate(escalation) => self.ctx.engine.escalate(*escalation).await,
        }
    }

    async fn annotate(&self, node_id: &str, annotations: Vec<EdgeChoice>) {
        if annotations.is_empty() {
            return;
        }
        let mut state = self.ctx.state.lock().await;
        for choice in annotations {
            let update = EdgeUpdate::Annotate {
                llm_priority: choice.priority,
                rationale: choice.rationale,
                interaction_hint: choice.interaction_hint,
            };
            if let Err(e) = state.graph.update_edge(node_id, &choice.edge_key, update) {
                debug!("Annotation dropped: {}", e);
            }
        }
    }

    async fn skip_pending(&self, node_id: &str, reason: &str) {
        let mut state = self.ctx.state.lock().await;
        for edge in state.graph.get_pending_edges(node_id) {
            let update = EdgeUpdate::Skipped {
                reason: reason.to_string(),
            };
            if let Err(e) = state.graph.update_edge(node_id, &edge.key, update) {
                debug!("Skip dropped: {}", e);
            }
        }
    }

    /// Claims and performs one edge of `frame`. Returns the frame to push
    /// when the action led to a different state within the depth limit.
    async fn take_edge(
        &mut self,
        frame: &Frame,
        choice: EdgeChoice,
        tier: DecisionTier,
        confidence: u8,
        reason: String,
    ) -> Result<Option<Frame>> {
        let (before, url_before, summary) = {
            let mut state = self.ctx.state.lock().await;
            if !state.graph.claim_edge(&frame.node_id, &choice.edge_key) {
                debug!("[Unit {}] Edge {} taken elsewhere", self.unit, choice.edge_key);
                return Ok(None);
            }
            match state.graph.get_node(&frame.node_id) {
                Some(node) => (node.fingerprint.clone(), node.url.clone(), node.summary.clone()),
                None => return Ok(None),
            }
        };

        let candidate = &choice.candidate;
        let value = match candidate.kind {
            ActionKind::Fill | ActionKind::Select => {
                let hint = choice.interaction_hint.as_deref().unwrap_or("");
                let context = format!("{}\n{}", summary, hint);
                Some(self.ctx.inputs.resolve(&candidate.element, context.trim()).await)
            }
            _ => None,
        };
        let action = candidate.to_action(value.as_deref());

        let step_index = self.ctx.step_counter.fetch_add(1, Ordering::SeqCst);
        self.ctx.events.emit(ExplorationEvent::StepStarted {
            step: step_index,
            unit: self.unit,
            action: action.describe(),
        });
        info!(
            "[Unit {}] Step {}: {} ({}, confidence {})",
            self.unit,
            step_index,
            action.describe(),
            tier,
            confidence
        );

        let snapshot = self.ctx.state.lock().await.coverage.take_snapshot(step_index);
        let outcome = match perform_action(
            self.browser,
            &action,
            self.ctx.config.executor.selector_retries,
            self.ctx.config.executor.action_timeout_ms,
            self.strict(),
        )
        .await
        {
            Ok(performed) => self.settle().await.map(|_| performed),
            Err(e) => Err(e),
        };

        let performed = match outcome {
            Ok(performed) => performed,
            Err(e) => {
                let record = StepRecord {
                    step_index,
                    unit: self.unit,
                    depth: frame.depth,
                    action,
                    edge_key: choice.edge_key.clone(),
                    tier,
                    confidence,
                    reason,
                    url_before,
                    url_after: None,
                    before,
                    after: None,
                    from_node: frame.node_id.clone(),
                    to_node: None,
                    new_state: false,
                    coverage_gain: Default::default(),
                    status: StepStatus::Failed,
                    error: Some(e.to_string()),
                    screenshot: None,
                };
                return self.fail_step(frame, record, candidate.kind, &candidate.selector, e).await;
            }
        };

        let (observation, fingerprint) = self.observe().await;
        let candidates = extract_candidates(&observation.html, &observation.url);
        let depth = frame.depth + 1;
        let target = fingerprint.combined_hash.clone();

        let (insert, gain) = {
            let mut state = self.ctx.state.lock().await;
            state.coverage.record_observation(&observation);
            state.coverage.record_element_interaction(&candidate.selector);
            let gain = state.coverage.calculate_gain(&snapshot);
            state.coverage.record_action_outcome(ActionOutcome {
                kind: candidate.kind,
                gain: gain.total_gain,
            });
            state.scorer.record_attempt(candidate.kind, &candidate.selector);

            let insert = state.graph.add_node(&fingerprint, &observation, candidates, depth);
            let update = EdgeUpdate::Explored {
                target_node_id: target.clone(),
            };
            if let Err(e) = state.graph.update_edge(&frame.node_id, &choice.edge_key, update) {
                debug!("Edge update dropped: {}", e);
            }
            state.budget.record_step(gain.has_gain);
            let states = state.graph.node_count();
            state.budget.set_unique_states(states);
            (insert, gain)
        };

        self.current = Some(target.clone());
        let new_state = insert.is_new();
        if new_state {
            self.ctx.events.emit(ExplorationEvent::StateDiscovered {
                node: target.clone(),
                url: observation.url.clone(),
                depth,
            });
        }
        if let NodeInsert::Merged { new_edges } = insert
            && new_edges > 0
        {
            debug!("[Unit {}] Revisit of {} added {} edges", self.unit, target, new_edges);
        }

        let screenshot = self.capture_screenshot(step_index).await?;
        self.ctx.events.emit(ExplorationEvent::StepCompleted {
            step: step_index,
            unit: self.unit,
            status: StepStatus::Success,
            coverage_gain: gain.total_gain,
            new_state,
        });
        self.ctx.steps.lock().await.push(StepRecord {
            step_index,
            unit: self.unit,
            depth: frame.depth,
            action: performed.clone(),
            edge_key: choice.edge_key.clone(),
            tier,
            confidence,
            reason,
            url_before,
            url_after: Some(observation.url.clone()),
            before,
            after: Some(fingerprint),
            from_node: frame.node_id.clone(),
            to_node: Some(target.clone()),
            new_state,
            coverage_gain: gain,
            status: StepStatus::Success,
            error: None,
            screenshot,
        });

        self.history.push(performed.describe());
        self.steps_taken += 1;

        if target == frame.node_id || depth > self.ctx.config.budget.max_depth {
            return Ok(None);
        }
        let mut path = frame.path.clone();
        path.push(performed);
        Ok(Some(Frame {
            node_id: target,
            depth,
            path,
        }))
    }

    /// Bookkeeping for a failed action. Skippable failures are logged and
    /// the unit carries on; blocking ones are returned.
    async fn fail_step(
        &mut self,
        frame: &Frame,
        record: StepRecord,
        kind: ActionKind,
        selector: &str,
        error: ExploreError,
    ) -> Result<Option<Frame>> {
        let message = error.to_string();
        let blocking = error.is_blocking(self.strict());
        {
            let mut state = self.ctx.state.lock().await;
            let update = EdgeUpdate::Failed {
                error: message.clone(),
            };
            if let Err(e) = state.graph.update_edge(&frame.node_id, &record.edge_key, update) {
                debug!("Edge update dropped: {}", e);
            }
            state.scorer.record_attempt(kind, selector);
            state.budget.record_step(false);
        }

        let step_index = record.step_index;
        // Blocking errors are logged once, by the executor
        if !blocking {
            self.ctx.errors.lock().await.push(ErrorLogEntry {
                step_index,
                unit: self.unit,
                url: record.url_before.clone(),
                message: message.clone(),
                blocking,
            });
        }
        self.ctx.events.emit(ExplorationEvent::StepCompleted {
            step: step_index,
            unit: self.unit,
            status: StepStatus::Failed,
            coverage_gain: 0,
            new_state: false,
        });
        self.ctx.steps.lock().await.push(record);
        self.steps_taken += 1;

        if blocking {
            return Err(error);
        }
        warn!("[Unit {}] Step {} failed: {}", self.unit, step_index, message);

        // The page may have moved even though the action failed
        let (_, fingerprint) = self.observe().await;
        self.current = Some(fingerprint.combined_hash);
        Ok(None)
    }

    /// Gets the session back to `frame`: first by loading the node's URL,
    /// then by replaying the frame's path from the start URL. Returns false
    /// when neither reproduces the node's fingerprint.
    async fn return_to(&mut self, frame: &Frame) -> Result<bool> {
        let url = {
            let state = self.ctx.state.lock().await;
            match state.graph.get_node(&frame.node_id) {
                Some(node) => node.url.clone(),
                None => return Ok(false),
            }
        };

        if self.try_open(&url).await? && self.reached(&frame.node_id).await {
            return Ok(true);
        }
        if frame.path.is_empty() && url == self.start_url {
            return Ok(false);
        }

        debug!(
            "[Unit {}] Replaying {} actions to reach {}",
            self.unit,
            frame.path.len(),
            frame.node_id
        );
        let start_url = self.start_url.clone();
        if !self.try_open(&start_url).await? {
            return Ok(false);
        }
        for action in &frame.path {
            let replayed = perform_action(
                self.browser,
                action,
                self.ctx.config.executor.selector_retries,
                self.ctx.config.executor.action_timeout_ms,
                self.strict(),
            )
            .await;
            let replayed = match replayed {
                Ok(_) => self.settle().await,
                Err(e) => Err(e),
            };
            if let Err(e) = replayed {
                if e.is_blocking(self.strict()) {
                    return Err(e);
                }
                debug!("[Unit {}] Replay failed: {}", self.unit, e);
                self.current = None;
                return Ok(false);
            }
        }
        Ok(self.reached(&frame.node_id).await)
    }

    /// Opens a URL. Skippable failures become `false`.
    async fn try_open(&mut self, url: &str) -> Result<bool> {
        match self.open(url).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_blocking(self.strict()) => Err(e),
            Err(e) => {
                debug!("[Unit {}] Could not open {}: {}", self.unit, url, e);
                self.current = None;
                Ok(false)
            }
        }
    }

    async fn reached(&mut self, node_id: &str) -> bool {
        let (_, fingerprint) = self.observe().await;
        let reached = fingerprint.combined_hash == node_id;
        self.current = Some(fingerprint.combined_hash);
        reached
    }

    async fn open(&self, url: &str) -> Result<()> {
        let ms = self.ctx.config.executor.navigation_timeout_ms;
        timed(&format!("navigate to {}", url), ms, self.browser.open(url)).await?;
        self.settle().await
    }

    async fn settle(&self) -> Result<()> {
        let ms = self.ctx.config.executor.action_timeout_ms;
        timed("wait for stability", ms, self.browser.wait_for_stability()).await
    }

    async fn observe(&self) -> (PageObservation, StateFingerprint) {
        let observation = self.ctx.fingerprinter.observe(self.browser).await;
        let fingerprint = self.ctx.fingerprinter.capture(&observation);
        (observation, fingerprint)
    }

    async fn register(&self, fingerprint: &StateFingerprint, observation: &PageObservation, depth: usize) {
        let candidates = extract_candidates(&observation.html, &observation.url);
        let insert = {
            let mut state = self.ctx.state.lock().await;
            state.coverage.record_observation(observation);
            let insert = state.graph.add_node(fingerprint, observation, candidates, depth);
            let states = state.graph.node_count();
            state.budget.set_unique_states(states);
            insert
        };
        if insert.is_new() {
            self.ctx.events.emit(ExplorationEvent::StateDiscovered {
                node: fingerprint.combined_hash.clone(),
                url: observation.url.clone(),
                depth,
            });
        }
    }

    async fn capture_screenshot(&self, step_index: usize) -> Result<Option<Vec<u8>>> {
        if !self.ctx.config.executor.capture_screenshots {
            return Ok(None);
        }
        let ms = self.ctx.config.executor.action_timeout_ms;
        match timed("screenshot", ms, self.browser.screenshot()).await {
            Ok(bytes) => {
                self.ctx.events.emit(ExplorationEvent::ScreenshotCaptured {
                    step: step_index,
                    bytes: bytes.len(),
                });
                Ok(Some(bytes))
            }
            Err(ExploreError::Driver(DriverError::Unsupported(reason))) => {
                debug!("Screenshot skipped: {}", reason);
                Ok(None)
            }
            Err(e) if e.is_blocking(self.strict()) => Err(e),
            Err(e) => {
                debug!("Screenshot failed: {}", e);
                Ok(None)
            }
        }
    }
}
