//! Tiered decision engine.
//!
//! Tier 0 handles zero or one pending edge. Tier 1 runs the heuristic rule
//! ladder and accepts confident results. Tier 2 sends the top candidates to a
//! decider with a timeout and bounded retries. Tier 3 turns a failed
//! escalation into a branch-exhausted signal for the current branch only.
//!
//! Ranking is synchronous and borrows shared state, so callers holding locks
//! can run [`DecisionEngine::prepare`] under the lock and
//! [`DecisionEngine::escalate`] after releasing it.

use crate::action::ActionCandidate;
use crate::config::{DecisionConfig, HeuristicThresholds};
use crate::graph::{GraphEdge, GraphNode};
use crate::heuristic::{HeuristicAnalyzer, HeuristicDecision};
use crate::retry::{RetryPolicy, retry};
use crate::scorer::{ActionScorer, ScoringContext};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};
use wayfinder_driver::{Decider, DeciderRequest, DriverError};

const DECISION_SYSTEM_PROMPT: &str = "You are guiding an automated explorer through a web \
application. Pick which of the offered candidate actions are worth performing next from the \
current page. Reply with JSON only: {\"decisions\": [{\"candidate_id\": \"c0\", \"priority\": \
1-10, \"rationale\": \"...\", \"interaction_hint\": \"...\"}], \"branch_exhausted\": bool}. Use \
only candidate ids from the list. Set branch_exhausted to true when nothing here is worth \
exploring.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionTier {
    Trivial,
    Heuristic,
    Ai,
    Fallback,
    Failure,
}

impl fmt::Display for DecisionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DecisionTier::Trivial => "trivial",
            DecisionTier::Heuristic => "heuristic",
            DecisionTier::Ai => "ai",
            DecisionTier::Fallback => "fallback",
            DecisionTier::Failure => "failure",
        };
        f.write_str(name)
    }
}

/// An edge picked for execution, with whatever the decider said about it.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeChoice {
    pub edge_key: String,
    pub candidate: ActionCandidate,
    pub priority: Option<u8>,
    pub rationale: Option<String>,
    pub interaction_hint: Option<String>,
}

impl EdgeChoice {
    fn plain(candidate: ActionCandidate) -> Self {
        Self {
            edge_key: candidate.key(),
            candidate,
            priority: None,
            rationale: None,
            interaction_hint: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Take {
        choice: EdgeChoice,
        tier: DecisionTier,
        confidence: u8,
        reason: String,
        /// Every usable decider verdict, best first, for annotating edges.
        annotations: Vec<EdgeChoice>,
    },
    /// Nothing pending here; return to the parent.
    Backtrack { reason: String },
    /// Stop exploring this branch.
    BranchExhausted { tier: DecisionTier, reason: String },
}

impl Decision {
    pub fn tier(&self) -> DecisionTier {
        match self {
            Decision::Take { tier, .. } | Decision::BranchExhausted { tier, .. } => *tier,
            Decision::Backtrack { .. } => DecisionTier::Trivial,
        }
    }
}

/// Everything the engine needs about the current node.
pub struct DecisionInput<'a> {
    pub node: &'a GraphNode,
    pub pending: &'a [GraphEdge],
    pub scorer: &'a ActionScorer,
    pub scoring: ScoringContext<'a>,
    /// Recent action descriptions, oldest first.
    pub history: &'a [String],
}

/// Owned state handed from [`DecisionEngine::prepare`] to
/// [`DecisionEngine::escalate`].
#[derive(Debug, Clone)]
pub struct Escalation {
    pub url: String,
    pub title: String,
    pub summary: String,
    pub history: Vec<String>,
    /// Selectable candidates, best first.
    pub ranked: Vec<ActionCandidate>,
    pub heuristic: HeuristicDecision,
    top_k: usize,
}

pub enum Prepared {
    Decided(Decision),
    Escalate(Box<Escalation>),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecisionStats {
    pub heuristic_decisions: u64,
    pub ai_escalations: u64,
    pub failures: u64,
    pub total_decisions: u64,
}

#[derive(Debug, Default)]
struct Counters {
    heuristic_decisions: AtomicU64,
    ai_escalations: AtomicU64,
    failures: AtomicU64,
    total_decisions: AtomicU64,
}

#[derive(Debug, Deserialize)]
struct AiReply {
    #[serde(default)]
    decisions: Vec<AiVerdict>,
    #[serde(default)]
    branch_exhausted: bool,
}

#[derive(Debug, Deserialize)]
struct AiVerdict {
    candidate_id: String,
    #[serde(default)]
    priority: Option<f64>,
    #[serde(default)]
    rationale: Option<String>,
    #[serde(default)]
    interaction_hint: Option<String>,
}

pub struct DecisionEngine {
    analyzer: HeuristicAnalyzer,
    decider: Option<Arc<dyn Decider>>,
    config: DecisionConfig,
    counters: Counters,
}

impl DecisionEngine {
    pub fn new(config: DecisionConfig, thresholds: HeuristicThresholds) -> Self {
        Self {
            analyzer: HeuristicAnalyzer::new(thresholds, config.confidence_threshold),
            decider: None,
            config,
            counters: Counters::default(),
        }
    }

    pub fn with_decider(mut self, decider: Arc<dyn Decider>) -> Self {
        self.decider = Some(decider);
        self
    }

    pub fn has_decider(&self) -> bool {
        self.decider.is_some()
    }

    pub fn stats(&self) -> DecisionStats {
        DecisionStats {
            heuristic_decisions: self.counters.heuristic_decisions.load(Ordering::Relaxed),
            ai_escalations: self.counters.ai_escalations.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            total_decisions: self.counters.total_decisions.load(Ordering::Relaxed),
        }
    }

    /// Runs every tier that needs no I/O.
    pub fn prepare(&self, input: &DecisionInput<'_>) -> Prepared {
        if input.pending.is_empty() {
            return Prepared::Decided(self.finish_local(Decision::Backtrack {
                reason: "no pending edges".to_string(),
            }));
        }
        let selectable: Vec<&ActionCandidate> = input
            .pending
            .iter()
            .map(|e| &e.candidate)
            .filter(|c| !c.element.disabled && !input.scorer.is_excluded(c))
            .collect();
        if let [only] = selectable.as_slice() {
            return Prepared::Decided(self.finish_local(Decision::Take {
                choice: EdgeChoice::plain((*only).clone()),
                tier: DecisionTier::Trivial,
                confidence: 100,
                reason: "single pending edge".to_string(),
                annotations: Vec::new(),
            }));
        }

        // Disabled submits stay in the ranking so their enablers get boosted
        let candidates: Vec<ActionCandidate> =
            input.pending.iter().map(|e| e.candidate.clone()).collect();
        let ranked = input
            .scorer
            .select_top_actions(&candidates, &input.scoring, usize::MAX);
        if ranked.is_empty() {
            return Prepared::Decided(self.finish_local(Decision::BranchExhausted {
                tier: DecisionTier::Heuristic,
                reason: "only disabled or exhausted actions remain".to_string(),
            }));
        }

        let heuristic = self.analyzer.analyze(&ranked, input.scorer, &input.scoring);
        debug!(
            rule = ?heuristic.rule,
            confidence = heuristic.confidence,
            reason = %heuristic.reason,
            "Heuristic verdict"
        );
        if self.analyzer.accepts(&heuristic)
            && let Some(candidate) = heuristic.candidate.clone()
        {
            return Prepared::Decided(self.finish_local(Decision::Take {
                choice: EdgeChoice::plain(candidate),
                tier: DecisionTier::Heuristic,
                confidence: heuristic.confidence,
                reason: heuristic.reason,
                annotations: Vec::new(),
            }));
        }

        if self.decider.is_none() {
            let decision = fallback_decision(&ranked, "no decider configured");
            return Prepared::Decided(self.finish_local(decision));
        }

        let history_start = input.history.len().saturating_sub(self.config.history_len);
        Prepared::Escalate(Box::new(Escalation {
            url: input.node.url.clone(),
            title: input.node.title.clone(),
            summary: input.node.summary.clone(),
            history: input.history[history_start..].to_vec(),
            ranked,
            heuristic,
            top_k: self.config.top_k.max(1),
        }))
    }

    /// Asks the decider about an uncertain case.
    pub async fn escalate(&self, escalation: Escalation) -> Decision {
        self.counters.ai_escalations.fetch_add(1, Ordering::Relaxed);
        self.counters.total_decisions.fetch_add(1, Ordering::Relaxed);

        let Some(decider) = self.decider.clone() else {
            return fallback_decision(&escalation.ranked, "no decider configured");
        };

        let offered: Vec<(String, &ActionCandidate)> = escalation
            .ranked
            .iter()
            .take(escalation.top_k)
            .enumerate()
            .map(|(i, c)| (format!("c{}", i), c))
            .collect();
        let request = DeciderRequest {
            system: DECISION_SYSTEM_PROMPT.to_string(),
            user: build_prompt(&escalation, &offered),
            timeout: Duration::from_millis(self.config.ai_timeout_ms),
        };

        info!(url = %escalation.url, candidates = offered.len(), "Escalating decision to decider");
        let policy = RetryPolicy::exponential(
            self.config.ai_max_retries,
            Duration::from_millis(self.config.ai_backoff_ms),
        );
        let timeout = request.timeout;
        let reply = retry(&policy, |_: &DriverError| true, |attempt| {
            let decider = decider.clone();
            let request = request.clone();
            async move {
                if attempt > 0 {
                    debug!(attempt, "Retrying decider call");
                }
                match tokio::time::timeout(timeout, decider.decide(request)).await {
                    Ok(result) => result,
                    Err(_) => Err(DriverError::Timeout {
                        operation: "decider call".to_string(),
                        ms: timeout.as_millis() as u64,
                    }),
                }
            }
        })
        .await;

        let reply = match reply {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Decider failed after retries: {}", e);
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                return Decision::BranchExhausted {
                    tier: DecisionTier::Failure,
                    reason: e.to_string(),
                };
            }
        };

        interpret_reply(reply, &offered, &escalation.ranked)
    }

    /// All tiers in order. Do not call while holding locks the decider path
    /// should not block; use [`Self::prepare`] and [`Self::escalate`] instead.
    pub async fn decide(&self, input: &DecisionInput<'_>) -> Decision {
        match self.prepare(input) {
            Prepared::Decided(decision) => decision,
            Prepared::Escalate(escalation) => self.escalate(*escalation).await,
        }
    }

    fn finish_local(&self, decision: Decision) -> Decision {
        self.counters.heuristic_decisions.fetch_add(1, Ordering::Relaxed);
        self.counters.total_decisions.fetch_add(1, Ordering::Relaxed);
        decision
    }
}

fn build_prompt(escalation: &Escalation, offered: &[(String, &ActionCandidate)]) -> String {
    let mut prompt = format!(
        "Current page: {}\nTitle: {}\n\nPage summary:\n{}\n",
        escalation.url, escalation.title, escalation.summary
    );
    if !escalation.history.is_empty() {
        prompt.push_str("\nRecent actions:\n");
        for entry in &escalation.history {
            prompt.push_str(&format!("- {}\n", entry));
        }
    }
    prompt.push_str("\nCandidates:\n");
    for (id, candidate) in offered {
        let element = &candidate.element;
        prompt.push_str(&format!(
            "{}: {} <{}> \"{}\"{} (score {:.1})\n",
            id,
            candidate.kind,
            element.tag,
            element.text,
            element
                .href
                .as_deref()
                .map(|h| format!(" -> {}", h))
                .unwrap_or_default(),
            candidate.priority_score
        ));
    }
    prompt.push_str(&format!(
        "\nThe heuristic was unsure: {}\n",
        escalation.heuristic.reason
    ));
    prompt
}

fn interpret_reply(
    reply: Value,
    offered: &[(String, &ActionCandidate)],
    ranked: &[ActionCandidate],
) -> Decision {
    let parsed: AiReply = match serde_json::from_value(reply) {
        Ok(parsed) => parsed,
        Err(e) => {
            debug!("Decider reply has the wrong shape: {}", e);
            return fallback_decision(ranked, "decider reply unusable");
        }
    };

    let by_id: HashMap<&str, &ActionCandidate> =
        offered.iter().map(|(id, c)| (id.as_str(), *c)).collect();
    let mut choices: Vec<EdgeChoice> = parsed
        .decisions
        .into_iter()
        .filter_map(|verdict| {
            let Some(candidate) = by_id.get(verdict.candidate_id.trim()) else {
                debug!(id = %verdict.candidate_id, "Decider named an unknown candidate");
                return None;
            };
            let priority = verdict.priority.unwrap_or(5.0).round().clamp(1.0, 10.0) as u8;
            Some(EdgeChoice {
                edge_key: candidate.key(),
                candidate: (*candidate).clone(),
                priority: Some(priority),
                rationale: verdict.rationale,
                interaction_hint: verdict.interaction_hint,
            })
        })
        .collect();
    choices.sort_by(|a, b| b.priority.cmp(&a.priority));
    let mut seen = HashSet::new();
    choices.retain(|c| seen.insert(c.edge_key.clone()));

    match choices.first().cloned() {
        Some(choice) => Decision::Take {
            reason: choice
                .rationale
                .clone()
                .unwrap_or_else(|| "chosen by decider".to_string()),
            confidence: choice.priority.unwrap_or(5) * 10,
            choice,
            tier: DecisionTier::Ai,
            annotations: choices,
        },
        None if parsed.branch_exhausted => Decision::BranchExhausted {
            tier: DecisionTier::Ai,
            reason: "decider marked the branch exhausted".to_string(),
        },
        None => fallback_decision(ranked, "decider returned no usable candidate"),
    }
}

/// Context-free ordering: links first, then form controls, then the rest,
/// keeping score order within each group.
pub fn fallback_order(ranked: &[ActionCandidate]) -> Vec<ActionCandidate> {
    let group = |c: &ActionCandidate| {
        if c.element.href.is_some() {
            0
        } else if c.element.in_form || c.element.is_form_field() {
            1
        } else {
            2
        }
    };
    let mut ordered = ranked.to_vec();
    ordered.sort_by_key(group);
    ordered
}

fn fallback_decision(ranked: &[ActionCandidate], why: &str) -> Decision {
    match fallback_order(ranked).into_iter().next() {
        Some(candidate) => Decision::Take {
            choice: EdgeChoice::plain(candidate),
            tier: DecisionTier::Fallback,
            confidence: 0,
            reason: format!("{}; using fallback ordering", why),
            annotations: Vec::new(),
        },
        None => Decision::BranchExhausted {
            tier: DecisionTier::Fallback,
            reason: why.to_string(),
        },
    }
}
