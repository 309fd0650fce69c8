// Pure rule ladder over ranked candidates. Never errors, never awaits.

use crate::action::ActionCandidate;
use crate::config::HeuristicThresholds;
use crate::coverage::normalize_url;
use crate::scorer::{ActionScorer, ScoringContext, is_cta};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeuristicRule {
    DominantScore,
    CtaButton,
    NavigationLink,
    NovelUrl,
    ClearLeader,
    Uncertain,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeuristicDecision {
    pub rule: HeuristicRule,
    /// 0-100.
    pub confidence: u8,
    pub reason: String,
    pub candidate: Option<ActionCandidate>,
}

impl HeuristicDecision {
    fn uncertain(reason: impl Into<String>) -> Self {
        Self {
            rule: HeuristicRule::Uncertain,
            confidence: 0,
            reason: reason.into(),
            candidate: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HeuristicAnalyzer {
    thresholds: HeuristicThresholds,
    confidence_threshold: u8,
}

impl HeuristicAnalyzer {
    pub fn new(thresholds: HeuristicThresholds, confidence_threshold: u8) -> Self {
        Self {
            thresholds,
            confidence_threshold,
        }
    }

    /// Whether a decision is confident enough to act on without escalating.
    pub fn accepts(&self, decision: &HeuristicDecision) -> bool {
        decision.candidate.is_some()
            && decision.rule != HeuristicRule::Uncertain
            && decision.confidence >= self.confidence_threshold
    }

    /// Classifies `ranked` (best first, selectable only). The first matching
    /// rule wins.
    pub fn analyze(
        &self,
        ranked: &[ActionCandidate],
        scorer: &ActionScorer,
        context: &ScoringContext<'_>,
    ) -> HeuristicDecision {
        let t = &self.thresholds;
        let Some(top) = ranked.first() else {
            return HeuristicDecision::uncertain("no candidates");
        };
        let top_score = top.priority_score;
        let runner_up = ranked.get(1).map(|c| c.priority_score).unwrap_or(0.0);

        let novel_in_domain = top
            .element
            .href
            .as_deref()
            .map(|href| {
                scorer.is_in_domain(href) && !context.visited_urls.contains(&normalize_url(href))
            })
            .unwrap_or(false);

        let decide = |rule, confidence, reason: String| HeuristicDecision {
            rule,
            confidence,
            reason,
            candidate: Some(top.clone()),
        };

        if top_score >= t.dominant_ratio * runner_up && top_score > t.dominant_min {
            return decide(
                HeuristicRule::DominantScore,
                t.dominant_confidence,
                format!("score {:.1} dominates runner-up {:.1}", top_score, runner_up),
            );
        }
        if top.element.is_button_like() && is_cta(&top.element) {
            return decide(
                HeuristicRule::CtaButton,
                t.cta_confidence,
                format!("call-to-action button \"{}\"", top.element.text),
            );
        }
        if top.element.in_nav && novel_in_domain {
            return decide(
                HeuristicRule::NavigationLink,
                t.navigation_confidence,
                format!("navigation link to unvisited {}", href_of(top)),
            );
        }
        if novel_in_domain && top_score > t.novel_url_min {
            return decide(
                HeuristicRule::NovelUrl,
                t.novel_url_confidence,
                format!("score {:.1} towards novel {}", top_score, href_of(top)),
            );
        }
        if top_score >= t.clear_leader_ratio * runner_up && top_score > t.clear_leader_min {
            return decide(
                HeuristicRule::ClearLeader,
                t.clear_leader_confidence,
                format!("clear leader {:.1} over {:.1}", top_score, runner_up),
            );
        }

        HeuristicDecision::uncertain(format!(
            "no rule matched (top {:.1}, runner-up {:.1})",
            top_score, runner_up
        ))
    }
}

fn href_of(candidate: &ActionCandidate) -> &str {
    candidate.element.href.as_deref().unwrap_or("")
}
