//! Action scoring and ranking.
//!
//! Four sub-scores in 0-10 (novelty, business criticality, risk, branch
//! factor) are weighted, summed and multiplied by [`SCORE_SCALE`], so a
//! priority score lands in 0-40. Repeated attempts decay the score and an
//! element is dropped once its attempts reach the retry ceiling.

use crate::action::{
    ActionCandidate, ActionKind, ElementInfo, ScoreBreakdown, edge_key, keyword_matcher,
};
use crate::config::ScorerConfig;
use crate::coverage::{CoverageTracker, normalize_url};
use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use std::sync::LazyLock;
use tracing::debug;
use url::Url;

pub const SCORE_SCALE: f64 = 4.0;

/// Score given to disabled elements so they sort last but stay visible.
pub const DISABLED_SCORE: f64 = 0.1;

/// Margin by which an enabling input outranks the submit it unlocks.
const ENABLER_BONUS: f64 = 1.0;

pub const CTA_KEYWORDS: &[&str] = &[
    "sign up",
    "signup",
    "register",
    "get started",
    "start free",
    "free trial",
    "start trial",
    "try free",
    "checkout",
    "check out",
    "buy",
    "purchase",
    "subscribe",
    "add to cart",
    "book now",
    "order now",
    "create account",
    "join",
    "request demo",
    "get a demo",
    "contact sales",
];

static CTA_MATCHER: LazyLock<Regex> = LazyLock::new(|| keyword_matcher(CTA_KEYWORDS));

pub fn is_cta(element: &ElementInfo) -> bool {
    CTA_MATCHER.is_match(&element.label_text())
}

/// What the scorer needs to know about the run so far.
#[derive(Debug, Clone, Copy)]
pub struct ScoringContext<'a> {
    /// Normalized URLs already visited.
    pub visited_urls: &'a BTreeSet<String>,
    pub interacted: &'a BTreeSet<String>,
    /// Action kind that has produced the most coverage so far, if any.
    pub preferred_kind: Option<ActionKind>,
}

impl<'a> ScoringContext<'a> {
    pub fn from_coverage(coverage: &'a CoverageTracker) -> Self {
        let preferred_kind = coverage
            .most_effective_action_types()
            .first()
            .filter(|(_, mean)| *mean > 0.0)
            .map(|(kind, _)| *kind);
        Self {
            visited_urls: coverage.visited_urls(),
            interacted: coverage.interacted_elements(),
            preferred_kind,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ActionScorer {
    config: ScorerConfig,
    attempts: HashMap<String, u32>,
}

impl ActionScorer {
    pub fn new(config: ScorerConfig) -> Self {
        let config = ScorerConfig {
            base_domain: config.base_domain.as_deref().map(normalize_domain),
            ..config
        };
        Self {
            config,
            attempts: HashMap::new(),
        }
    }

    /// Sets the base domain unless one was configured explicitly.
    pub fn derive_base_domain(&mut self, start_url: &str) {
        if self.config.base_domain.is_some() {
            return;
        }
        if let Ok(url) = Url::parse(start_url)
            && let Some(host) = url.host_str()
        {
            debug!(base_domain = host, "Derived base domain from start URL");
            self.config.base_domain = Some(normalize_domain(host));
        }
    }

    pub fn base_domain(&self) -> Option<&str> {
        self.config.base_domain.as_deref()
    }

    pub fn config(&self) -> &ScorerConfig {
        &self.config
    }

    pub fn record_attempt(&mut self, kind: ActionKind, selector: &str) {
        *self.attempts.entry(edge_key(kind, selector)).or_insert(0) += 1;
    }

    pub fn attempts(&self, kind: ActionKind, selector: &str) -> u32 {
        self.attempts
            .get(&edge_key(kind, selector))
            .copied()
            .unwrap_or(0)
    }

    /// True once the candidate has used up its retries.
    pub fn is_excluded(&self, candidate: &ActionCandidate) -> bool {
        self.attempts(candidate.kind, &candidate.selector) >= self.config.max_retries
    }

    /// True when the URL is on the base domain, or when no restriction applies.
    pub fn is_in_domain(&self, url: &str) -> bool {
        let Some(base) = self.config.base_domain.as_deref() else {
            return true;
        };
        if !self.config.restrict_to_base_domain {
            return true;
        }
        match Url::parse(url).ok().and_then(|u| u.host_str().map(normalize_domain)) {
            Some(host) => host == base,
            None => false,
        }
    }

    pub fn score_action(
        &self,
        candidate: &ActionCandidate,
        context: &ScoringContext<'_>,
    ) -> ActionCandidate {
        let breakdown = self.breakdown(candidate, context);
        let mut scored = candidate.clone();
        scored.breakdown = breakdown;
        scored.priority_score = if candidate.element.disabled {
            DISABLED_SCORE
        } else {
            self.raw_score(&breakdown) * self.decay(candidate)
        };
        scored
    }

    /// Scores and sorts candidates, best first. Exhausted candidates are
    /// dropped; disabled ones are kept at the bottom.
    pub fn rank_actions(
        &self,
        candidates: &[ActionCandidate],
        context: &ScoringContext<'_>,
    ) -> Vec<ActionCandidate> {
        let mut scored: Vec<ActionCandidate> = candidates
            .iter()
            .filter(|c| !self.is_excluded(c))
            .map(|c| self.score_action(c, context))
            .collect();

        // Inputs that unlock a disabled submit must outrank it, or the
        // explorer keeps circling a button it can never press.
        let blocked_submit = scored
            .iter()
            .filter(|c| c.element.disabled && c.element.is_submit)
            .map(|c| self.raw_score(&c.breakdown))
            .fold(None, |best: Option<f64>, s| Some(best.map_or(s, |b| b.max(s))));
        if let Some(blocked) = blocked_submit {
            for candidate in scored.iter_mut().filter(|c| is_enabler(&c.element)) {
                let boosted = (blocked + ENABLER_BONUS) * self.decay(candidate);
                candidate.priority_score = candidate.priority_score.max(boosted);
            }
        }

        scored.sort_by(|a, b| b.priority_score.total_cmp(&a.priority_score));
        scored
    }

    /// The best `n` candidates that can actually be performed.
    pub fn select_top_actions(
        &self,
        candidates: &[ActionCandidate],
        context: &ScoringContext<'_>,
        n: usize,
    ) -> Vec<ActionCandidate> {
        self.rank_actions(candidates, context)
            .into_iter()
            .filter(|c| !c.element.disabled)
            .take(n)
            .collect()
    }

    fn raw_score(&self, breakdown: &ScoreBreakdown) -> f64 {
        let w = &self.config.weights;
        (breakdown.novelty * w.novelty
            + breakdown.business_criticality * w.business_criticality
            + breakdown.risk * w.risk
            + breakdown.branch_factor * w.branch_factor)
            * SCORE_SCALE
    }

    fn decay(&self, candidate: &ActionCandidate) -> f64 {
        let attempts = self.attempts(candidate.kind, &candidate.selector);
        self.config.decay_rate.powi(attempts as i32)
    }

    fn breakdown(&self, candidate: &ActionCandidate, context: &ScoringContext<'_>) -> ScoreBreakdown {
        let element = &candidate.element;
        let mut branch_factor = branch_factor(element);
        if context.preferred_kind == Some(candidate.kind) {
            branch_factor = (branch_factor + 1.0).min(10.0);
        }
        ScoreBreakdown {
            novelty: self.novelty(candidate, context),
            business_criticality: business_criticality(element),
            risk: risk(element),
            branch_factor,
        }
    }

    fn novelty(&self, candidate: &ActionCandidate, context: &ScoringContext<'_>) -> f64 {
        let element = &candidate.element;
        if let Some(href) = element.href.as_deref() {
            if !self.is_in_domain(href) {
                return 0.0;
            }
            return if context.visited_urls.contains(&normalize_url(href)) {
                3.0
            } else {
                10.0
            };
        }

        let interacted = context.interacted.contains(candidate.selector.trim());
        match (interacted, element.is_submit || element.is_form_field()) {
            (true, _) => 2.0,
            (false, true) => 8.0,
            (false, false) => 6.0,
        }
    }
}

fn is_enabler(element: &ElementInfo) -> bool {
    !element.disabled
        && element.is_form_field()
        && (element.enables_disabled_submit || element.required_sibling_unfilled)
}

fn business_criticality(element: &ElementInfo) -> f64 {
    if is_cta(element) {
        10.0
    } else if element.is_submit {
        7.0
    } else if element.is_button_like() {
        5.0
    } else if element.is_form_field() {
        if element.required { 5.0 } else { 4.0 }
    } else if element.in_nav {
        4.0
    } else if element.href.is_some() {
        3.0
    } else {
        2.0
    }
}

fn risk(element: &ElementInfo) -> f64 {
    if element.is_submit {
        9.0
    } else if element.is_form_field() {
        8.0
    } else if element.is_button_like() {
        7.0
    } else if element.expandable {
        6.0
    } else if element.href.is_some() {
        3.0
    } else {
        4.0
    }
}

fn branch_factor(element: &ElementInfo) -> f64 {
    if element.in_form || element.is_form_field() {
        8.0
    } else if element.expandable {
        7.0
    } else if element.is_button_like() {
        5.0
    } else if element.href.is_some() {
        4.0
    } else {
        3.0
    }
}

fn normalize_domain(domain: &str) -> String {
    let domain = domain.trim().trim_end_matches('.').to_lowercase();
    domain
        .strip_prefix("www.")
        .map(str::to_string)
        .unwrap_or(domain)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_domain_strips_www() {
        assert_eq!(normalize_domain("WWW.Example.com"), "example.com");
        assert_eq!(normalize_domain("app.example.com"), "app.example.com");
    }

    #[test]
    fn test_cta_detection_uses_labels() {
        let element = ElementInfo {
            tag: "a".to_string(),
            aria_label: Some("Start free trial".to_string()),
            ..ElementInfo::default()
        };
        assert!(is_cta(&element));

        let element = ElementInfo {
            tag: "button".to_string(),
            text: "Learn More".to_string(),
            ..ElementInfo::default()
        };
        assert!(!is_cta(&element));

        for text in ["Buyer guide", "Rejoin the discussion", "Buy now"] {
            let element = ElementInfo {
                tag: "a".to_string(),
                text: text.to_string(),
                ..ElementInfo::default()
            };
            assert_eq!(is_cta(&element), text == "Buy now", "{}", text);
        }
    }

    #[test]
    fn test_derive_base_domain_keeps_explicit_value() {
        let mut scorer = ActionScorer::new(ScorerConfig {
            base_domain: Some("example.com".to_string()),
            ..ScorerConfig::default()
        });
        scorer.derive_base_domain("https://shop.other.org/");
        assert_eq!(scorer.base_domain(), Some("example.com"));
    }
}
