// Tests for action scoring

use std::collections::BTreeSet;
use wayfinder_core::action::{ActionCandidate, ActionKind, ElementInfo};
use wayfinder_core::candidates::extract_candidates;
use wayfinder_core::config::ScorerConfig;
use wayfinder_core::coverage::CoverageTracker;
use wayfinder_core::scorer::{ActionScorer, ScoringContext};

fn scorer() -> ActionScorer {
    let mut scorer = ActionScorer::new(ScorerConfig::default());
    scorer.derive_base_domain("https://example.com/");
    scorer
}

fn button(selector: &str, text: &str) -> ActionCandidate {
    ActionCandidate::new(
        selector,
        ActionKind::Click,
        ElementInfo {
            tag: "button".to_string(),
            text: text.to_string(),
            ..ElementInfo::default()
        },
    )
}

fn link(selector: &str, href: &str) -> ActionCandidate {
    ActionCandidate::new(
        selector,
        ActionKind::Click,
        ElementInfo {
            tag: "a".to_string(),
            text: "Link".to_string(),
            href: Some(href.to_string()),
            ..ElementInfo::default()
        },
    )
}

fn empty_context<'a>(
    urls: &'a BTreeSet<String>,
    interacted: &'a BTreeSet<String>,
) -> ScoringContext<'a> {
    ScoringContext {
        visited_urls: urls,
        interacted,
        preferred_kind: None,
    }
}

// ============================================================================
// Score Composition Tests
// ============================================================================

#[test]
fn test_cta_outscores_plain_button() {
    let scorer = scorer();
    let (urls, interacted) = (BTreeSet::new(), BTreeSet::new());
    let context = empty_context(&urls, &interacted);

    let signup = scorer.score_action(&button("#signup", "Sign Up"), &context);
    let more = scorer.score_action(&button("#more", "Learn More"), &context);

    assert!((signup.priority_score - 28.4).abs() < 1e-9);
    assert!((more.priority_score - 23.4).abs() < 1e-9);
    assert_eq!(signup.breakdown.business_criticality, 10.0);
}

#[test]
fn test_off_domain_link_has_no_novelty() {
    let scorer = scorer();
    let (urls, interacted) = (BTreeSet::new(), BTreeSet::new());
    let context = empty_context(&urls, &interacted);

    let away = scorer.score_action(&link("#away", "https://other.example.com/x"), &context);
    let home = scorer.score_action(&link("#home", "https://www.example.com/x"), &context);

    assert_eq!(away.breakdown.novelty, 0.0);
    assert_eq!(home.breakdown.novelty, 10.0);
    assert!(away.priority_score < home.priority_score);
    assert!(!scorer.is_in_domain("https://other.example.com/"));
    assert!(scorer.is_in_domain("https://www.example.com/"));
}

#[test]
fn test_visited_link_loses_novelty() {
    let scorer = scorer();
    let mut coverage = CoverageTracker::new();
    coverage.record_url("https://example.com/docs/");
    let context = ScoringContext::from_coverage(&coverage);

    let docs = scorer.score_action(&link("#docs", "https://example.com/docs"), &context);
    assert_eq!(docs.breakdown.novelty, 3.0);
}

#[test]
fn test_interacted_element_loses_novelty() {
    let scorer = scorer();
    let mut coverage = CoverageTracker::new();
    coverage.record_element_interaction("#more");
    let context = ScoringContext::from_coverage(&coverage);

    let more = scorer.score_action(&button("#more", "Learn More"), &context);
    assert_eq!(more.breakdown.novelty, 2.0);
}

#[test]
fn test_preferred_kind_gets_branch_bonus() {
    let scorer = scorer();
    let (urls, interacted) = (BTreeSet::new(), BTreeSet::new());
    let plain = empty_context(&urls, &interacted);
    let preferring = ScoringContext {
        preferred_kind: Some(ActionKind::Click),
        ..plain
    };

    let a = scorer.score_action(&button("#a", "Open"), &plain);
    let b = scorer.score_action(&button("#a", "Open"), &preferring);
    assert_eq!(b.breakdown.branch_factor, a.breakdown.branch_factor + 1.0);
}

// ============================================================================
// Retry Decay Tests
// ============================================================================

#[test]
fn test_each_attempt_decays_score() {
    let mut scorer = scorer();
    let (urls, interacted) = (BTreeSet::new(), BTreeSet::new());
    let context = empty_context(&urls, &interacted);
    let candidate = button("#more", "Learn More");

    let fresh = scorer.score_action(&candidate, &context).priority_score;
    scorer.record_attempt(ActionKind::Click, "#more");
    let once = scorer.score_action(&candidate, &context).priority_score;
    scorer.record_attempt(ActionKind::Click, "#more");
    let twice = scorer.score_action(&candidate, &context).priority_score;

    assert!((once - fresh * 0.7).abs() < 1e-9);
    assert!((twice - fresh * 0.49).abs() < 1e-9);
}

#[test]
fn test_excluded_after_max_retries() {
    let mut scorer = scorer();
    let (urls, interacted) = (BTreeSet::new(), BTreeSet::new());
    let context = empty_context(&urls, &interacted);
    let candidates = vec![button("#flaky", "Retry me"), button("#other", "Other")];

    for _ in 0..3 {
        scorer.record_attempt(ActionKind::Click, "#flaky");
    }

    assert!(scorer.is_excluded(&candidates[0]));
    let ranked = scorer.rank_actions(&candidates, &context);
    assert_eq!(ranked.len(), 1);
    assert_eq!(ranked[0].selector, "#other");
}

#[test]
fn test_attempts_are_tracked_per_kind() {
    let mut scorer = scorer();
    scorer.record_attempt(ActionKind::Click, "#field");
    assert_eq!(scorer.attempts(ActionKind::Click, "#field"), 1);
    assert_eq!(scorer.attempts(ActionKind::Fill, "#field"), 0);
}

// ============================================================================
// Ranking Tests
// ============================================================================

#[test]
fn test_disabled_candidates_rank_last_and_are_never_selected() {
    let scorer = scorer();
    let (urls, interacted) = (BTreeSet::new(), BTreeSet::new());
    let context = empty_context(&urls, &interacted);
    let mut locked = button("#locked", "Sign Up");
    locked.element.disabled = true;
    let candidates = vec![locked, button("#open", "Open")];

    let ranked = scorer.rank_actions(&candidates, &context);
    assert_eq!(ranked.last().unwrap().selector, "#locked");
    assert_eq!(ranked.last().unwrap().priority_score, 0.1);

    let top = scorer.select_top_actions(&candidates, &context, 5);
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].selector, "#open");
}

#[test]
fn test_required_input_outranks_disabled_submit() {
    let html = r#"<html><body><form id="signup">
        <input id="email" name="email" type="email" required>
        <button id="create" type="submit" disabled>Create account</button>
        <button id="help" type="button">Help</button>
    </form></body></html>"#;
    let candidates = extract_candidates(html, "https://example.com/");
    let scorer = scorer();
    let coverage = CoverageTracker::new();

    let ranked = scorer.rank_actions(&candidates, &ScoringContext::from_coverage(&coverage));
    assert_eq!(ranked[0].selector, "#email");
}
