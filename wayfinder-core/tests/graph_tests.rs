// Tests for the exploration graph

use wayfinder_core::action::{ActionCandidate, ActionKind, ElementInfo};
use wayfinder_core::config::FingerprintConfig;
use wayfinder_core::fingerprint::{PageObservation, StateFingerprint};
use wayfinder_core::graph::{EdgeStatus, EdgeUpdate, ExplorationGraph, ExplorationStatus, NodeInsert};

fn state(url: &str, body: &str) -> (StateFingerprint, PageObservation) {
    let html = format!("<html><head><title>T</title></head><body>{}</body></html>", body);
    let observation = PageObservation::parse(url, &html, "", &FingerprintConfig::default());
    (StateFingerprint::from_observation(&observation), observation)
}

fn click(selector: &str) -> ActionCandidate {
    ActionCandidate::new(
        selector,
        ActionKind::Click,
        ElementInfo {
            tag: "button".to_string(),
            ..ElementInfo::default()
        },
    )
}

// ============================================================================
// Node Tests
// ============================================================================

#[test]
fn test_revisit_merges_into_existing_node() {
    let mut graph = ExplorationGraph::new(3);
    let (fp, obs) = state("https://example.com/", "<main>Home</main>");

    assert_eq!(
        graph.add_node(&fp, &obs, vec![click("#a"), click("#b")], 0),
        NodeInsert::Created
    );
    let merged = graph.add_node(&fp, &obs, vec![click("#a"), click("#b")], 2);

    assert_eq!(merged, NodeInsert::Merged { new_edges: 0 });
    assert_eq!(graph.node_count(), 1);
    assert_eq!(graph.get_stats().total_nodes, 1);
    let node = graph.get_node(&fp.combined_hash).unwrap();
    assert_eq!(node.visit_count, 2);
    assert_eq!(node.edges.len(), 2);
    // Depth of first discovery is kept
    assert_eq!(node.depth, 0);
}

#[test]
fn test_revisit_appends_only_unseen_edges() {
    let mut graph = ExplorationGraph::new(3);
    let (fp, obs) = state("https://example.com/", "<main>Home</main>");
    graph.add_node(&fp, &obs, vec![click("#a")], 0);

    let merged = graph.add_node(&fp, &obs, vec![click("#a"), click("#late")], 0);
    assert_eq!(merged, NodeInsert::Merged { new_edges: 1 });
    assert_eq!(graph.get_pending_edges(&fp.combined_hash).len(), 2);
}

#[test]
fn test_duplicate_candidates_collapse_to_one_edge() {
    let mut graph = ExplorationGraph::new(3);
    let (fp, obs) = state("https://example.com/", "<main>Home</main>");
    graph.add_node(&fp, &obs, vec![click("#a"), click("#a")], 0);
    assert_eq!(graph.get_node(&fp.combined_hash).unwrap().edges.len(), 1);
}

#[test]
fn test_two_edges_into_known_state_share_one_node() {
    let mut graph = ExplorationGraph::new(3);
    let (home, home_obs) = state("https://example.com/", "<main>Home</main>");
    let (about, about_obs) = state("https://example.com/about", "<main>About</main>");
    graph.add_node(&home, &home_obs, vec![click("#nav-about"), click("#footer-about")], 0);

    for selector in ["#nav-about", "#footer-about"] {
        graph.add_node(&about, &about_obs, vec![], 1);
        graph
            .update_edge(
                &home.combined_hash,
                &click(selector).key(),
                EdgeUpdate::Explored {
                    target_node_id: about.combined_hash.clone(),
                },
            )
            .unwrap();
    }

    let stats = graph.get_stats();
    assert_eq!(stats.total_nodes, 2);
    assert_eq!(stats.explored_edges, 2);
    assert_eq!(graph.get_node(&about.combined_hash).unwrap().visit_count, 2);
    // Parallel edges collapse into one transition
    assert_eq!(stats.transitions, 1);
}

#[test]
fn test_first_node_is_root() {
    let mut graph = ExplorationGraph::new(3);
    let (home, home_obs) = state("https://example.com/", "<main>Home</main>");
    let (about, about_obs) = state("https://example.com/about", "<main>About</main>");
    graph.add_node(&home, &home_obs, vec![], 0);
    graph.add_node(&about, &about_obs, vec![], 1);

    assert_eq!(graph.root_id(), Some(home.combined_hash.as_str()));
    assert!(graph.contains(&about.combined_hash));
}

// ============================================================================
// Edge Tests
// ============================================================================

#[test]
fn test_explored_edge_records_transition() {
    let mut graph = ExplorationGraph::new(3);
    let (home, home_obs) = state("https://example.com/", "<main>Home</main>");
    let (about, about_obs) = state("https://example.com/about", "<main>About</main>");
    graph.add_node(&home, &home_obs, vec![click("#about")], 0);
    graph.add_node(&about, &about_obs, vec![], 1);

    let key = click("#about").key();
    assert!(graph.claim_edge(&home.combined_hash, &key));
    let status = graph
        .update_edge(
            &home.combined_hash,
            &key,
            EdgeUpdate::Explored {
                target_node_id: about.combined_hash.clone(),
            },
        )
        .unwrap();

    assert_eq!(status, EdgeStatus::Explored);
    let node = graph.get_node(&home.combined_hash).unwrap();
    assert_eq!(node.status, ExplorationStatus::Exhausted);
    assert_eq!(
        node.edge(&key).unwrap().target_node_id.as_deref(),
        Some(about.combined_hash.as_str())
    );

    let export = graph.export();
    assert_eq!(export.transitions.len(), 1);
    assert_eq!(export.transitions[0].from, home.combined_hash);
    assert_eq!(export.transitions[0].to, about.combined_hash);
    assert_eq!(export.stats.explored_edges, 1);
}

#[test]
fn test_failed_edge_retried_until_limit() {
    let mut graph = ExplorationGraph::new(2);
    let (fp, obs) = state("https://example.com/", "<main>Home</main>");
    graph.add_node(&fp, &obs, vec![click("#flaky"), click("#ok")], 0);
    let key = click("#flaky").key();
    let fail = || EdgeUpdate::Failed {
        error: "Timeout 30000ms exceeded".to_string(),
    };

    let first = graph.update_edge(&fp.combined_hash, &key, fail()).unwrap();
    assert_eq!(first, EdgeStatus::Pending);
    assert_eq!(graph.get_pending_edges(&fp.combined_hash).len(), 2);
    assert_eq!(
        graph.get_node(&fp.combined_hash).unwrap().status,
        ExplorationStatus::Partial
    );

    let second = graph.update_edge(&fp.combined_hash, &key, fail()).unwrap();
    assert_eq!(second, EdgeStatus::Failed);
    let pending = graph.get_pending_edges(&fp.combined_hash);
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].key, click("#ok").key());
}

#[test]
fn test_claims_are_exclusive_until_resolved() {
    let mut graph = ExplorationGraph::new(3);
    let (fp, obs) = state("https://example.com/", "<main>Home</main>");
    graph.add_node(&fp, &obs, vec![click("#a")], 0);
    let key = click("#a").key();

    assert!(graph.claim_edge(&fp.combined_hash, &key));
    assert!(!graph.claim_edge(&fp.combined_hash, &key));

    graph.release_edge(&fp.combined_hash, &key);
    assert!(graph.claim_edge(&fp.combined_hash, &key));
}

#[test]
fn test_annotation_keeps_edge_pending() {
    let mut graph = ExplorationGraph::new(3);
    let (fp, obs) = state("https://example.com/", "<main>Home</main>");
    graph.add_node(&fp, &obs, vec![click("#a")], 0);
    let key = click("#a").key();

    let status = graph
        .update_edge(
            &fp.combined_hash,
            &key,
            EdgeUpdate::Annotate {
                llm_priority: Some(8),
                rationale: Some("opens settings".to_string()),
                interaction_hint: None,
            },
        )
        .unwrap();

    assert_eq!(status, EdgeStatus::Pending);
    let edge = graph.get_node(&fp.combined_hash).unwrap().edge(&key).unwrap().clone();
    assert_eq!(edge.llm_priority, Some(8));
    assert_eq!(edge.attempt_count, 0);
}

#[test]
fn test_unknown_node_or_edge_is_an_error() {
    let mut graph = ExplorationGraph::new(3);
    assert!(graph.add_edge("missing", click("#a")).is_err());
    assert!(
        graph
            .update_edge(
                "missing",
                "click::#a",
                EdgeUpdate::Skipped {
                    reason: "x".to_string()
                }
            )
            .is_err()
    );
    assert!(graph.get_pending_edges("missing").is_empty());
}

#[test]
fn test_add_edge_ignores_duplicates() {
    let mut graph = ExplorationGraph::new(3);
    let (fp, obs) = state("https://example.com/", "<main>Home</main>");
    graph.add_node(&fp, &obs, vec![], 0);

    assert!(graph.add_edge(&fp.combined_hash, click("#a")).unwrap());
    assert!(!graph.add_edge(&fp.combined_hash, click("#a")).unwrap());
    assert_eq!(graph.get_stats().total_edges, 1);
}
