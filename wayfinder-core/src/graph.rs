//! Exploration graph.
//!
//! Nodes are deduplicated UI states keyed by fingerprint; edges are the
//! candidate actions available from a state. Transitions actually observed
//! are mirrored into a `petgraph` digraph for export.

use crate::action::ActionCandidate;
use crate::error::{ExploreError, Result};
use crate::fingerprint::{PageObservation, StateFingerprint};
use petgraph::dot::Dot;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExplorationStatus {
    Unexplored,
    Partial,
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeStatus {
    Pending,
    Explored,
    Failed,
    Skipped,
}

impl EdgeStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, EdgeStatus::Pending)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    /// `kind::selector`, unique within the owning node.
    pub key: String,
    pub candidate: ActionCandidate,
    pub status: EdgeStatus,
    pub llm_priority: Option<u8>,
    pub rationale: Option<String>,
    pub interaction_hint: Option<String>,
    pub attempt_count: u32,
    pub last_error: Option<String>,
    pub target_node_id: Option<String>,
}

impl GraphEdge {
    pub fn new(candidate: ActionCandidate) -> Self {
        Self {
            key: candidate.key(),
            candidate,
            status: EdgeStatus::Pending,
            llm_priority: None,
            rationale: None,
            interaction_hint: None,
            attempt_count: 0,
            last_error: None,
            target_node_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub url: String,
    pub title: String,
    pub summary: String,
    pub fingerprint: StateFingerprint,
    pub edges: Vec<GraphEdge>,
    pub visit_count: u32,
    pub status: ExplorationStatus,
    /// Depth at which the state was first reached.
    pub depth: usize,
    pub has_search_box: bool,
    pub has_forms: bool,
    pub interactive_count: usize,
}

impl GraphNode {
    pub fn edge(&self, key: &str) -> Option<&GraphEdge> {
        self.edges.iter().find(|e| e.key == key)
    }

    fn refresh_status(&mut self) {
        let any_pending = self.edges.iter().any(|e| e.status == EdgeStatus::Pending);
        let any_touched = self
            .edges
            .iter()
            .any(|e| e.status.is_terminal() || e.attempt_count > 0);
        self.status = if !any_pending {
            ExplorationStatus::Exhausted
        } else if any_touched {
            ExplorationStatus::Partial
        } else {
            ExplorationStatus::Unexplored
        };
    }
}

/// Whether [`ExplorationGraph::add_node`] created a node or merged into one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeInsert {
    Created,
    Merged { new_edges: usize },
}

impl NodeInsert {
    pub fn is_new(&self) -> bool {
        matches!(self, NodeInsert::Created)
    }
}

/// Changes that can be applied to an edge.
#[derive(Debug, Clone, PartialEq)]
pub enum EdgeUpdate {
    /// The action was performed and led to `target_node_id`.
    Explored { target_node_id: String },
    /// The action failed; the edge stays pending until attempts run out.
    Failed { error: String },
    Skipped { reason: String },
    /// Priority and hints from the decision engine.
    Annotate {
        llm_priority: Option<u8>,
        rationale: Option<String>,
        interaction_hint: Option<String>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphStats {
    pub total_nodes: usize,
    pub total_edges: usize,
    pub pending_edges: usize,
    pub explored_edges: usize,
    pub failed_edges: usize,
    pub skipped_edges: usize,
    pub unexplored_nodes: usize,
    pub partial_nodes: usize,
    pub exhausted_nodes: usize,
    pub total_visits: u64,
    pub transitions: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub from: String,
    pub to: String,
    pub action: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphExport {
    pub root: Option<String>,
    pub nodes: Vec<GraphNode>,
    pub transitions: Vec<Transition>,
    pub stats: GraphStats,
}

#[derive(Debug)]
pub struct ExplorationGraph {
    nodes: HashMap<String, GraphNode>,
    insertion_order: Vec<String>,
    root: Option<String>,
    transitions: DiGraph<String, String>,
    node_to_index: HashMap<String, NodeIndex>,
    in_flight: HashSet<(String, String)>,
    max_edge_attempts: u32,
}

impl ExplorationGraph {
    pub fn new(max_edge_attempts: u32) -> Self {
        Self {
            nodes: HashMap::new(),
            insertion_order: Vec::new(),
            root: None,
            transitions: DiGraph::new(),
            node_to_index: HashMap::new(),
            in_flight: HashSet::new(),
            max_edge_attempts: max_edge_attempts.max(1),
        }
    }

    /// Inserts the state, or merges into the existing node with the same
    /// fingerprint: its visit count goes up and unseen edges are appended.
    pub fn add_node(
        &mut self,
        fingerprint: &StateFingerprint,
        observation: &PageObservation,
        candidates: Vec<ActionCandidate>,
        depth: usize,
    ) -> NodeInsert {
        let id = fingerprint.combined_hash.clone();

        if let Some(node) = self.nodes.get_mut(&id) {
            node.visit_count += 1;
            let mut new_edges = 0;
            for candidate in candidates {
                let key = candidate.key();
                if node.edges.iter().all(|e| e.key != key) {
                    node.edges.push(GraphEdge::new(candidate));
                    new_edges += 1;
                }
            }
            node.refresh_status();
            debug!(node = %id, visits = node.visit_count, new_edges, "Merged revisit");
            return NodeInsert::Merged { new_edges };
        }

        let mut edges: Vec<GraphEdge> = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let key = candidate.key();
            if edges.iter().all(|e| e.key != key) {
                edges.push(GraphEdge::new(candidate));
            }
        }

        let mut node = GraphNode {
            id: id.clone(),
            url: observation.url.clone(),
            title: observation.title.clone(),
            summary: observation.summary.clone(),
            fingerprint: fingerprint.clone(),
            edges,
            visit_count: 1,
            status: ExplorationStatus::Unexplored,
            depth,
            has_search_box: observation.has_search_box,
            has_forms: observation.has_forms,
            interactive_count: observation.interactive_count,
        };
        node.refresh_status();
        debug!(node = %id, url = %node.url, edges = node.edges.len(), "New state");

        let index = self.transitions.add_node(id.clone());
        self.node_to_index.insert(id.clone(), index);
        if self.root.is_none() {
            self.root = Some(id.clone());
        }
        self.insertion_order.push(id.clone());
        self.nodes.insert(id, node);
        NodeInsert::Created
    }

    pub fn get_node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn root_id(&self) -> Option<&str> {
        self.root.as_deref()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Applies `update` to a node's descriptive fields. Edges are changed
    /// through [`Self::update_edge`] so status stays consistent.
    pub fn update_node<F>(&mut self, id: &str, update: F) -> Result<()>
    where
        F: FnOnce(&mut GraphNode),
    {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| ExploreError::Other(format!("unknown node {}", id)))?;
        let edge_count = node.edges.len();
        update(node);
        debug_assert!(node.edges.len() >= edge_count, "edges removed from node {}", id);
        node.refresh_status();
        Ok(())
    }

    /// Adds one edge to an existing node. Returns false if it was already there.
    pub fn add_edge(&mut self, node_id: &str, candidate: ActionCandidate) -> Result<bool> {
        let node = self.node_mut(node_id)?;
        let key = candidate.key();
        if node.edges.iter().any(|e| e.key == key) {
            return Ok(false);
        }
        node.edges.push(GraphEdge::new(candidate));
        node.refresh_status();
        Ok(true)
    }

    pub fn update_edge(&mut self, node_id: &str, edge_key: &str, update: EdgeUpdate) -> Result<EdgeStatus> {
        let max_attempts = self.max_edge_attempts;
        let node = self.node_mut(node_id)?;
        let edge = node
            .edges
            .iter_mut()
            .find(|e| e.key == edge_key)
            .ok_or_else(|| ExploreError::Other(format!("unknown edge {} on {}", edge_key, node_id)))?;

        let mut transition = None;
        let resolves = !matches!(update, EdgeUpdate::Annotate { .. });
        match update {
            EdgeUpdate::Explored { target_node_id } => {
                edge.attempt_count += 1;
                edge.status = EdgeStatus::Explored;
                edge.last_error = None;
                transition = Some(target_node_id.clone());
                edge.target_node_id = Some(target_node_id);
            }
            EdgeUpdate::Failed { error } => {
                edge.attempt_count += 1;
                edge.last_error = Some(error);
                if edge.attempt_count >= max_attempts {
                    edge.status = EdgeStatus::Failed;
                }
            }
            EdgeUpdate::Skipped { reason } => {
                edge.status = EdgeStatus::Skipped;
                edge.last_error = Some(reason);
            }
            EdgeUpdate::Annotate {
                llm_priority,
                rationale,
                interaction_hint,
            } => {
                if llm_priority.is_some() {
                    edge.llm_priority = llm_priority;
                }
                if rationale.is_some() {
                    edge.rationale = rationale;
                }
                if interaction_hint.is_some() {
                    edge.interaction_hint = interaction_hint;
                }
            }
        }
        let status = edge.status;
        node.refresh_status();

        if resolves {
            self.in_flight
                .remove(&(node_id.to_string(), edge_key.to_string()));
        }
        if let Some(target) = transition {
            self.record_transition(node_id, &target, edge_key);
        }
        Ok(status)
    }

    /// Pending edges that nobody is currently working on.
    pub fn get_pending_edges(&self, node_id: &str) -> Vec<GraphEdge> {
        let Some(node) = self.nodes.get(node_id) else {
            return Vec::new();
        };
        node.edges
            .iter()
            .filter(|e| {
                e.status == EdgeStatus::Pending
                    && e.attempt_count < self.max_edge_attempts
                    && !self
                        .in_flight
                        .contains(&(node_id.to_string(), e.key.clone()))
            })
            .cloned()
            .collect()
    }

    /// Marks an edge as taken by one session. Returns false if it is not
    /// pending or another session already holds it.
    pub fn claim_edge(&mut self, node_id: &str, edge_key: &str) -> bool {
        let pending = self
            .nodes
            .get(node_id)
            .and_then(|n| n.edge(edge_key))
            .map(|e| e.status == EdgeStatus::Pending)
            .unwrap_or(false);
        pending
            && self
                .in_flight
                .insert((node_id.to_string(), edge_key.to_string()))
    }

    /// Gives up a claim without resolving the edge.
    pub fn release_edge(&mut self, node_id: &str, edge_key: &str) {
        self.in_flight
            .remove(&(node_id.to_string(), edge_key.to_string()));
    }

    pub fn get_stats(&self) -> GraphStats {
        let mut stats = GraphStats {
            total_nodes: self.nodes.len(),
            transitions: self.transitions.edge_count(),
            ..GraphStats::default()
        };
        for node in self.nodes.values() {
            stats.total_visits += u64::from(node.visit_count);
            match node.status {
                ExplorationStatus::Unexplored => stats.unexplored_nodes += 1,
                ExplorationStatus::Partial => stats.partial_nodes += 1,
                ExplorationStatus::Exhausted => stats.exhausted_nodes += 1,
            }
            for edge in &node.edges {
                stats.total_edges += 1;
                match edge.status {
                    EdgeStatus::Pending => stats.pending_edges += 1,
                    EdgeStatus::Explored => stats.explored_edges += 1,
                    EdgeStatus::Failed => stats.failed_edges += 1,
                    EdgeStatus::Skipped => stats.skipped_edges += 1,
                }
            }
        }
        stats
    }

    pub fn export(&self) -> GraphExport {
        let nodes = self
            .insertion_order
            .iter()
            .filter_map(|id| self.nodes.get(id).cloned())
            .collect();
        let transitions = self
            .transitions
            .edge_indices()
            .filter_map(|e| {
                let (from, to) = self.transitions.edge_endpoints(e)?;
                Some(Transition {
                    from: self.transitions[from].clone(),
                    to: self.transitions[to].clone(),
                    action: self.transitions[e].clone(),
                })
            })
            .collect();
        GraphExport {
            root: self.root.clone(),
            nodes,
            transitions,
            stats: self.get_stats(),
        }
    }

    /// Graphviz rendering of the observed transitions.
    pub fn to_dot(&self) -> String {
        format!("{}", Dot::new(&self.transitions))
    }

    fn node_mut(&mut self, id: &str) -> Result<&mut GraphNode> {
        self.nodes
            .get_mut(id)
            .ok_or_else(|| ExploreError::Other(format!("unknown node {}", id)))
    }

    fn record_transition(&mut self, from: &str, to: &str, action: &str) {
        let (Some(&a), Some(&b)) = (self.node_to_index.get(from), self.node_to_index.get(to)) else {
            debug!(from, to, "Transition to a node outside the graph ignored");
            return;
        };
        self.transitions.update_edge(a, b, action.to_string());
    }
}
