//! Execution-trace recorder.
//!
//! The executor optionally records one node per step visit and one edge per
//! ordering relationship, for post-hoc inspection or rendering. Recording is
//! gated by a single enabled flag decided at construction; a disabled
//! recorder turns every call into a no-op so the hot path pays nothing.
//!
//! All branches of a run share one recorder, so state lives behind a mutex.
//! Node registration is idempotent per id: a node revisited through queue
//! draining keeps its first registration. Edges are appended unconditionally
//! because a duplicate edge represents a genuinely repeated relationship.

use serde::Serialize;
use std::collections::HashSet;
use std::sync::Mutex;

/// A recorded step visit.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TraceNode {
    /// Stable id for this (step, ancestor-path) visit.
    pub id: String,
    /// Human-readable label, usually the step name.
    pub label: String,
    /// Step names from the root down to this visit.
    pub chain: Vec<String>,
    /// The queue tier this visit was dequeued at, if it came from a queue.
    pub tier: Option<i64>,
    /// Whether the visit was aborted or its stage handler reported failure.
    pub error: bool,
}

/// A recorded ordering relationship between two visits.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TraceEdge {
    /// Node id of the scheduling side.
    pub from: String,
    /// Node id of the scheduled side.
    pub to: String,
    /// The queue tier that produced the relationship; `None` for immediate
    /// children spawned by an execute hook.
    pub tier: Option<i64>,
}

/// Snapshot of everything recorded so far.
#[derive(Debug, Clone, Serialize, Default)]
pub struct TraceData {
    pub nodes: Vec<TraceNode>,
    pub edges: Vec<TraceEdge>,
}

#[derive(Debug, Default)]
struct TraceState {
    nodes: Vec<TraceNode>,
    node_ids: HashSet<String>,
    edges: Vec<TraceEdge>,
}

/// Recorder for the execution-trace graph of a run.
///
/// # Example
///
/// ```
/// use taxis::trace::{TraceGraph, TraceNode, TraceEdge};
///
/// let graph = TraceGraph::new(true);
/// graph.add_node(TraceNode {
///     id: "root".into(),
///     label: "import".into(),
///     chain: vec!["import".into()],
///     tier: None,
///     error: false,
/// });
///
/// let data = graph.data();
/// assert_eq!(data.nodes.len(), 1);
/// assert!(data.edges.is_empty());
/// ```
#[derive(Debug)]
pub struct TraceGraph {
    enabled: bool,
    state: Mutex<TraceState>,
}

impl TraceGraph {
    /// Creates a recorder; when `enabled` is false all calls are no-ops.
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            state: Mutex::new(TraceState::default()),
        }
    }

    /// Returns whether recording is active.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Registers a node once per id.
    ///
    /// Re-adding an existing id is a no-op: the first registration's fields
    /// are never overwritten.
    pub fn add_node(&self, node: TraceNode) {
        if !self.enabled {
            return;
        }
        let mut state = self.lock();
        if state.node_ids.insert(node.id.clone()) {
            state.nodes.push(node);
        }
    }

    /// Appends an edge unconditionally; duplicates are kept.
    pub fn add_edge(&self, edge: TraceEdge) {
        if !self.enabled {
            return;
        }
        self.lock().edges.push(edge);
    }

    /// Flags the node with the given id as failed.
    pub fn set_error(&self, id: &str) {
        if !self.enabled {
            return;
        }
        let mut state = self.lock();
        if let Some(node) = state.nodes.iter_mut().find(|n| n.id == id) {
            node.error = true;
        }
    }

    /// Returns a stable snapshot copy of all nodes and edges.
    ///
    /// Empty when recording is disabled.
    pub fn data(&self) -> TraceData {
        let state = self.lock();
        TraceData {
            nodes: state.nodes.clone(),
            edges: state.edges.clone(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TraceState> {
        self.state
            .lock()
            .expect("TraceGraph Mutex poisoned - unrecoverable state")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str) -> TraceNode {
        TraceNode {
            id: id.to_string(),
            label: id.to_string(),
            chain: vec![id.to_string()],
            tier: None,
            error: false,
        }
    }

    #[test]
    fn test_node_registration_is_idempotent() {
        let graph = TraceGraph::new(true);
        graph.add_node(node("a"));

        // Second registration with different fields must not overwrite.
        graph.add_node(TraceNode {
            label: "changed".to_string(),
            tier: Some(7),
            ..node("a")
        });

        let data = graph.data();
        assert_eq!(data.nodes.len(), 1);
        assert_eq!(data.nodes[0].label, "a");
        assert_eq!(data.nodes[0].tier, None);
    }

    #[test]
    fn test_duplicate_edges_are_kept() {
        let graph = TraceGraph::new(true);
        let edge = TraceEdge {
            from: "a".to_string(),
            to: "b".to_string(),
            tier: Some(0),
        };
        graph.add_edge(edge.clone());
        graph.add_edge(edge);

        assert_eq!(graph.data().edges.len(), 2);
    }

    #[test]
    fn test_disabled_recorder_records_nothing() {
        let graph = TraceGraph::new(false);
        graph.add_node(node("a"));
        graph.add_edge(TraceEdge {
            from: "a".to_string(),
            to: "b".to_string(),
            tier: None,
        });
        graph.set_error("a");

        let data = graph.data();
        assert!(data.nodes.is_empty());
        assert!(data.edges.is_empty());
    }

    #[test]
    fn test_set_error_flags_node() {
        let graph = TraceGraph::new(true);
        graph.add_node(node("a"));
        graph.add_node(node("b"));
        graph.set_error("b");

        let data = graph.data();
        assert!(!data.nodes[0].error);
        assert!(data.nodes[1].error);
    }

    #[test]
    fn test_set_error_on_unknown_id_is_a_no_op() {
        let graph = TraceGraph::new(true);
        graph.add_node(node("a"));
        graph.set_error("missing");
        assert!(!graph.data().nodes[0].error);
    }

    #[test]
    fn test_data_is_a_snapshot_copy() {
        let graph = TraceGraph::new(true);
        graph.add_node(node("a"));
        let before = graph.data();

        graph.add_node(node("b"));
        assert_eq!(before.nodes.len(), 1);
        assert_eq!(graph.data().nodes.len(), 2);
    }

    #[test]
    fn test_snapshot_serializes() {
        let graph = TraceGraph::new(true);
        graph.add_node(node("a"));
        graph.add_edge(TraceEdge {
            from: "a".to_string(),
            to: "a/b".to_string(),
            tier: Some(2),
        });

        let json = serde_json::to_value(graph.data()).unwrap();
        assert_eq!(json["nodes"][0]["id"], "a");
        assert_eq!(json["edges"][0]["tier"], 2);
    }
}
