//! Execution tracing for step runs.
//!
//! The trace is a directed graph: one node per (step, ancestor-path) visit,
//! one edge per ordering relationship, all accumulated during a run and
//! exposed as a serializable snapshot for external rendering.

mod graph;

pub use graph::{TraceData, TraceEdge, TraceGraph, TraceNode};
