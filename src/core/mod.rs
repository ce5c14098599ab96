//! Core types for the taxis step-orchestration engine.
//!
//! This module provides the two leaf data structures the executor is built
//! on:
//!
//! - [`PriorityQueue`]: ordered multi-map with grouped tier dequeue, the
//!   backing store for a step's before/after child queues
//! - [`Context`]: versioned copy-on-write snapshot of shared state, the
//!   value threaded through every hook invocation
//!
//! # Error Handling
//! - [`Error`]: core error type
//! - [`Result<T>`]: alias for Results using the core error

mod context;
mod error;
mod queue;

pub use context::Context;
pub use error::{Error, Result};
pub use queue::PriorityQueue;
