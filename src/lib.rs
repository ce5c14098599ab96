//! Taxis: Hierarchical Step Orchestration for Rust
//!
//! `taxis` (τάξις, Greek for "arrangement" or "ordering") is an in-process
//! orchestrator for hierarchical units of work. Steps carry priority-ordered
//! queues of children that run strictly before or after them, hooks can
//! spawn further children dynamically, same-priority siblings run
//! concurrently, and a global concurrency ceiling bounds how many execute at
//! once.
//!
//! # Features
//!
//! - **Ordering queues**: before/after child queues with grouped
//!   priority-tier dispatch
//! - **Bounded concurrency**: a FIFO slot pool with optional acquisition
//!   timeouts caps simultaneous execute hooks
//! - **Versioned context**: copy-on-write shared state, updated between
//!   stages, never mutated in place
//! - **Cycle protection**: a name-repetition guard on ancestor chains stops
//!   runaway recursion
//! - **Error routing**: per-stage handlers decide continue-or-stop, with
//!   rollback as the compensating action for unrecoverable execute failures
//! - **Execution tracing**: an optional graph of every visit and ordering
//!   relationship, exportable for rendering
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use taxis::prelude::*;
//!
//! #[derive(Clone)]
//! struct Library {
//!     imported: Vec<String>,
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let fetch = Step::from_fn("fetch", |_ctx: Arc<Library>, _h| async {
//!     Ok(Spawned::None)
//! });
//! let import = Step::from_fn("import", |_ctx: Arc<Library>, handle: StepHandle<Library>| async move {
//!     handle.update_context(|lib| {
//!         let mut next = lib.clone();
//!         next.imported.push("doc-1".into());
//!         next
//!     });
//!     Ok(Spawned::None)
//! });
//! let notify = Step::from_fn("notify", |_ctx: Arc<Library>, _h| async {
//!     Ok(Spawned::None)
//! });
//!
//! import.enqueue_before(fetch, 0).enqueue_after(notify, 0);
//!
//! let executor = Executor::with_defaults([import], Library { imported: Vec::new() });
//! executor.start().await.unwrap();
//!
//! assert_eq!(executor.context().get().imported, vec!["doc-1"]);
//! # }
//! ```
//!
//! # Module Organization
//!
//! Each module hides one set of design decisions:
//!
//! - [`core`]: foundation data structures (priority queues, the versioned
//!   context)
//! - [`trace`]: execution-trace recording (hides the graph representation)
//! - [`executor`]: the step entity and the recursive scheduler (hides the
//!   dispatch strategy)

pub mod core;
pub mod executor;
pub mod trace;

// Re-export commonly used types for convenience. Paths are `self::`-prefixed
// because the builtin `core` crate shadows a bare `core::` in use paths.
pub use self::core::{Context, Error as CoreError, PriorityQueue, Result as CoreResult};

pub use self::executor::{
    ErrorHandlers, ExecutionError, Executor, HookError, LimitError, Options,
    Result as ExecutionResult, SlotPool, Spawned, Stage, StageHandler, Step, StepHandle,
    StepLogic, Verdict,
};

pub use self::trace::{TraceData, TraceEdge, TraceGraph, TraceNode};

// Re-export dependencies used in public API so users don't fight version
// mismatches: hook impls need async_trait, runs need a tokio runtime.
pub use async_trait;
pub use tokio;

/// Prelude module for convenient glob imports
///
/// # Example
///
/// ```
/// use taxis::prelude::*;
/// ```
pub mod prelude {
    pub use crate::core::{Context, PriorityQueue};

    pub use crate::executor::{
        ErrorHandlers, ExecutionError, Executor, HookError, Options, Spawned, Stage, Step,
        StepHandle, StepLogic, Verdict,
    };

    pub use crate::trace::{TraceData, TraceGraph};

    // Commonly used external types
    pub use async_trait::async_trait;
    pub use std::sync::Arc;
}
