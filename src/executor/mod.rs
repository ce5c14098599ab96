//! The step executor: a recursive scheduler that drives a step tree to
//! completion.
//!
//! Each step visit walks the stages `prepare → drain before-queue → acquire
//! slot → execute → spawn immediate children → drain after-queue →
//! finalize`, with a cooperative abort path reachable from any point once
//! the shared cancellation token is set.
//!
//! # Concurrency model
//!
//! Branches interleave cooperatively on the async runtime; "concurrent"
//! means interleaved at suspension points (hook invocations, slot
//! acquisition, batch join barriers), never preemptive. Within one queue
//! tier the whole batch is dispatched together and joined before the next
//! tier starts. Tiers run strictly by descending priority; immediate
//! children returned by execute always run before the after-queue.
//!
//! # Context sharing
//!
//! The executor owns a single versioned context cell. Every stage hands its
//! hook the snapshot current at that stage's dispatch; updates queued
//! through the handle are applied when the hook returns. Parallel siblings
//! therefore do not see each other's updates mid-tier, and concurrent
//! updates resolve last-write-wins. This is inherited, documented
//! nondeterminism, not a bug to paper over.

mod error;
mod handlers;
mod limiter;
mod step;

pub use error::{ExecutionError, HookError, Result, Stage};
pub use handlers::{ErrorHandlers, StageHandler, Verdict};
pub use limiter::{LimitError, Slot, SlotPool, DEFAULT_LIMIT};
pub use step::{Spawned, Step, StepHandle, StepLogic};

use crate::core::Context;
use crate::trace::{TraceData, TraceEdge, TraceGraph, TraceNode};
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default ceiling on how often one step name may recur in a single
/// ancestor chain before the run is judged cyclic.
pub const DEFAULT_MAX_REPETITIONS: usize = 10;

/// Tuning knobs for an [`Executor`].
#[derive(Debug, Clone)]
pub struct Options {
    /// Record the execution-trace graph. Off by default; when off, trace
    /// recording is a no-op and [`Executor::trace_data`] returns empty
    /// lists.
    pub trace: bool,
    /// Maximum occurrences of one step name within a single ancestor chain.
    /// Exceeding it is fatal: the run rejects with
    /// [`ExecutionError::RepetitionExceeded`].
    pub max_repetitions: usize,
    /// Global concurrency ceiling for execute hooks.
    pub limit: usize,
    /// Per-acquisition timeout for a concurrency slot; `None` waits
    /// indefinitely. A timeout surfaces as an execute-stage hook error.
    pub timeout: Option<Duration>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            trace: false,
            max_repetitions: DEFAULT_MAX_REPETITIONS,
            limit: DEFAULT_LIMIT,
            timeout: None,
        }
    }
}

/// Where a visit was scheduled from: the parent's trace node and the queue
/// tier that produced the relationship (`None` for immediate children).
struct Origin {
    parent: String,
    tier: Option<i64>,
}

/// Drives one or more step trees to completion.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use taxis::executor::{ErrorHandlers, Executor, Options, Spawned, Step};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let fetch = Step::from_fn("fetch", |_ctx: Arc<()>, _h| async { Ok(Spawned::None) });
/// let import = Step::from_fn("import", |_ctx: Arc<()>, _h| async { Ok(Spawned::None) });
/// import.enqueue_before(fetch, 0);
///
/// let executor = Executor::new([import], (), ErrorHandlers::new(), Options::default());
/// executor.start().await.unwrap();
/// # }
/// ```
pub struct Executor<C: Send + Sync + 'static> {
    roots: Vec<Arc<Step<C>>>,
    context: Mutex<Context<C>>,
    pool: SlotPool,
    trace: TraceGraph,
    cancel: CancellationToken,
    handlers: ErrorHandlers,
    max_repetitions: usize,
}

impl<C: Send + Sync + 'static> Executor<C> {
    /// Creates an executor over the given root steps and initial context.
    pub fn new(
        roots: impl IntoIterator<Item = Arc<Step<C>>>,
        initial_context: C,
        handlers: ErrorHandlers,
        options: Options,
    ) -> Self {
        Self {
            roots: roots.into_iter().collect(),
            context: Mutex::new(Context::new(initial_context)),
            pool: SlotPool::new(options.limit, options.timeout),
            trace: TraceGraph::new(options.trace),
            cancel: CancellationToken::new(),
            handlers,
            max_repetitions: options.max_repetitions,
        }
    }

    /// Creates an executor with default handlers and options.
    pub fn with_defaults(roots: impl IntoIterator<Item = Arc<Step<C>>>, initial_context: C) -> Self {
        Self::new(roots, initial_context, ErrorHandlers::new(), Options::default())
    }

    /// Runs every root tree to completion, concurrently.
    ///
    /// Resolves `Ok(())` even when hooks failed and the run was aborted: a
    /// default-handled error is logged, the aborted visit is flagged in the
    /// trace, and siblings short-circuit cooperatively. The only failures
    /// that propagate are the fatal repetition guard and an error escaping a
    /// rollback hook.
    pub async fn start(&self) -> Result<()> {
        let visits: Vec<_> = self
            .roots
            .iter()
            .map(|root| self.visit(Arc::clone(root), Vec::new(), None))
            .collect();

        for outcome in join_all(visits).await {
            outcome?;
        }
        Ok(())
    }

    /// Returns the accumulated trace snapshot; empty lists when trace
    /// recording is disabled.
    pub fn trace_data(&self) -> TraceData {
        self.trace.data()
    }

    /// Returns the current context version cell.
    ///
    /// After [`start`](Self::start) resolves, this is the final context the
    /// run produced.
    pub fn context(&self) -> Context<C> {
        self.lock_context().clone()
    }

    /// Returns whether the run was cancelled, either by a handler's stop
    /// verdict or by a hook calling
    /// [`stop_immediate`](StepHandle::stop_immediate).
    pub fn stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// One recursive visit of a step occurrence. The same `Step` instance
    /// may recur at several tree positions; each position is its own visit
    /// with its own trace node.
    fn visit<'a>(
        &'a self,
        step: Arc<Step<C>>,
        parent_chain: Vec<String>,
        origin: Option<Origin>,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            let mut chain = parent_chain;
            chain.push(step.name().to_string());

            // Cycle protection: a heuristic on names along the chain, not a
            // structural check. Fatal, never routed through handlers.
            let occurrences = chain.iter().filter(|name| *name == step.name()).count();
            if occurrences > self.max_repetitions {
                return Err(ExecutionError::RepetitionExceeded {
                    name: step.name().to_string(),
                    occurrences,
                    limit: self.max_repetitions,
                });
            }

            let node_id = Self::node_id(&chain, &step);
            let incoming_tier = origin.as_ref().and_then(|o| o.tier);
            self.trace.add_node(TraceNode {
                id: node_id.clone(),
                label: step.name().to_string(),
                chain: chain.clone(),
                tier: incoming_tier,
                error: false,
            });
            if let Some(origin) = &origin {
                self.trace.add_edge(TraceEdge {
                    from: origin.parent.clone(),
                    to: node_id.clone(),
                    tier: origin.tier,
                });
            }

            if self.cancel.is_cancelled() {
                warn!(step = step.name(), "run cancelled, skipping visit");
                self.trace.set_error(&node_id);
                return Ok(());
            }

            let handle = StepHandle::new(Arc::clone(&step), self.cancel.clone());
            let logic = step.logic();

            debug!(step = step.name(), "preparing");
            let prepared = logic.prepare(self.snapshot(), handle.clone()).await;
            self.apply_updates(&handle);
            if let Err(err) = prepared {
                if self.fail_stage(Stage::Prepare, &err, &step, &node_id) == Verdict::Stop {
                    return Ok(());
                }
            }

            // Drain the before-queue tier by tier: fan out the whole batch,
            // join, then record return edges for the drained children.
            while let Some((tier, batch)) = step.next_before_tier() {
                debug!(step = step.name(), tier, count = batch.len(), "draining before tier");
                let drained = if self.trace.enabled() {
                    batch.clone()
                } else {
                    Vec::new()
                };
                self.run_batch(batch, &chain, &node_id, Some(tier)).await?;
                for child in &drained {
                    let mut child_chain = chain.clone();
                    child_chain.push(child.name().to_string());
                    self.trace.add_edge(TraceEdge {
                        from: Self::node_id(&child_chain, child),
                        to: node_id.clone(),
                        tier: Some(tier),
                    });
                }
                if self.cancel.is_cancelled() {
                    return Ok(());
                }
            }

            debug!(step = step.name(), "awaiting concurrency slot");
            let executed = match self.pool.acquire().await {
                Ok(slot) => {
                    debug!(step = step.name(), "executing");
                    let outcome = logic.execute(self.snapshot(), handle.clone()).await;
                    drop(slot);
                    self.apply_updates(&handle);
                    outcome
                }
                // A slot timeout is an ordinary execute-stage hook error.
                Err(err) => Err(Box::new(err) as HookError),
            };

            let immediate = match executed {
                Ok(spawned) => spawned.into_vec(),
                Err(err) => {
                    if self.fail_stage(Stage::Execute, &err, &step, &node_id) == Verdict::Stop {
                        self.compensate(&step, &handle, &chain, &node_id).await?;
                        return Ok(());
                    }
                    Vec::new()
                }
            };

            if !immediate.is_empty() {
                debug!(step = step.name(), count = immediate.len(), "spawning immediate children");
                self.run_batch(immediate, &chain, &node_id, None).await?;
                if self.cancel.is_cancelled() {
                    return Ok(());
                }
            }

            // After-children are terminal: same batch-drain pattern, no
            // return edges.
            while let Some((tier, batch)) = step.next_after_tier() {
                debug!(step = step.name(), tier, count = batch.len(), "draining after tier");
                self.run_batch(batch, &chain, &node_id, Some(tier)).await?;
                if self.cancel.is_cancelled() {
                    return Ok(());
                }
            }

            debug!(step = step.name(), "finalizing");
            let finalized = logic.finalize(self.snapshot(), handle.clone()).await;
            self.apply_updates(&handle);
            if let Err(err) = finalized {
                // The verdict only decides whether the node is flagged and
                // the run cancelled; there is nothing after finalize to skip.
                let _ = self.fail_stage(Stage::Finalize, &err, &step, &node_id);
            }

            Ok(())
        }
        .boxed()
    }

    /// Fan-out/join barrier: dispatches a batch of child visits together and
    /// waits for every branch before returning.
    async fn run_batch(
        &self,
        batch: Vec<Arc<Step<C>>>,
        chain: &[String],
        parent_node: &str,
        tier: Option<i64>,
    ) -> Result<()> {
        let visits: Vec<_> = batch
            .into_iter()
            .map(|child| {
                self.visit(
                    child,
                    chain.to_vec(),
                    Some(Origin {
                        parent: parent_node.to_string(),
                        tier,
                    }),
                )
            })
            .collect();

        for outcome in join_all(visits).await {
            outcome?;
        }
        Ok(())
    }

    /// Runs the rollback hook after an unrecoverable execute failure.
    ///
    /// Rollback errors are deliberately not routed through the handler
    /// table; they escape `start` as [`ExecutionError::Rollback`]. Children
    /// it spawns are scheduled like immediate ones, though with the run
    /// already cancelled they short-circuit into error-flagged trace nodes.
    async fn compensate(
        &self,
        step: &Arc<Step<C>>,
        handle: &StepHandle<C>,
        chain: &[String],
        node_id: &str,
    ) -> Result<()> {
        debug!(step = step.name(), "rolling back");
        let rolled = step.logic().rollback(self.snapshot(), handle.clone()).await;
        self.apply_updates(handle);
        match rolled {
            Ok(spawned) => {
                let children = spawned.into_vec();
                if !children.is_empty() {
                    self.run_batch(children, chain, node_id, None).await?;
                }
                Ok(())
            }
            Err(source) => Err(ExecutionError::Rollback {
                step: step.name().to_string(),
                source,
            }),
        }
    }

    fn fail_stage(&self, stage: Stage, err: &HookError, step: &Step<C>, node_id: &str) -> Verdict {
        let verdict = self.handlers.handle(stage, err, step.name());
        if verdict == Verdict::Stop {
            warn!(stage = %stage, step = step.name(), "stop verdict, cancelling run");
            self.cancel.cancel();
            self.trace.set_error(node_id);
        }
        verdict
    }

    /// The context snapshot current right now; handed to the next hook.
    fn snapshot(&self) -> Arc<C> {
        self.lock_context().get()
    }

    /// Applies updates a hook queued on its handle. Each application swaps
    /// the cell to a new context version; snapshots already handed out stay
    /// as they were.
    fn apply_updates(&self, handle: &StepHandle<C>) {
        let updates = handle.take_updates();
        if updates.is_empty() {
            return;
        }
        let mut cell = self.lock_context();
        for updater in updates {
            *cell = cell.update(updater);
        }
    }

    fn lock_context(&self) -> std::sync::MutexGuard<'_, Context<C>> {
        self.context
            .lock()
            .expect("Executor context Mutex poisoned - unrecoverable state")
    }

    /// Stable id for a (step, ancestor-path) visit.
    fn node_id(chain: &[String], step: &Step<C>) -> String {
        format!("{}@{}", chain.join("/"), step.id().simple())
    }
}
