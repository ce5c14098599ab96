//! The step entity: lifecycle hooks plus ordering queues.
//!
//! A step couples a unit of work (the [`StepLogic`] hooks) with two priority
//! queues of child steps: the before-queue runs strictly before the step's
//! own execute, the after-queue strictly after. Children can also be spawned
//! dynamically by the value an execute hook returns.
//!
//! Queue draining and internal accessors are `pub(crate)`: only the executor
//! is meant to consume a step's queues, while application code only attaches
//! children and supplies hooks.

use crate::core::PriorityQueue;
use async_trait::async_trait;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::error::HookError;

/// Children yielded by an execute (or, rarely, rollback) hook.
///
/// These "immediate" children are scheduled right after the hook returns and
/// before the step's after-queue is drained.
pub enum Spawned<C> {
    /// No children.
    None,
    /// A single child step.
    One(Arc<Step<C>>),
    /// Several child steps, dispatched together like one queue tier.
    Many(Vec<Arc<Step<C>>>),
}

impl<C> Spawned<C> {
    pub(crate) fn into_vec(self) -> Vec<Arc<Step<C>>> {
        match self {
            Spawned::None => Vec::new(),
            Spawned::One(step) => vec![step],
            Spawned::Many(steps) => steps,
        }
    }
}

impl<C> Default for Spawned<C> {
    fn default() -> Self {
        Spawned::None
    }
}

impl<C> From<Arc<Step<C>>> for Spawned<C> {
    fn from(step: Arc<Step<C>>) -> Self {
        Spawned::One(step)
    }
}

impl<C> From<Vec<Arc<Step<C>>>> for Spawned<C> {
    fn from(steps: Vec<Arc<Step<C>>>) -> Self {
        Spawned::Many(steps)
    }
}

/// The behavior of a step: four lifecycle hooks, all optional except
/// `execute`.
///
/// Each hook receives the context snapshot current at its own dispatch time
/// and a per-visit [`StepHandle`]. Parallel sibling branches do not see each
/// other's context updates mid-tier; updates requested through the handle
/// are applied by the executor between stages.
///
/// `prepare` and `finalize` are lifecycle bookends and cannot yield
/// children. (`finalize` is the original "final" hook; `final` is a reserved
/// word in Rust.)
///
/// # Example
///
/// ```
/// use async_trait::async_trait;
/// use taxis::executor::{HookError, Spawned, StepHandle, StepLogic};
///
/// struct ImportDocument {
///     path: String,
/// }
///
/// struct Library;
///
/// #[async_trait]
/// impl StepLogic<Library> for ImportDocument {
///     async fn execute(
///         &self,
///         _ctx: std::sync::Arc<Library>,
///         _handle: StepHandle<Library>,
///     ) -> Result<Spawned<Library>, HookError> {
///         // import self.path ...
///         Ok(Spawned::None)
///     }
/// }
/// ```
#[async_trait]
pub trait StepLogic<C: Send + Sync + 'static>: Send + Sync {
    /// Runs before the step's before-queue is drained. May attach further
    /// children via `handle.step()`.
    async fn prepare(&self, _ctx: Arc<C>, _handle: StepHandle<C>) -> Result<(), HookError> {
        Ok(())
    }

    /// The step's actual effect. Runs under a concurrency slot. The returned
    /// [`Spawned`] children are scheduled before the after-queue.
    async fn execute(&self, ctx: Arc<C>, handle: StepHandle<C>) -> Result<Spawned<C>, HookError>;

    /// Compensating action, invoked only when an execute-stage error is
    /// judged unrecoverable by the handler table. Errors raised here escape
    /// the engine.
    async fn rollback(
        &self,
        _ctx: Arc<C>,
        _handle: StepHandle<C>,
    ) -> Result<Spawned<C>, HookError> {
        Ok(Spawned::None)
    }

    /// Runs after the after-queue is drained, whether or not earlier hooks
    /// of other steps failed recoverably.
    async fn finalize(&self, _ctx: Arc<C>, _handle: StepHandle<C>) -> Result<(), HookError> {
        Ok(())
    }
}

/// Adapter lifting a bare execute closure into a full [`StepLogic`].
struct FnStep<C, F> {
    f: F,
    _marker: PhantomData<fn(C)>,
}

#[async_trait]
impl<C, F, Fut> StepLogic<C> for FnStep<C, F>
where
    C: Send + Sync + 'static,
    F: Fn(Arc<C>, StepHandle<C>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Spawned<C>, HookError>> + Send,
{
    async fn execute(&self, ctx: Arc<C>, handle: StepHandle<C>) -> Result<Spawned<C>, HookError> {
        (self.f)(ctx, handle).await
    }
}

/// A unit of work with ordering queues.
///
/// Steps are shared via `Arc`: the same instance may be attached at several
/// tree positions, and each position is a distinct visit at execution time.
/// Identity is a `Uuid` assigned at construction and never reused; the name
/// is a human-readable label with no uniqueness requirement (but note that
/// the executor's cycle guard counts names along an ancestor chain).
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use taxis::executor::{Spawned, Step};
///
/// let import = Step::from_fn("import", |_ctx: Arc<()>, _handle| async {
///     Ok(Spawned::None)
/// });
/// let fetch = Step::from_fn("fetch", |_ctx: Arc<()>, _handle| async {
///     Ok(Spawned::None)
/// });
/// let notify = Step::from_fn("notify", |_ctx: Arc<()>, _handle| async {
///     Ok(Spawned::None)
/// });
///
/// import.enqueue_before(fetch, 0).enqueue_after(notify, 0);
/// ```
pub struct Step<C> {
    id: Uuid,
    name: String,
    logic: Arc<dyn StepLogic<C>>,
    before: Mutex<PriorityQueue<Arc<Step<C>>>>,
    after: Mutex<PriorityQueue<Arc<Step<C>>>>,
}

impl<C: Send + Sync + 'static> Step<C> {
    /// Wraps a hook set as a step with a fresh unique id.
    pub fn new(name: impl Into<String>, logic: impl StepLogic<C> + 'static) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            name: name.into(),
            logic: Arc::new(logic),
            before: Mutex::new(PriorityQueue::new()),
            after: Mutex::new(PriorityQueue::new()),
        })
    }

    /// Wraps a bare execute closure as a step.
    ///
    /// This covers hook sets that need no prepare/rollback/finalize; for the
    /// full lifecycle implement [`StepLogic`] and use [`Step::new`].
    pub fn from_fn<F, Fut>(name: impl Into<String>, f: F) -> Arc<Self>
    where
        F: Fn(Arc<C>, StepHandle<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Spawned<C>, HookError>> + Send + 'static,
    {
        Self::new(
            name,
            FnStep {
                f,
                _marker: PhantomData,
            },
        )
    }

    /// Returns the stable unique id assigned at construction.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Returns the human-readable name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attaches a child to run strictly before this step's execute.
    ///
    /// Returns `&self` for builder-style chaining. Attaching is effective at
    /// any time before this step's before-queue drains its last tier, which
    /// includes calls made from within this step's own prepare hook.
    pub fn enqueue_before(&self, child: Arc<Step<C>>, priority: i64) -> &Self {
        self.lock_before().enqueue(child, priority);
        self
    }

    /// Attaches several before-children at one priority tier.
    pub fn enqueue_before_all(
        &self,
        children: impl IntoIterator<Item = Arc<Step<C>>>,
        priority: i64,
    ) -> &Self {
        self.lock_before().enqueue_all(children, priority);
        self
    }

    /// Attaches a child to run strictly after this step's execute and its
    /// immediate children.
    pub fn enqueue_after(&self, child: Arc<Step<C>>, priority: i64) -> &Self {
        self.lock_after().enqueue(child, priority);
        self
    }

    /// Attaches several after-children at one priority tier.
    pub fn enqueue_after_all(
        &self,
        children: impl IntoIterator<Item = Arc<Step<C>>>,
        priority: i64,
    ) -> &Self {
        self.lock_after().enqueue_all(children, priority);
        self
    }

    pub(crate) fn logic(&self) -> Arc<dyn StepLogic<C>> {
        Arc::clone(&self.logic)
    }

    /// Removes and returns the next before-queue tier, or `None` when the
    /// queue is empty.
    pub(crate) fn next_before_tier(&self) -> Option<(i64, Vec<Arc<Step<C>>>)> {
        self.lock_before().dequeue().ok()
    }

    /// Removes and returns the next after-queue tier, or `None` when the
    /// queue is empty.
    pub(crate) fn next_after_tier(&self) -> Option<(i64, Vec<Arc<Step<C>>>)> {
        self.lock_after().dequeue().ok()
    }

    fn lock_before(&self) -> std::sync::MutexGuard<'_, PriorityQueue<Arc<Step<C>>>> {
        self.before
            .lock()
            .expect("Step before-queue Mutex poisoned - unrecoverable state")
    }

    fn lock_after(&self) -> std::sync::MutexGuard<'_, PriorityQueue<Arc<Step<C>>>> {
        self.after
            .lock()
            .expect("Step after-queue Mutex poisoned - unrecoverable state")
    }
}

impl<C> std::fmt::Debug for Step<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

type Updater<C> = Box<dyn FnOnce(&C) -> C + Send>;

struct HandleInner<C> {
    step: Arc<Step<C>>,
    cancel: CancellationToken,
    updates: Mutex<Vec<Updater<C>>>,
}

/// Per-visit handle passed to every hook invocation.
///
/// Cloning is cheap; all clones refer to the same visit.
pub struct StepHandle<C> {
    inner: Arc<HandleInner<C>>,
}

impl<C> Clone for StepHandle<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Send + Sync + 'static> StepHandle<C> {
    pub(crate) fn new(step: Arc<Step<C>>, cancel: CancellationToken) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                step,
                cancel,
                updates: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Requests cooperative cancellation of the whole run.
    ///
    /// Hooks already in flight are not preempted; the flag only prevents new
    /// visits and stages from starting.
    pub fn stop_immediate(&self) {
        self.inner.cancel.cancel();
    }

    /// Queues a context update to be applied by the executor once the
    /// current hook returns.
    ///
    /// Updates from parallel sibling branches resolve last-write-wins at the
    /// executor's context cell; siblings do not see each other's updates
    /// mid-tier.
    pub fn update_context<F>(&self, updater: F)
    where
        F: FnOnce(&C) -> C + Send + 'static,
    {
        self.inner
            .updates
            .lock()
            .expect("StepHandle updates Mutex poisoned - unrecoverable state")
            .push(Box::new(updater));
    }

    /// The step this visit belongs to, letting a prepare hook attach further
    /// children.
    ///
    /// Attaching from within execute cannot affect the before-queue of the
    /// current visit: it has already been drained. Only the execute return
    /// value injects children at that point.
    pub fn step(&self) -> &Arc<Step<C>> {
        &self.inner.step
    }

    pub(crate) fn take_updates(&self) -> Vec<Updater<C>> {
        std::mem::take(
            &mut *self
                .inner
                .updates
                .lock()
                .expect("StepHandle updates Mutex poisoned - unrecoverable state"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(name: &str) -> Arc<Step<()>> {
        Step::from_fn(name, |_ctx: Arc<()>, _handle| async { Ok(Spawned::None) })
    }

    #[test]
    fn test_step_ids_are_unique_and_stable() {
        let a = noop("same-name");
        let b = noop("same-name");
        assert_ne!(a.id(), b.id());
        assert_eq!(a.id(), a.id());
        assert_eq!(a.name(), b.name());
    }

    #[test]
    fn test_enqueue_chaining_builds_both_queues() {
        let root = noop("root");
        root.enqueue_before(noop("b1"), 1)
            .enqueue_before(noop("b2"), 1)
            .enqueue_after(noop("a1"), 0);

        let (tier, batch) = root.next_before_tier().unwrap();
        assert_eq!(tier, 1);
        assert_eq!(batch.len(), 2);
        assert!(root.next_before_tier().is_none());

        let (tier, batch) = root.next_after_tier().unwrap();
        assert_eq!(tier, 0);
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn test_enqueue_all_forms_single_tier() {
        let root = noop("root");
        root.enqueue_after_all([noop("x"), noop("y"), noop("z")], 3);

        let (tier, batch) = root.next_after_tier().unwrap();
        assert_eq!(tier, 3);
        assert_eq!(batch.len(), 3);
    }

    #[test]
    fn test_spawned_normalization() {
        let step = noop("s");
        assert!(Spawned::<()>::None.into_vec().is_empty());
        assert_eq!(Spawned::from(Arc::clone(&step)).into_vec().len(), 1);
        assert_eq!(
            Spawned::from(vec![Arc::clone(&step), step]).into_vec().len(),
            2
        );
    }

    #[tokio::test]
    async fn test_handle_queues_updates_until_taken() {
        let step: Arc<Step<u32>> =
            Step::from_fn("s", |_ctx: Arc<u32>, _handle| async { Ok(Spawned::None) });
        let handle = StepHandle::new(step, CancellationToken::new());

        handle.update_context(|n| n + 1);
        handle.update_context(|n| n * 2);

        let updates = handle.take_updates();
        assert_eq!(updates.len(), 2);
        assert!(handle.take_updates().is_empty());

        let mut value = 10u32;
        for f in updates {
            value = f(&value);
        }
        assert_eq!(value, 22);
    }

    #[tokio::test]
    async fn test_stop_immediate_sets_shared_token() {
        let token = CancellationToken::new();
        let handle = StepHandle::new(noop("s"), token.clone());
        assert!(!token.is_cancelled());
        handle.stop_immediate();
        assert!(token.is_cancelled());
    }
}
