//! Versioned, copy-on-write execution context.
//!
//! Shared state visible to step hooks is never mutated in place: every
//! update produces a new `Context` version while snapshots handed out
//! earlier remain valid and unchanged. The executor owns a single context
//! cell and swaps in the newest version between stages; parallel branches
//! therefore resolve concurrent updates last-write-wins (see the executor
//! module for that documented race).

use std::sync::Arc;

/// A versioned immutable snapshot of application-defined state `C`.
///
/// # Example
///
/// ```
/// use taxis::core::Context;
///
/// #[derive(Clone)]
/// struct State { imported: u32 }
///
/// let ctx = Context::new(State { imported: 0 });
/// let snapshot = ctx.get();
///
/// let next = ctx.update(|s| State { imported: s.imported + 1 });
///
/// // The old snapshot is untouched by the update.
/// assert_eq!(snapshot.imported, 0);
/// assert_eq!(next.get().imported, 1);
/// assert_eq!(next.version(), ctx.version() + 1);
/// ```
#[derive(Debug)]
pub struct Context<C> {
    snapshot: Arc<C>,
    version: u64,
}

impl<C> Clone for Context<C> {
    fn clone(&self) -> Self {
        Self {
            snapshot: Arc::clone(&self.snapshot),
            version: self.version,
        }
    }
}

impl<C> Context<C> {
    /// Wraps an initial value as version 0.
    pub fn new(value: C) -> Self {
        Self {
            snapshot: Arc::new(value),
            version: 0,
        }
    }

    /// Returns the current immutable snapshot.
    ///
    /// The snapshot is shared, not copied; holding it never blocks updates,
    /// and no later update can alter what it contains.
    pub fn get(&self) -> Arc<C> {
        Arc::clone(&self.snapshot)
    }

    /// Returns the version number of this snapshot.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Builds the successor version from the current snapshot.
    ///
    /// The updater receives the current value and returns the full next
    /// value; this `Context` is unaffected and stays at its own version.
    /// There is no notification mechanism: observers re-fetch from whatever
    /// cell holds the newest version.
    pub fn update<F>(&self, updater: F) -> Context<C>
    where
        F: FnOnce(&C) -> C,
    {
        Context {
            snapshot: Arc::new(updater(&self.snapshot)),
            version: self.version + 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct State {
        count: u32,
        label: String,
    }

    fn initial() -> State {
        State {
            count: 0,
            label: "start".to_string(),
        }
    }

    #[test]
    fn test_update_produces_new_version() {
        let ctx = Context::new(initial());
        assert_eq!(ctx.version(), 0);

        let next = ctx.update(|s| State {
            count: s.count + 1,
            ..s.clone()
        });

        assert_eq!(next.version(), 1);
        assert_eq!(next.get().count, 1);
    }

    #[test]
    fn test_old_snapshot_unaffected_by_update() {
        let ctx = Context::new(initial());
        let before = ctx.get();

        let _next = ctx.update(|s| State {
            count: 99,
            ..s.clone()
        });

        // The reference obtained before the update still sees the old value,
        // and the source context itself is unchanged.
        assert_eq!(before.count, 0);
        assert_eq!(ctx.get().count, 0);
        assert_eq!(ctx.version(), 0);
    }

    #[test]
    fn test_chained_updates_version_monotonically() {
        let ctx = Context::new(initial());
        let v1 = ctx.update(|s| State {
            label: format!("{}-a", s.label),
            ..s.clone()
        });
        let v2 = v1.update(|s| State {
            label: format!("{}-b", s.label),
            ..s.clone()
        });

        assert_eq!(v2.version(), 2);
        assert_eq!(v2.get().label, "start-a-b");
        assert_eq!(v1.get().label, "start-a");
        assert_eq!(ctx.get().label, "start");
    }

    #[test]
    fn test_clone_shares_snapshot() {
        let ctx = Context::new(initial());
        let cloned = ctx.clone();
        assert!(Arc::ptr_eq(&ctx.get(), &cloned.get()));
        assert_eq!(cloned.version(), ctx.version());
    }
}
