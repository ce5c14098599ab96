//! Error types for the execution layer.

use std::fmt;
use thiserror::Error;

/// Error type produced by application step hooks.
///
/// Hooks own their error shapes; the engine treats them opaquely and routes
/// them to the per-stage handler table.
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// The hook stage at which an error was raised.
///
/// Used for handler routing and as a structured log field. Rollback is not a
/// stage here: rollback failures are never routed through a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Prepare,
    Execute,
    Finalize,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Prepare => write!(f, "prepare"),
            Stage::Execute => write!(f, "execute"),
            Stage::Finalize => write!(f, "finalize"),
        }
    }
}

/// Execution layer error type for the taxis engine.
///
/// Only two failures propagate out of
/// [`Executor::start`](crate::executor::Executor::start): the fatal
/// repetition guard and an error escaping a rollback hook. All other hook
/// errors resolve through the handler table and leave `start` returning
/// `Ok(())`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExecutionError {
    /// A step name occurred more often in one ancestor chain than the
    /// configured maximum. This is the cycle-protection heuristic: it counts
    /// names, not structural identity, so deep legitimate recursion past the
    /// threshold and same-named unrelated steps both trip it.
    #[error("step '{name}' occurred {occurrences} times in one ancestor chain (limit {limit}): suspected cycle")]
    RepetitionExceeded {
        name: String,
        occurrences: usize,
        limit: usize,
    },

    /// A rollback hook itself failed. The engine has no handler layer for
    /// rollback failures; the error escapes immediately, with the hook error
    /// preserved as the source.
    #[error("rollback of step '{step}' failed: {source}")]
    Rollback {
        step: String,
        #[source]
        source: HookError,
    },
}

pub type Result<T> = std::result::Result<T, ExecutionError>;
