use thiserror::Error;

/// Core error type for the taxis step-orchestration engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// A dequeue was attempted on a priority queue with no items.
    ///
    /// This is always an explicit error, never a silent empty batch: a
    /// caller that dequeues an empty queue has a scheduling bug.
    #[error("dequeue on empty priority queue")]
    EmptyQueue,
}

pub type Result<T> = std::result::Result<T, Error>;
