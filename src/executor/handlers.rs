//! Per-stage error handler table.
//!
//! Hook errors are recoverable in the sense that they are always routed to a
//! handler; whether the run halts depends entirely on the handler's verdict.
//! The default handler preserves the original behavior (log the error, stop
//! the run) while being swappable for tests or embedding applications.

use std::sync::Arc;
use tracing::error;

use super::error::{HookError, Stage};

/// A handler's decision about a failed hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Let this visit proceed to its next stage; the run keeps going.
    Continue,
    /// Flag the visit as failed and cancel the whole run cooperatively.
    Stop,
}

/// A caller-supplied handler for one stage: receives the hook error and the
/// failing step's name.
pub type StageHandler = Arc<dyn Fn(&HookError, &str) -> Verdict + Send + Sync>;

/// Optional per-stage handlers for `prepare`, `execute`, and `finalize`.
///
/// A stage without a handler falls back to the default: log the error with
/// its step and stage context, and stop the run.
///
/// # Example
///
/// ```
/// use taxis::executor::{ErrorHandlers, Verdict};
///
/// let handlers = ErrorHandlers::new()
///     .on_execute(|_error, step| {
///         if step == "optional-cleanup" {
///             Verdict::Continue
///         } else {
///             Verdict::Stop
///         }
///     });
/// # let _ = handlers;
/// ```
#[derive(Clone, Default)]
pub struct ErrorHandlers {
    prepare: Option<StageHandler>,
    execute: Option<StageHandler>,
    finalize: Option<StageHandler>,
}

impl ErrorHandlers {
    /// Creates an empty table; every stage uses the default handler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the handler for prepare-stage errors.
    pub fn on_prepare<F>(mut self, handler: F) -> Self
    where
        F: Fn(&HookError, &str) -> Verdict + Send + Sync + 'static,
    {
        self.prepare = Some(Arc::new(handler));
        self
    }

    /// Sets the handler for execute-stage errors (including concurrency-slot
    /// acquisition timeouts, which surface at this stage).
    pub fn on_execute<F>(mut self, handler: F) -> Self
    where
        F: Fn(&HookError, &str) -> Verdict + Send + Sync + 'static,
    {
        self.execute = Some(Arc::new(handler));
        self
    }

    /// Sets the handler for finalize-stage errors.
    pub fn on_finalize<F>(mut self, handler: F) -> Self
    where
        F: Fn(&HookError, &str) -> Verdict + Send + Sync + 'static,
    {
        self.finalize = Some(Arc::new(handler));
        self
    }

    /// Routes an error to the stage's handler, or to the default
    /// log-and-stop behavior when none is set.
    pub(crate) fn handle(&self, stage: Stage, err: &HookError, step: &str) -> Verdict {
        let handler = match stage {
            Stage::Prepare => &self.prepare,
            Stage::Execute => &self.execute,
            Stage::Finalize => &self.finalize,
        };

        match handler {
            Some(handler) => handler(err, step),
            None => {
                error!(stage = %stage, step, error = %err, "step hook failed, stopping run");
                Verdict::Stop
            }
        }
    }
}

impl std::fmt::Debug for ErrorHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorHandlers")
            .field("prepare", &self.prepare.is_some())
            .field("execute", &self.execute.is_some())
            .field("finalize", &self.finalize.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boxed(msg: &str) -> HookError {
        msg.to_string().into()
    }

    #[test]
    fn test_default_handler_stops() {
        let handlers = ErrorHandlers::new();
        let err = boxed("boom");
        assert_eq!(handlers.handle(Stage::Execute, &err, "x"), Verdict::Stop);
        assert_eq!(handlers.handle(Stage::Prepare, &err, "x"), Verdict::Stop);
        assert_eq!(handlers.handle(Stage::Finalize, &err, "x"), Verdict::Stop);
    }

    // The fallback path emits exactly one error event, carrying the stage,
    // step, and error as structured fields.
    #[test]
    fn test_default_handler_logs_once_with_context() {
        #[derive(Clone)]
        struct Sink(Arc<std::sync::Mutex<Vec<u8>>>);

        impl std::io::Write for Sink {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }

            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let captured = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Sink(Arc::clone(&captured));
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || sink.clone())
            .without_time()
            .finish();

        let handlers = ErrorHandlers::new();
        let err = boxed("import exploded");
        let verdict = tracing::subscriber::with_default(subscriber, || {
            handlers.handle(Stage::Execute, &err, "importer")
        });

        assert_eq!(verdict, Verdict::Stop);
        let output = String::from_utf8(captured.lock().unwrap().clone()).unwrap();
        assert_eq!(output.matches("step hook failed, stopping run").count(), 1);
        assert!(output.contains("execute"));
        assert!(output.contains("importer"));
        assert!(output.contains("import exploded"));
    }

    #[test]
    fn test_custom_handler_is_routed_per_stage() {
        let handlers = ErrorHandlers::new()
            .on_prepare(|_, _| Verdict::Continue)
            .on_finalize(|_, step| {
                if step == "tolerant" {
                    Verdict::Continue
                } else {
                    Verdict::Stop
                }
            });

        let err = boxed("boom");
        assert_eq!(handlers.handle(Stage::Prepare, &err, "x"), Verdict::Continue);
        // No execute handler set: default applies.
        assert_eq!(handlers.handle(Stage::Execute, &err, "x"), Verdict::Stop);
        assert_eq!(
            handlers.handle(Stage::Finalize, &err, "tolerant"),
            Verdict::Continue
        );
        assert_eq!(handlers.handle(Stage::Finalize, &err, "other"), Verdict::Stop);
    }

    #[test]
    fn test_handler_sees_error_and_step_name() {
        let handlers = ErrorHandlers::new().on_execute(|err, step| {
            assert_eq!(err.to_string(), "slot timed out");
            assert_eq!(step, "importer");
            Verdict::Continue
        });
        let err = boxed("slot timed out");
        assert_eq!(
            handlers.handle(Stage::Execute, &err, "importer"),
            Verdict::Continue
        );
    }
}
