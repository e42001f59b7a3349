//! Cancellation handles supplied by the transport layer.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use thiserror::Error;

/// Failure reported by a cancel handle while aborting its request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Cancel handle failed: {0}")]
pub struct CancelError(pub String);

impl CancelError {
    /// Create a cancel error from any message
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

type CancelFn = dyn Fn() -> Result<(), CancelError> + Send + Sync;

/// Zero-argument capability that aborts one in-flight request.
///
/// Cheap to clone; every clone invokes the same underlying transport callback.
/// The registry only ever *invokes* the handle, it never interrupts I/O itself.
#[derive(Clone)]
pub struct CancelHandle {
    cancel: Arc<CancelFn>,
}

impl CancelHandle {
    /// Wrap a fallible cancel callback
    pub fn new<F>(cancel: F) -> Self
    where
        F: Fn() -> Result<(), CancelError> + Send + Sync + 'static,
    {
        Self {
            cancel: Arc::new(cancel),
        }
    }

    /// Wrap a cancel callback that cannot fail
    pub fn infallible<F>(cancel: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self::new(move || {
            cancel();
            Ok(())
        })
    }

    /// A handle that does nothing when invoked
    #[must_use]
    pub fn noop() -> Self {
        Self::new(|| Ok(()))
    }

    /// Invoke the transport's cancel callback
    ///
    /// # Errors
    ///
    /// Returns whatever [`CancelError`] the transport callback reports.
    pub fn cancel(&self) -> Result<(), CancelError> {
        (self.cancel)()
    }

    /// Invoke the callback, reporting a panic as a [`CancelError`].
    ///
    /// # Errors
    ///
    /// Returns the callback's own error, or one describing the panic.
    pub fn try_cancel(&self) -> Result<(), CancelError> {
        catch_unwind(AssertUnwindSafe(|| (self.cancel)())).unwrap_or_else(|payload| {
            let message = payload
                .downcast_ref::<&str>()
                .map(|m| (*m).to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(CancelError::new(format!("handle panicked: {message}")))
        })
    }

    /// Whether two handles share the same underlying callback
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.cancel, &other.cancel)
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CancelHandle(<callback>)")
    }
}
