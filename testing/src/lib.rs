//! # Cancelable Requests Testing
//!
//! Testing utilities and helpers for the cancelable requests workspace.
//!
//! This crate provides:
//! - Deterministic implementations of the environment traits (clocks, ids)
//! - Counting and failing cancel handles
//! - A scripted in-memory [`MockTransport`]
//! - A one-call tracing subscriber for test output
//!
//! ## Example
//!
//! ```ignore
//! use cancelable_requests_testing::{MockTransport, init_test_tracing};
//! use cancelable_requests_runtime::{CancelableClient, RequestOptions};
//!
//! #[tokio::test]
//! async fn test_supersession() {
//!     init_test_tracing();
//!     let transport = MockTransport::new();
//!     let first = transport.script("/api/users");
//!     let client = CancelableClient::new(transport.clone(), registry);
//!     // ...
//! }
//! ```

use cancelable_requests_core::environment::{Clock, IdGenerator};
use cancelable_requests_core::{CancelError, CancelHandle, ComponentId};
use chrono::{DateTime, Utc};

/// Scripted in-memory transport
pub mod transport;

pub use transport::{MockError, MockRequest, MockResponder, MockTransport};

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, ComponentId, DateTime, IdGenerator, Utc};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Mutex, PoisonError};
    use std::time::Duration;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use cancelable_requests_testing::mocks::FixedClock;
    /// use cancelable_requests_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when a test advances it
    ///
    /// Used to age tombstones past the sweep cutoff without sleeping.
    #[derive(Debug)]
    pub struct SteppingClock {
        time: Mutex<DateTime<Utc>>,
    }

    impl SteppingClock {
        /// Start the clock at `start`
        #[must_use]
        pub const fn new(start: DateTime<Utc>) -> Self {
            Self {
                time: Mutex::new(start),
            }
        }

        /// Move the clock forward.
        ///
        /// Durations beyond chrono's range saturate to no movement.
        pub fn advance(&self, by: Duration) {
            if let Ok(delta) = chrono::Duration::from_std(by) {
                let mut time = self.time.lock().unwrap_or_else(PoisonError::into_inner);
                if let Some(next) = time.checked_add_signed(delta) {
                    *time = next;
                }
            }
        }
    }

    impl Clock for SteppingClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// Predictable component identities: `component-0`, `component-1`, ...
    #[derive(Debug, Default)]
    pub struct SequentialIds {
        next: AtomicU64,
    }

    impl SequentialIds {
        /// Generator starting at zero
        #[must_use]
        pub const fn new() -> Self {
            Self {
                next: AtomicU64::new(0),
            }
        }
    }

    impl IdGenerator for SequentialIds {
        fn next_component_id(&self) -> ComponentId {
            let n = self.next.fetch_add(1, Ordering::Relaxed);
            ComponentId::new(format!("component-{n}"))
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(test_epoch())
    }

    /// 2025-01-01 00:00:00 UTC, the start time of test clocks
    ///
    /// # Panics
    ///
    /// Never in practice; the timestamp is hardcoded.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_epoch() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .expect("hardcoded timestamp should always parse")
            .with_timezone(&Utc)
    }
}

/// Cancel handles that record how they were used
pub mod handles {
    use super::{CancelError, CancelHandle};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Shared invocation counter of a [`counting_handle`]
    #[derive(Debug, Clone, Default)]
    pub struct CallCounter(Arc<AtomicUsize>);

    impl CallCounter {
        /// How many times the handle ran
        #[must_use]
        pub fn count(&self) -> usize {
            self.0.load(Ordering::SeqCst)
        }

        fn bump(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Handle that counts its invocations
    #[must_use]
    pub fn counting_handle() -> (CancelHandle, CallCounter) {
        let counter = CallCounter::default();
        let inner = counter.clone();
        (CancelHandle::infallible(move || inner.bump()), counter)
    }

    /// Handle that counts its invocations and always fails
    #[must_use]
    pub fn failing_handle(message: &'static str) -> (CancelHandle, CallCounter) {
        let counter = CallCounter::default();
        let inner = counter.clone();
        let handle = CancelHandle::new(move || {
            inner.bump();
            Err(CancelError::new(message))
        });
        (handle, counter)
    }
}

/// Install a fmt subscriber honouring `RUST_LOG` for test output.
///
/// Safe to call from every test; only the first call installs.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use handles::{CallCounter, counting_handle, failing_handle};
pub use mocks::{FixedClock, SequentialIds, SteppingClock, test_clock, test_epoch};

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can unwrap
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());
        assert_eq!(clock.now(), test_epoch());
    }

    #[test]
    fn test_stepping_clock_advances() {
        let clock = SteppingClock::new(test_epoch());
        clock.advance(Duration::from_secs(90));
        assert_eq!((clock.now() - test_epoch()).num_seconds(), 90);
    }

    #[test]
    fn test_sequential_ids() {
        let ids = SequentialIds::new();
        assert_eq!(ids.next_component_id().as_str(), "component-0");
        assert_eq!(ids.next_component_id().as_str(), "component-1");
    }

    #[test]
    fn test_counting_and_failing_handles() {
        let (handle, calls) = counting_handle();
        handle.cancel().unwrap();
        handle.cancel().unwrap();
        assert_eq!(calls.count(), 2);

        let (handle, calls) = failing_handle("boom");
        assert!(handle.cancel().is_err());
        assert_eq!(calls.count(), 1);
    }
}
