//! Handler decorators that suppress results of cancelled requests.
//!
//! # Example
//!
//! ```
//! use cancelable_requests_core::decorators::{wrap_success_handler, CancelOutcome};
//! use cancelable_requests_core::RequestTag;
//!
//! struct Loaded {
//!     tag: RequestTag,
//!     rows: usize,
//! }
//!
//! impl CancelOutcome for Loaded {
//!     fn cancel_tag(&self) -> Option<&RequestTag> {
//!         Some(&self.tag)
//!     }
//! }
//!
//! let mut render = wrap_success_handler(|loaded: Loaded| loaded.rows);
//! let outcome = Loaded { tag: RequestTag::for_component("table"), rows: 3 };
//! assert_eq!(render(outcome), Some(3));
//! ```

use crate::tag::RequestTag;

/// A response or error that may carry the tag of its request.
pub trait CancelOutcome {
    /// The request's cancellation tag, if it had one
    fn cancel_tag(&self) -> Option<&RequestTag>;
}

/// An error that can tell whether the transport aborted the request.
pub trait TransportCancel {
    /// True when the transport's own cancellation fired
    fn is_transport_cancel(&self) -> bool;
}

impl CancelOutcome for RequestTag {
    fn cancel_tag(&self) -> Option<&RequestTag> {
        Some(self)
    }
}

/// Whether the outcome's request has been cancelled in the registry.
///
/// Independent of the transport's own cancellation signal.
#[must_use]
pub fn is_canceled_outcome<O>(outcome: &O) -> bool
where
    O: CancelOutcome + ?Sized,
{
    outcome.cancel_tag().is_some_and(RequestTag::is_canceled)
}

/// Wrap an error handler so it only sees errors that are not cancellations.
///
/// The wrapped handler returns `None` when the error was suppressed.
pub fn wrap_error_handler<E, T, F>(mut handler: F) -> impl FnMut(E) -> Option<T>
where
    E: CancelOutcome + TransportCancel,
    F: FnMut(E) -> T,
{
    move |error: E| {
        if error.is_transport_cancel() || is_canceled_outcome(&error) {
            return None;
        }
        Some(handler(error))
    }
}

/// Wrap a success handler so it is skipped for superseded or cancelled requests.
///
/// The wrapped handler returns `None` when the response was suppressed.
pub fn wrap_success_handler<R, T, F>(mut handler: F) -> impl FnMut(R) -> Option<T>
where
    R: CancelOutcome,
    F: FnMut(R) -> T,
{
    move |response: R| {
        if is_canceled_outcome(&response) {
            return None;
        }
        Some(handler(response))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can unwrap
mod tests {
    use super::*;
    use crate::{CancelHandle, CancelProbe, CancellationRegistry, ComponentId, RequestId};
    use std::sync::Arc;

    struct Failure {
        tag: Option<RequestTag>,
        transport_cancel: bool,
    }

    impl CancelOutcome for Failure {
        fn cancel_tag(&self) -> Option<&RequestTag> {
            self.tag.as_ref()
        }
    }

    impl TransportCancel for Failure {
        fn is_transport_cancel(&self) -> bool {
            self.transport_cancel
        }
    }

    struct Fixture {
        registry: Arc<CancellationRegistry>,
        component: ComponentId,
        request: RequestId,
        tag: RequestTag,
    }

    fn tracked_tag() -> Fixture {
        let registry = Arc::new(CancellationRegistry::default());
        let component = registry.register("A".into());
        let request = RequestId::from("list");
        let label = registry
            .install_pending(&component, &request, CancelHandle::noop())
            .unwrap();
        let mut tag = RequestTag::for_component(component.clone());
        tag.track(CancelProbe::new(&registry, component.clone(), request.clone(), label));
        Fixture {
            registry,
            component,
            request,
            tag,
        }
    }

    #[test]
    fn test_is_canceled_outcome_follows_tag_not_transport_signal() {
        let fixture = tracked_tag();
        let failure = Failure {
            tag: Some(fixture.tag.clone()),
            transport_cancel: true,
        };
        assert!(!is_canceled_outcome(&failure));

        fixture
            .registry
            .cancel_request(&fixture.component, &fixture.request);
        let failure = Failure {
            tag: Some(fixture.tag),
            transport_cancel: false,
        };
        assert!(is_canceled_outcome(&failure));
    }

    #[test]
    fn test_untagged_outcome_is_not_canceled() {
        let failure = Failure {
            tag: None,
            transport_cancel: false,
        };
        assert!(!is_canceled_outcome(&failure));
    }

    #[test]
    fn test_error_handler_skips_transport_cancellations() {
        let mut calls = 0;
        let mut handler = wrap_error_handler(|_: Failure| calls += 1);

        let result = handler(Failure {
            tag: None,
            transport_cancel: true,
        });
        assert_eq!(result, None);

        let result = handler(Failure {
            tag: None,
            transport_cancel: false,
        });
        assert_eq!(result, Some(()));
        drop(handler);
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_error_handler_skips_registry_cancellations() {
        let fixture = tracked_tag();
        fixture
            .registry
            .cancel_request(&fixture.component, &fixture.request);

        let mut handler = wrap_error_handler(|_: Failure| "reported");
        let result = handler(Failure {
            tag: Some(fixture.tag),
            transport_cancel: false,
        });
        assert_eq!(result, None);
    }

    #[test]
    fn test_success_handler_runs_until_cancelled() {
        let fixture = tracked_tag();
        let mut handler = wrap_success_handler(|tag: RequestTag| tag.instance());

        assert!(handler(fixture.tag.clone()).is_some());

        fixture
            .registry
            .cancel_request(&fixture.component, &fixture.request);
        assert_eq!(handler(fixture.tag), None);
    }
}
