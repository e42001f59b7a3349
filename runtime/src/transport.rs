//! The seam between the interception protocol and a concrete transport.
//!
//! A transport executes requests and hands out cancellation tokens. The token
//! splits into a [`CancelHandle`] stored in the registry and an abort
//! registration that the client wraps around the in-flight future. Invoking
//! the handle resolves the future with [`Aborted`](futures::future::Aborted), the transport-native
//! cancellation signal.

use cancelable_requests_core::CancelHandle;
use futures::future::{AbortHandle, AbortRegistration, Abortable};
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by [`Transport::execute`].
pub type TransportFuture<R, E> = Pin<Box<dyn Future<Output = Result<R, E>> + Send>>;

/// Executes requests on behalf of a [`CancelableClient`](crate::CancelableClient).
///
/// # Example
///
/// ```ignore
/// struct Echo;
///
/// impl Transport for Echo {
///     type Request = String;
///     type Response = String;
///     type Error = std::io::Error;
///
///     fn target(&self, request: &String) -> String {
///         request.clone()
///     }
///
///     fn execute(&self, request: String) -> TransportFuture<String, std::io::Error> {
///         Box::pin(async move { Ok(request) })
///     }
/// }
/// ```
pub trait Transport: Send + Sync {
    /// Outgoing request
    type Request: Send;

    /// Successful response
    type Response: Send;

    /// Transport failure
    type Error: std::error::Error + Send + Sync + 'static;

    /// Target address of the request, the default logical request identity
    fn target(&self, request: &Self::Request) -> String;

    /// Start executing the request
    fn execute(&self, request: Self::Request) -> TransportFuture<Self::Response, Self::Error>;

    /// Create the cancellation token for one request
    fn cancel_token(&self) -> CancelToken {
        CancelToken::new()
    }
}

/// Cancellation capability for one request.
#[derive(Debug)]
pub struct CancelToken {
    handle: CancelHandle,
    registration: AbortRegistration,
}

impl CancelToken {
    /// Token whose handle aborts the wrapped future
    #[must_use]
    pub fn new() -> Self {
        let (abort, registration) = AbortHandle::new_pair();
        Self {
            handle: CancelHandle::infallible(move || abort.abort()),
            registration,
        }
    }

    /// Token built from a custom handle.
    ///
    /// The handle is responsible for aborting `registration`'s pair, for
    /// example by calling [`AbortHandle::abort`] after its own bookkeeping.
    #[must_use]
    pub const fn from_parts(handle: CancelHandle, registration: AbortRegistration) -> Self {
        Self {
            handle,
            registration,
        }
    }

    /// Handle to store in the registry
    #[must_use]
    pub fn handle(&self) -> CancelHandle {
        self.handle.clone()
    }

    /// Make `future` resolve to `Err(Aborted)` once the handle is invoked
    pub fn abortable<F: Future>(self, future: F) -> Abortable<F> {
        Abortable::new(future, self.registration)
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
