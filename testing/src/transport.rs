//! In-memory transport whose responses are released by the test.
//!
//! ```ignore
//! let transport = MockTransport::new();
//! let responder = transport.script("/api/users");
//!
//! let pending = tokio::spawn(async move { client.send(MockRequest::new("/api/users"), options).await });
//! responder.respond("[]");
//! ```
//!
//! Targets without a script answer immediately with `"response from <target>"`.

use cancelable_requests_core::CancelHandle;
use cancelable_requests_runtime::{CancelToken, Transport, TransportFuture};
use futures::future::AbortHandle;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::oneshot;

type Reply = Result<String, MockError>;

/// Request understood by [`MockTransport`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockRequest {
    target: String,
}

impl MockRequest {
    /// Request for `target`
    #[must_use]
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }

    /// Target address
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }
}

/// Failure produced by [`MockTransport`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MockError {
    /// The test scripted a failure
    #[error("Scripted failure: {0}")]
    Scripted(String),

    /// The responder was dropped without answering
    #[error("Responder dropped")]
    Dropped,
}

/// Releases the response of one scripted request.
#[derive(Debug)]
pub struct MockResponder {
    reply: oneshot::Sender<Reply>,
}

impl MockResponder {
    /// Complete the request with `body`
    pub fn respond(self, body: impl Into<String>) {
        self.reply.send(Ok(body.into())).ok();
    }

    /// Fail the request with `message`
    pub fn fail(self, message: impl Into<String>) {
        self.reply.send(Err(MockError::Scripted(message.into()))).ok();
    }
}

#[derive(Debug, Default)]
struct MockState {
    scripts: HashMap<String, VecDeque<oneshot::Receiver<Reply>>>,
    requests: Vec<String>,
}

/// Scripted transport that records requests and cancel invocations.
///
/// Clones share state, so a test can keep one clone while the client owns another.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    cancels: Arc<AtomicUsize>,
}

impl MockTransport {
    /// Transport with no scripts
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold the next request to `target` until the returned responder answers.
    ///
    /// Scripts for the same target are consumed in order.
    #[must_use]
    pub fn script(&self, target: impl Into<String>) -> MockResponder {
        let (reply, receiver) = oneshot::channel();
        self.lock()
            .scripts
            .entry(target.into())
            .or_default()
            .push_back(receiver);
        MockResponder { reply }
    }

    /// Targets of every executed request, in order
    #[must_use]
    pub fn requests(&self) -> Vec<String> {
        self.lock().requests.clone()
    }

    /// How many cancel handles handed out by this transport were invoked
    #[must_use]
    pub fn cancel_count(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Transport for MockTransport {
    type Request = MockRequest;
    type Response = String;
    type Error = MockError;

    fn target(&self, request: &MockRequest) -> String {
        request.target.clone()
    }

    fn execute(&self, request: MockRequest) -> TransportFuture<String, MockError> {
        let scripted = {
            let mut state = self.lock();
            state.requests.push(request.target.clone());
            state
                .scripts
                .get_mut(&request.target)
                .and_then(VecDeque::pop_front)
        };

        Box::pin(async move {
            match scripted {
                Some(receiver) => receiver.await.unwrap_or(Err(MockError::Dropped)),
                None => Ok(format!("response from {}", request.target)),
            }
        })
    }

    fn cancel_token(&self) -> CancelToken {
        let (abort, registration) = AbortHandle::new_pair();
        let cancels = Arc::clone(&self.cancels);
        let handle = CancelHandle::infallible(move || {
            cancels.fetch_add(1, Ordering::SeqCst);
            abort.abort();
        });
        CancelToken::from_parts(handle, registration)
    }
}
