//! A client that runs the interception protocol around a [`Transport`].

use crate::error::RequestError;
use crate::hooks::{RequestOptions, RequestOutcome};
use crate::interceptor::CancelInterceptor;
use crate::transport::Transport;
use cancelable_requests_core::{
    CancelOutcome, CancellationRegistry, ComponentId, InstanceLabel, RequestId, RequestTag,
};
use std::sync::Arc;
use tracing::debug;

/// Successful response together with its request's tag.
#[derive(Debug)]
pub struct Response<B> {
    body: B,
    tag: Option<RequestTag>,
}

impl<B> Response<B> {
    /// Response body
    #[must_use]
    pub const fn body(&self) -> &B {
        &self.body
    }

    /// Take the body, dropping the tag
    pub fn into_body(self) -> B {
        self.body
    }

    /// Tag of the request, if it had one
    #[must_use]
    pub const fn tag(&self) -> Option<&RequestTag> {
        self.tag.as_ref()
    }

    /// Whether the request has been cancelled since (live)
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.tag.as_ref().is_some_and(RequestTag::is_canceled)
    }
}

impl<B> CancelOutcome for Response<B> {
    fn cancel_tag(&self) -> Option<&RequestTag> {
        self.tag.as_ref()
    }
}

/// Retires the tracked slot if `send` is dropped before the request settles.
struct InFlight<'a> {
    interceptor: &'a CancelInterceptor,
    key: Option<(ComponentId, RequestId, InstanceLabel)>,
}

impl<'a> InFlight<'a> {
    fn arm(interceptor: &'a CancelInterceptor, tag: Option<&RequestTag>) -> Self {
        let key = tag
            .and_then(RequestTag::tracked_key)
            .map(|(component_id, request_id, label)| {
                (component_id.clone(), request_id.clone(), label)
            });
        Self { interceptor, key }
    }

    fn settle(mut self) {
        self.key = None;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Some((component_id, request_id, label)) = self.key.take() {
            debug!(
                component_id = %component_id,
                request_id = %request_id,
                instance = %label,
                "Request dropped before it settled, retiring slot"
            );
            self.interceptor
                .registry()
                .mark_removed(&component_id, &request_id, &label);
        }
    }
}

/// Transport wrapper that tracks tagged requests in a registry.
///
/// # Example
///
/// ```ignore
/// let registry = Arc::new(CancellationRegistry::default());
/// let client = CancelableClient::new(ReqwestTransport::default(), Arc::clone(&registry));
///
/// let component = registry.register("user-list".into());
/// let response = client
///     .send(request, RequestTag::for_component(component).into())
///     .await?;
/// ```
#[derive(Debug)]
pub struct CancelableClient<T> {
    transport: T,
    interceptor: CancelInterceptor,
}

impl<T: Transport> CancelableClient<T> {
    /// Wrap `transport`, tracking requests in `registry`
    #[must_use]
    pub const fn new(transport: T, registry: Arc<CancellationRegistry>) -> Self {
        Self {
            transport,
            interceptor: CancelInterceptor::new(registry),
        }
    }

    /// The wrapped transport
    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// The registry requests are tracked in
    #[must_use]
    pub const fn registry(&self) -> &Arc<CancellationRegistry> {
        self.interceptor.registry()
    }

    /// The interception hooks used by this client
    #[must_use]
    pub const fn interceptor(&self) -> &CancelInterceptor {
        &self.interceptor
    }

    /// Send a request.
    ///
    /// Tagged requests go through the interception protocol; untagged ones
    /// pass straight to the transport. The start hook runs before dispatch and
    /// the end hook after the slot was retired, on every path. Dropping the
    /// returned future mid-flight retires the slot as well.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::Canceled`] when the request was aborted through
    /// its cancel handle, and [`RequestError::Transport`] carrying the
    /// transport's error unchanged otherwise.
    pub async fn send(
        &self,
        request: T::Request,
        options: RequestOptions,
    ) -> Result<Response<T::Response>, RequestError<T::Error>> {
        let RequestOptions {
            mut tag,
            on_start,
            on_end,
        } = options;

        let token = self.transport.cancel_token();
        if let Some(tag) = tag.as_mut() {
            let target = self.transport.target(&request);
            self.interceptor
                .before_request(tag, &target, token.handle())
                .await;
        }

        if let Some(on_start) = on_start {
            on_start();
        }

        let in_flight = InFlight::arm(&self.interceptor, tag.as_ref());
        let settled = token.abortable(self.transport.execute(request)).await;
        in_flight.settle();

        let result = match settled {
            Ok(Ok(body)) => {
                if let Some(tag) = &tag {
                    self.interceptor.after_response(tag);
                }
                Ok(Response { body, tag })
            }
            Ok(Err(source)) => {
                let source = match &tag {
                    Some(tag) => self.interceptor.after_error(tag, source),
                    None => source,
                };
                Err(RequestError::Transport { source, tag })
            }
            Err(_aborted) => {
                if let Some(tag) = &tag {
                    self.interceptor.after_response(tag);
                }
                Err(RequestError::Canceled { tag })
            }
        };

        if let Some(on_end) = on_end {
            on_end(match &result {
                Ok(_) => RequestOutcome::Succeeded,
                Err(RequestError::Transport { .. }) => RequestOutcome::Failed,
                Err(RequestError::Canceled { .. }) => RequestOutcome::Canceled,
            });
        }
        result
    }

    /// Whether `error` is the transport's own cancellation signal
    #[must_use]
    pub const fn is_cancel(error: &RequestError<T::Error>) -> bool {
        error.is_canceled()
    }
}
