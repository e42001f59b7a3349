//! Errors surfaced by [`CancelableClient::send`](crate::CancelableClient::send).

use cancelable_requests_core::{CancelOutcome, RequestTag, TransportCancel};
use thiserror::Error;

/// Failure of one request sent through the client.
///
/// Both variants carry the request's tag so the decorators can consult the
/// registry after the fact.
#[derive(Error, Debug)]
pub enum RequestError<E> {
    /// The request was aborted through its cancel handle
    #[error("Request canceled")]
    Canceled {
        /// Tag of the aborted request, if it had one
        tag: Option<RequestTag>,
    },

    /// The transport failed; the original error is kept unchanged
    #[error("Transport error: {source}")]
    Transport {
        /// Error returned by the transport
        #[source]
        source: E,
        /// Tag of the failed request, if it had one
        tag: Option<RequestTag>,
    },
}

impl<E> RequestError<E> {
    /// Tag of the request, if it had one
    #[must_use]
    pub const fn tag(&self) -> Option<&RequestTag> {
        match self {
            Self::Canceled { tag } | Self::Transport { tag, .. } => tag.as_ref(),
        }
    }

    /// Whether the transport's own cancellation fired
    #[must_use]
    pub const fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled { .. })
    }

    /// The transport's error, if this was a transport failure
    #[must_use]
    pub fn into_source(self) -> Option<E> {
        match self {
            Self::Transport { source, .. } => Some(source),
            Self::Canceled { .. } => None,
        }
    }
}

impl<E> CancelOutcome for RequestError<E> {
    fn cancel_tag(&self) -> Option<&RequestTag> {
        self.tag()
    }
}

impl<E> TransportCancel for RequestError<E> {
    fn is_transport_cancel(&self) -> bool {
        self.is_canceled()
    }
}
