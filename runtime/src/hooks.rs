//! Per-request options: the cancellation tag and start/end hooks.

use cancelable_requests_core::RequestTag;
use std::fmt;

type StartHook = Box<dyn FnOnce() + Send>;
type EndHook = Box<dyn FnOnce(RequestOutcome) + Send>;

/// How a request ended, as reported to the end hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// The transport returned a response
    Succeeded,
    /// The transport returned an error
    Failed,
    /// The request was aborted through its cancel handle
    Canceled,
}

/// Options for [`CancelableClient::send`](crate::CancelableClient::send).
///
/// # Example
///
/// ```
/// use cancelable_requests_core::RequestTag;
/// use cancelable_requests_runtime::RequestOptions;
///
/// let options = RequestOptions::new()
///     .tag(RequestTag::for_component("user-list"))
///     .on_start(|| tracing::debug!("loading"))
///     .on_end(|outcome| tracing::debug!(?outcome, "done"));
/// assert!(options.has_tag());
/// ```
#[derive(Default)]
pub struct RequestOptions {
    pub(crate) tag: Option<RequestTag>,
    pub(crate) on_start: Option<StartHook>,
    pub(crate) on_end: Option<EndHook>,
}

impl RequestOptions {
    /// Options for an untagged request without hooks
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Track the request for cancellation under `tag`
    #[must_use]
    pub fn tag(mut self, tag: RequestTag) -> Self {
        self.tag = Some(tag);
        self
    }

    /// Run `hook` right before the request is dispatched
    #[must_use]
    pub fn on_start<F>(mut self, hook: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_start = Some(Box::new(hook));
        self
    }

    /// Run `hook` once the request finished and its slot was retired.
    ///
    /// Fires on the response and the error path alike.
    #[must_use]
    pub fn on_end<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(RequestOutcome) + Send + 'static,
    {
        self.on_end = Some(Box::new(hook));
        self
    }

    /// Whether a cancellation tag was set
    #[must_use]
    pub const fn has_tag(&self) -> bool {
        self.tag.is_some()
    }
}

impl From<RequestTag> for RequestOptions {
    fn from(tag: RequestTag) -> Self {
        Self::new().tag(tag)
    }
}

impl fmt::Debug for RequestOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestOptions")
            .field("tag", &self.tag)
            .field("on_start", &self.on_start.is_some())
            .field("on_end", &self.on_end.is_some())
            .finish()
    }
}
