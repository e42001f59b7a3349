//! The cancellation tag carried by a request.
//!
//! Callers create a [`RequestTag`] naming the owning component (and optionally
//! a logical request identity). The interception protocol fills in the
//! instance label and a live [`CancelProbe`] before the request is sent, so
//! the tag travels with the response or error and can be consulted later.

use crate::error::RegistryError;
use crate::handle::CancelHandle;
use crate::id::{ComponentId, InstanceLabel, RequestId};
use crate::registry::CancellationRegistry;
use crate::slot::CancelLatch;
use std::fmt;
use std::sync::{Arc, Weak};

/// Callback receiving the cancel handle of a request as soon as it exists.
pub type HandleCallback = Arc<dyn Fn(CancelHandle) + Send + Sync>;

/// Live view on one slot of the registry.
///
/// The answer changes if the request is cancelled after its response was
/// delivered. Once it reports cancelled it keeps doing so, even after the
/// slot is swept or the component registers again.
#[derive(Clone)]
pub struct CancelProbe {
    registry: Weak<CancellationRegistry>,
    latch: CancelLatch,
    component_id: ComponentId,
    request_id: RequestId,
    instance: InstanceLabel,
}

impl CancelProbe {
    /// Create a probe for one instance
    #[must_use]
    pub fn new(
        registry: &Arc<CancellationRegistry>,
        component_id: ComponentId,
        request_id: RequestId,
        instance: InstanceLabel,
    ) -> Self {
        Self {
            registry: Arc::downgrade(registry),
            latch: registry.latch_for(&component_id, &request_id, &instance),
            component_id,
            request_id,
            instance,
        }
    }

    /// Probe for an instance that never made it into the store.
    ///
    /// It always reports cancelled, even if the component registers again
    /// under the same identity.
    #[must_use]
    pub fn detached(
        component_id: ComponentId,
        request_id: RequestId,
        instance: InstanceLabel,
    ) -> Self {
        Self {
            registry: Weak::new(),
            latch: CancelLatch::tripped(),
            component_id,
            request_id,
            instance,
        }
    }

    /// Whether the instance is cancelled right now.
    ///
    /// A dropped registry counts as cancelled.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        if self.latch.is_tripped() {
            return true;
        }
        let canceled = self.registry.upgrade().is_none_or(|registry| {
            registry.is_canceled(&self.component_id, &self.request_id, &self.instance)
        });
        if canceled {
            self.latch.trip();
        }
        canceled
    }

    /// Label of the probed instance
    #[must_use]
    pub const fn instance(&self) -> InstanceLabel {
        self.instance
    }
}

impl fmt::Debug for CancelProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelProbe")
            .field("component_id", &self.component_id)
            .field("request_id", &self.request_id)
            .field("instance", &self.instance)
            .finish_non_exhaustive()
    }
}

/// Cancellation metadata attached to an outgoing request.
///
/// # Example
///
/// ```
/// use cancelable_requests_core::RequestTag;
///
/// let tag = RequestTag::for_component("user-list").with_request_id("search");
/// assert_eq!(tag.component_id().map(|id| id.as_str()), Some("user-list"));
/// assert!(!tag.is_canceled());
/// ```
#[derive(Clone, Default)]
pub struct RequestTag {
    component_id: Option<ComponentId>,
    request_id: Option<RequestId>,
    probe: Option<CancelProbe>,
    on_handle: Option<HandleCallback>,
}

impl RequestTag {
    /// Tag a request as belonging to `component_id`
    #[must_use]
    pub fn for_component(component_id: impl Into<ComponentId>) -> Self {
        Self {
            component_id: Some(component_id.into()),
            ..Self::default()
        }
    }

    /// Use an explicit logical request identity instead of the target address
    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<RequestId>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Receive the cancel handle once the request is registered
    #[must_use]
    pub fn on_handle<F>(mut self, callback: F) -> Self
    where
        F: Fn(CancelHandle) + Send + Sync + 'static,
    {
        self.on_handle = Some(Arc::new(callback));
        self
    }

    /// Owning component, if set
    #[must_use]
    pub const fn component_id(&self) -> Option<&ComponentId> {
        self.component_id.as_ref()
    }

    /// Logical request identity, if set or already resolved
    #[must_use]
    pub const fn request_id(&self) -> Option<&RequestId> {
        self.request_id.as_ref()
    }

    /// Instance label, once the request is tracked
    #[must_use]
    pub fn instance(&self) -> Option<InstanceLabel> {
        self.probe.as_ref().map(CancelProbe::instance)
    }

    /// Whether the request is tracked by a registry
    #[must_use]
    pub const fn is_tracked(&self) -> bool {
        self.probe.is_some()
    }

    /// Whether the tracked instance has been cancelled.
    ///
    /// Untracked requests are never reported as cancelled.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.probe.as_ref().is_some_and(CancelProbe::is_canceled)
    }

    /// Resolve the (component, request) key, defaulting the request to `target`.
    ///
    /// The resolved request identity is stored on the tag.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::MissingComponentId`] if no component was set.
    pub fn resolve(&mut self, target: &str) -> Result<(ComponentId, RequestId), RegistryError> {
        let component_id = self
            .component_id
            .clone()
            .ok_or(RegistryError::MissingComponentId)?;
        let request_id = self
            .request_id
            .get_or_insert_with(|| RequestId::new(target))
            .clone();
        Ok((component_id, request_id))
    }

    /// Attach the live probe of the registered instance
    pub fn track(&mut self, probe: CancelProbe) {
        self.probe = Some(probe);
    }

    /// Key of the tracked instance, if any
    #[must_use]
    pub fn tracked_key(&self) -> Option<(&ComponentId, &RequestId, InstanceLabel)> {
        let probe = self.probe.as_ref()?;
        Some((&probe.component_id, &probe.request_id, probe.instance))
    }

    /// Hand the cancel handle to the caller's callback, if one was given
    pub fn notify_handle(&self, handle: &CancelHandle) {
        if let Some(callback) = &self.on_handle {
            callback(handle.clone());
        }
    }
}

impl fmt::Debug for RequestTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestTag")
            .field("component_id", &self.component_id)
            .field("request_id", &self.request_id)
            .field("probe", &self.probe)
            .field("on_handle", &self.on_handle.as_ref().map(|_| "<callback>"))
            .finish()
    }
}
