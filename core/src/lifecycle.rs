//! Binding between a component's lifetime and its registry scope.
//!
//! A component embeds [`CancelableState`] (or implements
//! [`CancelableComponent`] itself) and the host framework calls
//! [`LifecycleAdapter::on_create`] / [`LifecycleAdapter::on_destroy`] from its
//! mount and unmount hooks. Hosts without explicit hooks can hold a
//! [`ComponentScope`] instead, which tears the scope down when dropped.
//!
//! # Example
//!
//! ```
//! use cancelable_requests_core::lifecycle::{CancelableState, LifecycleAdapter};
//! use cancelable_requests_core::CancellationRegistry;
//! use std::sync::Arc;
//!
//! let registry = Arc::new(CancellationRegistry::default());
//! let adapter = LifecycleAdapter::new(Arc::clone(&registry));
//!
//! let mut state = CancelableState::default();
//! let id = adapter.on_create(&mut state);
//! assert!(registry.is_registered(&id));
//!
//! adapter.on_destroy(&state);
//! assert!(!registry.is_registered(&id));
//! ```

use crate::environment::{IdGenerator, UuidGenerator};
use crate::id::ComponentId;
use crate::registry::{CancelReport, CancellationRegistry};
use crate::tag::RequestTag;
use std::sync::Arc;
use tracing::warn;

/// A component that owns a cancellation scope.
pub trait CancelableComponent {
    /// Identity assigned on a previous creation, if any
    fn component_id(&self) -> Option<&ComponentId>;

    /// Remember the identity assigned by the adapter
    fn set_component_id(&mut self, id: ComponentId);
}

/// Embeddable state for components that take part in cancellation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CancelableState {
    component_id: Option<ComponentId>,
}

impl CancelableState {
    /// State that reuses an existing identity
    #[must_use]
    pub const fn with_id(component_id: ComponentId) -> Self {
        Self {
            component_id: Some(component_id),
        }
    }

    /// Tag for a request issued by this component.
    ///
    /// Before creation the tag has no component and the request runs uncancellable.
    #[must_use]
    pub fn tag(&self) -> RequestTag {
        self.component_id
            .clone()
            .map_or_else(RequestTag::default, RequestTag::for_component)
    }
}

impl CancelableComponent for CancelableState {
    fn component_id(&self) -> Option<&ComponentId> {
        self.component_id.as_ref()
    }

    fn set_component_id(&mut self, id: ComponentId) {
        self.component_id = Some(id);
    }
}

/// Registers components on creation and cancels their requests on destruction.
#[derive(Clone)]
pub struct LifecycleAdapter {
    registry: Arc<CancellationRegistry>,
    ids: Arc<dyn IdGenerator>,
}

impl LifecycleAdapter {
    /// Adapter generating random identities
    #[must_use]
    pub fn new(registry: Arc<CancellationRegistry>) -> Self {
        Self::with_id_generator(registry, Arc::new(UuidGenerator))
    }

    /// Adapter with an injected identity generator
    #[must_use]
    pub fn with_id_generator(
        registry: Arc<CancellationRegistry>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self { registry, ids }
    }

    /// The registry this adapter manages
    #[must_use]
    pub const fn registry(&self) -> &Arc<CancellationRegistry> {
        &self.registry
    }

    /// Register a component, reusing its identity when it already carries one.
    pub fn on_create<C>(&self, component: &mut C) -> ComponentId
    where
        C: CancelableComponent + ?Sized,
    {
        let id = if let Some(existing) = component.component_id() {
            existing.clone()
        } else {
            let id = self.ids.next_component_id();
            component.set_component_id(id.clone());
            id
        };
        self.registry.register(id)
    }

    /// Cancel all pending requests of the component and drop its scope.
    pub fn on_destroy<C>(&self, component: &C) -> CancelReport
    where
        C: CancelableComponent + ?Sized,
    {
        let Some(id) = component.component_id() else {
            warn!("Component destroyed before it was created; nothing to cancel");
            return CancelReport::default();
        };
        self.registry.unregister(id, true)
    }

    /// Register a component and return a guard that destroys its scope on drop.
    pub fn scope<C>(&self, component: &mut C) -> ComponentScope
    where
        C: CancelableComponent + ?Sized,
    {
        let component_id = self.on_create(component);
        ComponentScope {
            registry: Arc::clone(&self.registry),
            component_id,
            closed: false,
        }
    }
}

impl std::fmt::Debug for LifecycleAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleAdapter")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

/// Guard over a registered component scope.
///
/// Dropping the guard unregisters the component and cancels its pending requests.
#[derive(Debug)]
#[must_use = "dropping the scope immediately cancels the component's requests"]
pub struct ComponentScope {
    registry: Arc<CancellationRegistry>,
    component_id: ComponentId,
    closed: bool,
}

impl ComponentScope {
    /// Identity of the guarded component
    #[must_use]
    pub const fn component_id(&self) -> &ComponentId {
        &self.component_id
    }

    /// Tag for a request issued within this scope
    #[must_use]
    pub fn tag(&self) -> RequestTag {
        RequestTag::for_component(self.component_id.clone())
    }

    /// Tear the scope down now and report what was cancelled
    pub fn close(mut self) -> CancelReport {
        self.closed = true;
        self.registry.unregister(&self.component_id, true)
    }
}

impl Drop for ComponentScope {
    fn drop(&mut self) {
        if !self.closed {
            self.registry.unregister(&self.component_id, true);
        }
    }
}
