//! # Cancelable Requests Core
//!
//! Core types for cancelling in-flight requests on behalf of short-lived
//! UI components.
//!
//! ## Core Concepts
//!
//! - **Component identity**: the cancellation scope of one live component
//! - **Logical request identity**: a recurring request within a component;
//!   a newer request supersedes (cancels) the pending older one
//! - **Slot**: the state of one request instance (`Pending`, `Removed`, `Canceled`)
//! - **Registry**: the store of slots and its state-transition rules
//! - **Request tag**: what a request carries so its outcome can be checked later
//!
//! ## Architecture
//!
//! ```text
//! LifecycleAdapter ──register/unregister──▶ CancellationRegistry ◀──probe── RequestTag
//!                                                   ▲                          │
//!                        interception protocol ─────┘        decorators ───────┘
//! ```
//!
//! The interception protocol and transports live in the runtime crate; this
//! crate holds the synchronous, runtime-agnostic parts.
//!
//! ## Example
//!
//! ```
//! use cancelable_requests_core::*;
//! use std::sync::Arc;
//!
//! let registry = Arc::new(CancellationRegistry::new(RegistryConfig::default()));
//! let component = registry.register(ComponentId::from("search-box"));
//! let request = RequestId::from("suggestions");
//!
//! registry.supersede(&component, &request).unwrap();
//! let label = registry
//!     .install_pending(&component, &request, CancelHandle::noop())
//!     .unwrap();
//!
//! let mut tag = RequestTag::for_component(component.clone()).with_request_id(request.clone());
//! tag.track(CancelProbe::new(&registry, component.clone(), request.clone(), label));
//!
//! registry.unregister(&component, true);
//! assert!(tag.is_canceled());
//! ```

pub mod config;
pub mod decorators;
pub mod error;
pub mod handle;
pub mod id;
pub mod lifecycle;
pub mod metrics;
pub mod registry;
pub mod slot;
pub mod tag;

pub use config::{ConfigError, RegistryConfig, SweepPolicy};
pub use decorators::{
    CancelOutcome, TransportCancel, is_canceled_outcome, wrap_error_handler, wrap_success_handler,
};
pub use error::RegistryError;
pub use handle::{CancelError, CancelHandle};
pub use id::{ComponentId, InstanceLabel, RequestId};
pub use lifecycle::{CancelableComponent, CancelableState, ComponentScope, LifecycleAdapter};
pub use registry::{CancelReport, CancellationRegistry, RegistryStats, SweepReport};
pub use slot::{CancelLatch, Slot, SlotState};
pub use tag::{CancelProbe, HandleCallback, RequestTag};

/// Environment module - Dependency injection traits
///
/// Time and identity generation are abstracted so tests can run with
/// deterministic clocks and identities.
pub mod environment {
    use crate::id::ComponentId;
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```ignore
    /// // Test - fixed time for deterministic tests
    /// struct FixedClock { time: DateTime<Utc> }
    /// impl Clock for FixedClock {
    ///     fn now(&self) -> DateTime<Utc> {
    ///         self.time
    ///     }
    /// }
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }

    /// Source of fresh component identities
    pub trait IdGenerator: Send + Sync {
        /// Produce an identity not handed out before
        fn next_component_id(&self) -> ComponentId;
    }

    /// Random (v4 UUID) component identities
    #[derive(Debug, Clone, Copy, Default)]
    pub struct UuidGenerator;

    impl IdGenerator for UuidGenerator {
        fn next_component_id(&self) -> ComponentId {
            ComponentId::new(uuid::Uuid::new_v4().to_string())
        }
    }
}
