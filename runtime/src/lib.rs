//! # Cancelable Requests Runtime
//!
//! Async runtime pieces for component-scoped cancelable requests.
//!
//! ## Core Components
//!
//! - **Transport**: the seam to a concrete client, plus the abortable cancel token
//! - **Interceptor**: pre/post request hooks that maintain registry slots
//! - **`CancelableClient`**: a transport wrapped in the interception protocol
//! - **Sweeper**: background task removing aged tombstones
//!
//! ## Example
//!
//! ```ignore
//! use cancelable_requests_runtime::{CancelableClient, RequestOptions, Sweeper};
//! use cancelable_requests_core::{CancellationRegistry, RequestTag};
//!
//! let registry = Arc::new(CancellationRegistry::default());
//! let sweeper = Sweeper::spawn(&registry);
//! let client = CancelableClient::new(transport, Arc::clone(&registry));
//!
//! let component = registry.register("user-list".into());
//! let options = RequestOptions::new().tag(RequestTag::for_component(component.clone()));
//! let response = client.send(request, options).await?;
//!
//! // Unmount: cancels whatever is still in flight
//! registry.unregister(&component, true);
//! ```

/// Error types for requests sent through the client
pub mod error;

/// Transport trait and cancel tokens
pub mod transport;

/// Request interception protocol
pub mod interceptor;

/// Per-request options and hooks
pub mod hooks;

/// Cancelable client
pub mod client;

/// Tombstone sweeper
pub mod sweeper;

/// Registry health checks
pub mod health;

/// Prometheus metrics for observability
pub mod metrics;

pub use client::{CancelableClient, Response};
pub use error::RequestError;
pub use health::{HealthCheck, HealthStatus, registry_health, registry_health_with_limit};
pub use hooks::{RequestOptions, RequestOutcome};
pub use interceptor::CancelInterceptor;
pub use sweeper::{Sweeper, SweeperHandle};
pub use transport::{CancelToken, Transport, TransportFuture};
