//! Metric names recorded by the registry itself.
//!
//! The registry records through the `metrics` facade; installing a recorder
//! (see the runtime crate) is what makes them visible.

/// Cancel handles invoked
pub const HANDLES_INVOKED: &str = "cancel_registry.handles_invoked";
/// Cancel handles that reported an error or panicked
pub const HANDLE_FAILURES: &str = "cancel_registry.handle_failures";
/// `Removed` tombstones upgraded to `Canceled` by a late cancel
pub const TOMBSTONES_UPGRADED: &str = "cancel_registry.tombstones_upgraded";
/// Registered components
pub const COMPONENTS: &str = "cancel_registry.components";
