//! Health reporting for the cancellation registry.

use cancelable_requests_core::CancellationRegistry;

/// Tombstone backlog above which the registry reports itself degraded
pub const DEFAULT_TOMBSTONE_BACKLOG: usize = 10_000;

/// Registry health levels.
///
/// The registry keeps serving requests whatever its backlog, so the worst it
/// reports is degraded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HealthStatus {
    /// Tombstone backlog within the limit
    Healthy,

    /// More tombstones await a sweep than the limit allows
    Degraded,
}

impl HealthStatus {
    /// Check if status is healthy
    #[must_use]
    pub const fn is_healthy(self) -> bool {
        matches!(self, Self::Healthy)
    }

    /// Check if status is degraded
    #[must_use]
    pub const fn is_degraded(self) -> bool {
        matches!(self, Self::Degraded)
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
        }
    }
}

/// Health check result for a component
#[derive(Debug, Clone)]
pub struct HealthCheck {
    /// Name of the component being checked
    pub component: String,

    /// Current health status
    pub status: HealthStatus,

    /// Optional message providing details
    pub message: Option<String>,

    /// Optional metadata (e.g., slot counts)
    pub metadata: Vec<(String, String)>,
}

impl HealthCheck {
    /// Create a healthy check result
    #[must_use]
    pub fn healthy(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Healthy,
            message: None,
            metadata: Vec::new(),
        }
    }

    /// Create a degraded check result
    #[must_use]
    pub fn degraded(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Degraded,
            message: Some(message.into()),
            metadata: Vec::new(),
        }
    }

    /// Add metadata to the health check
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.push((key.into(), value.into()));
        self
    }

    /// Look up a metadata value
    #[must_use]
    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Check the registry against [`DEFAULT_TOMBSTONE_BACKLOG`]
#[must_use]
pub fn registry_health(registry: &CancellationRegistry) -> HealthCheck {
    registry_health_with_limit(registry, DEFAULT_TOMBSTONE_BACKLOG)
}

/// Check the registry's tombstone backlog.
///
/// Degraded once more than `max_tombstones` terminal slots await a sweep.
#[must_use]
pub fn registry_health_with_limit(
    registry: &CancellationRegistry,
    max_tombstones: usize,
) -> HealthCheck {
    let stats = registry.stats();
    let tombstones = stats.tombstones();

    let check = if tombstones > max_tombstones {
        HealthCheck::degraded(
            "cancel_registry",
            format!("{tombstones} tombstones awaiting sweep (limit {max_tombstones})"),
        )
    } else {
        HealthCheck::healthy("cancel_registry")
    };

    check
        .with_metadata("components", stats.components.to_string())
        .with_metadata("request_groups", stats.request_groups.to_string())
        .with_metadata("pending", stats.pending.to_string())
        .with_metadata("tombstones", tombstones.to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can unwrap
mod tests {
    use super::*;
    use cancelable_requests_core::{CancelHandle, ComponentId, RequestId};

    #[test]
    fn test_health_status_display() {
        assert!(HealthStatus::Healthy < HealthStatus::Degraded);
        assert_eq!(HealthStatus::Healthy.to_string(), "healthy");
        assert_eq!(HealthStatus::Degraded.to_string(), "degraded");
    }

    #[test]
    fn test_empty_registry_is_healthy() {
        let check = registry_health(&CancellationRegistry::default());
        assert!(check.status.is_healthy());
        assert_eq!(check.metadata("components"), Some("0"));
    }

    #[test]
    fn test_tombstone_backlog_degrades() {
        let registry = CancellationRegistry::default();
        let component = registry.register(ComponentId::from("A"));
        for request in ["a", "b", "c"] {
            let request = RequestId::from(request);
            registry
                .install_pending(&component, &request, CancelHandle::noop())
                .unwrap();
            registry.cancel_request(&component, &request);
        }

        let check = registry_health_with_limit(&registry, 2);

        assert!(check.status.is_degraded());
        assert_eq!(check.metadata("tombstones"), Some("3"));
        assert!(registry_health_with_limit(&registry, 3).status.is_healthy());
    }
}
