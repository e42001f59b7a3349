//! Request interception protocol.
//!
//! The transport layer calls [`CancelInterceptor::before_request`] with the
//! request's tag and cancel handle before dispatch, and
//! [`CancelInterceptor::after_response`] / [`CancelInterceptor::after_error`]
//! once it settles. Caller misuse never blocks a request: it is logged and the
//! request proceeds without cancellation support.

use crate::metrics::RegistryMetrics;
use cancelable_requests_core::{
    CancelHandle, CancelProbe, CancellationRegistry, InstanceLabel, RegistryError, RequestTag,
    SlotState,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// Pre- and post-request hooks bound to one registry.
#[derive(Debug, Clone)]
pub struct CancelInterceptor {
    registry: Arc<CancellationRegistry>,
}

impl CancelInterceptor {
    /// Interceptor over `registry`
    #[must_use]
    pub const fn new(registry: Arc<CancellationRegistry>) -> Self {
        Self { registry }
    }

    /// The registry requests are tracked in
    #[must_use]
    pub const fn registry(&self) -> &Arc<CancellationRegistry> {
        &self.registry
    }

    /// Register a request before it is sent.
    ///
    /// Supersedes the pending instance of the same logical request, yields one
    /// scheduler tick, installs `handle` under a fresh label and attaches a
    /// live probe to `tag`. Returns the label, or `None` when the request
    /// proceeds uncancellable.
    ///
    /// If the component is torn down during the yield, `handle` is invoked
    /// at once and the tag reports the request as cancelled.
    pub async fn before_request(
        &self,
        tag: &mut RequestTag,
        target: &str,
        handle: CancelHandle,
    ) -> Option<InstanceLabel> {
        let (component_id, request_id) = match tag.resolve(target) {
            Ok(key) => key,
            Err(error) => {
                warn!(target_address = target, error = %error, "Request sent without cancellation support");
                RegistryMetrics::record_uncancelable();
                return None;
            }
        };

        match self.registry.supersede(&component_id, &request_id) {
            Ok(report) => RegistryMetrics::record_superseded(report.handles_invoked),
            Err(error) => {
                warn!(
                    component_id = %component_id,
                    request_id = %request_id,
                    error = %error,
                    "Request sent without cancellation support"
                );
                RegistryMetrics::record_uncancelable();
                return None;
            }
        }

        tokio::task::yield_now().await;

        let label = match self
            .registry
            .install_pending(&component_id, &request_id, handle.clone())
        {
            Ok(label) => {
                tag.track(CancelProbe::new(
                    &self.registry,
                    component_id,
                    request_id,
                    label,
                ));
                RegistryMetrics::record_tracked();
                label
            }
            Err(RegistryError::ComponentNotRegistered(_)) => {
                debug!(
                    component_id = %component_id,
                    request_id = %request_id,
                    "Component torn down before request was installed, cancelling"
                );
                let cancelled = handle.try_cancel();
                RegistryMetrics::record_direct_cancel(cancelled.is_err());
                if let Err(error) = cancelled {
                    warn!(
                        component_id = %component_id,
                        request_id = %request_id,
                        error = %error,
                        "Error while cancelling request"
                    );
                }
                let label = self.registry.next_label();
                tag.track(CancelProbe::detached(component_id, request_id, label));
                label
            }
            Err(error @ RegistryError::MissingComponentId) => {
                warn!(error = %error, "Request sent without cancellation support");
                RegistryMetrics::record_uncancelable();
                return None;
            }
        };

        tag.notify_handle(&handle);
        Some(label)
    }

    /// Retire the request's slot after a response
    pub fn after_response(&self, tag: &RequestTag) -> Option<SlotState> {
        self.retire(tag)
    }

    /// Retire the request's slot after an error, handing the error back unchanged
    pub fn after_error<E>(&self, tag: &RequestTag, error: E) -> E {
        self.retire(tag);
        error
    }

    fn retire(&self, tag: &RequestTag) -> Option<SlotState> {
        let (component_id, request_id, label) = tag.tracked_key()?;
        self.registry.mark_removed(component_id, request_id, &label)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can unwrap
mod tests {
    use super::*;
    use cancelable_requests_core::{ComponentId, RegistryConfig, RequestId};
    use cancelable_requests_testing::{counting_handle, test_clock, test_epoch};
    use std::sync::Mutex;

    fn interceptor() -> (CancelInterceptor, ComponentId) {
        let registry = Arc::new(CancellationRegistry::with_clock(
            RegistryConfig::default(),
            Arc::new(test_clock()),
        ));
        let component = registry.register(ComponentId::from("A"));
        (CancelInterceptor::new(registry), component)
    }

    #[tokio::test]
    async fn test_before_request_tracks_under_target() {
        let (interceptor, component) = interceptor();
        let mut tag = RequestTag::for_component(component.clone());

        let label = interceptor
            .before_request(&mut tag, "/api/users", CancelHandle::noop())
            .await
            .unwrap();

        let request = RequestId::from("/api/users");
        assert_eq!(tag.instance(), Some(label));
        assert_eq!(label.created_at(), test_epoch());
        assert_eq!(
            interceptor.registry().slot_state(&component, &request, &label),
            Some(SlotState::Pending)
        );
        assert!(!tag.is_canceled());
    }

    #[tokio::test]
    async fn test_second_request_supersedes_first() {
        let (interceptor, component) = interceptor();
        let (first_handle, first_calls) = counting_handle();

        let mut first = RequestTag::for_component(component.clone()).with_request_id("list");
        interceptor
            .before_request(&mut first, "/api/users", first_handle)
            .await
            .unwrap();
        let mut second = RequestTag::for_component(component.clone()).with_request_id("list");
        interceptor
            .before_request(&mut second, "/api/users?page=2", CancelHandle::noop())
            .await
            .unwrap();

        assert_eq!(first_calls.count(), 1);
        assert!(first.is_canceled());
        assert!(!second.is_canceled());
        assert_eq!(
            interceptor
                .registry()
                .pending_count(&component, &RequestId::from("list")),
            1
        );
    }

    #[tokio::test]
    async fn test_missing_component_fails_open() {
        let (interceptor, _) = interceptor();
        let mut tag = RequestTag::default();

        let label = interceptor
            .before_request(&mut tag, "/api/users", CancelHandle::noop())
            .await;

        assert_eq!(label, None);
        assert!(!tag.is_tracked());
        assert!(!tag.is_canceled());
    }

    #[tokio::test]
    async fn test_unregistered_component_fails_open() {
        let (interceptor, _) = interceptor();
        let mut tag = RequestTag::for_component("ghost");
        let (handle, calls) = counting_handle();

        let label = interceptor.before_request(&mut tag, "/x", handle).await;

        assert_eq!(label, None);
        assert_eq!(calls.count(), 0);
        assert!(!tag.is_tracked());
    }

    #[tokio::test]
    async fn test_handle_callback_receives_installed_handle() {
        let (interceptor, component) = interceptor();
        let received: Arc<Mutex<Option<CancelHandle>>> = Arc::new(Mutex::new(None));
        let received_clone = Arc::clone(&received);
        let mut tag = RequestTag::for_component(component).on_handle(move |handle| {
            *received_clone.lock().unwrap() = Some(handle);
        });
        let handle = CancelHandle::noop();

        interceptor
            .before_request(&mut tag, "/x", handle.clone())
            .await
            .unwrap();

        assert!(received.lock().unwrap().as_ref().unwrap().same_as(&handle));
    }

    #[tokio::test]
    async fn test_after_response_retires_slot() {
        let (interceptor, component) = interceptor();
        let mut tag = RequestTag::for_component(component.clone());
        let label = interceptor
            .before_request(&mut tag, "/x", CancelHandle::noop())
            .await
            .unwrap();

        assert_eq!(interceptor.after_response(&tag), Some(SlotState::Removed));
        assert_eq!(
            interceptor
                .registry()
                .slot_state(&component, &RequestId::from("/x"), &label),
            Some(SlotState::Removed)
        );
    }

    #[tokio::test]
    async fn test_after_error_returns_error_unchanged() {
        let (interceptor, component) = interceptor();
        let mut tag = RequestTag::for_component(component);
        interceptor
            .before_request(&mut tag, "/x", CancelHandle::noop())
            .await
            .unwrap();

        let error = interceptor.after_error(&tag, "timeout");
        assert_eq!(error, "timeout");
    }

    #[test]
    fn test_after_response_on_untracked_tag_is_noop() {
        let (interceptor, _) = interceptor();
        assert_eq!(interceptor.after_response(&RequestTag::default()), None);
    }
}
