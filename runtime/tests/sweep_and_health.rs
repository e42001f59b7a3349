//! Tombstone sweeping and health reporting against a stepping clock.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use cancelable_requests_core::{CancellationRegistry, ComponentId, RegistryConfig, RequestTag};
use cancelable_requests_runtime::{
    CancelableClient, Sweeper, registry_health, registry_health_with_limit,
};
use cancelable_requests_testing::{MockRequest, MockTransport, SteppingClock, test_epoch};
use std::sync::Arc;
use std::time::Duration;

fn registry(clock: &Arc<SteppingClock>) -> Arc<CancellationRegistry> {
    Arc::new(CancellationRegistry::with_clock(
        RegistryConfig::builder()
            .max_tombstone_age(Duration::from_secs(300))
            .sweep_interval(Duration::from_millis(10))
            .build(),
        clock.clone(),
    ))
}

#[tokio::test]
async fn test_sweep_once_clears_completed_requests_after_max_age() {
    let clock = Arc::new(SteppingClock::new(test_epoch()));
    let registry = registry(&clock);
    let client = CancelableClient::new(MockTransport::new(), Arc::clone(&registry));
    let component = registry.register(ComponentId::from("A"));

    for page in 0..3 {
        client
            .send(
                MockRequest::new(format!("/api/users?page={page}")),
                RequestTag::for_component(component.clone()).into(),
            )
            .await
            .unwrap();
    }
    assert_eq!(registry.stats().removed, 3);

    assert_eq!(Sweeper::sweep_once(&registry).tombstones_removed, 0);

    clock.advance(Duration::from_secs(301));
    let report = Sweeper::sweep_once(&registry);

    assert_eq!(report.tombstones_removed, 3);
    assert_eq!(report.groups_removed, 3);
    assert_eq!(registry.stats().tombstones(), 0);
    assert!(registry.is_registered(&component));
}

#[tokio::test]
async fn test_background_sweeper_restores_health() {
    let clock = Arc::new(SteppingClock::new(test_epoch()));
    let registry = registry(&clock);
    let client = CancelableClient::new(MockTransport::new(), Arc::clone(&registry));
    let component = registry.register(ComponentId::from("A"));

    for n in 0..4 {
        client
            .send(
                MockRequest::new(format!("/api/item/{n}")),
                RequestTag::for_component(component.clone()).into(),
            )
            .await
            .unwrap();
    }
    assert!(registry_health_with_limit(&registry, 2).status.is_degraded());

    clock.advance(Duration::from_secs(600));
    let sweeper = Sweeper::spawn(&registry);
    tokio::time::timeout(Duration::from_secs(5), async {
        while registry.stats().tombstones() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("sweeper did not run in time");
    sweeper.shutdown().await.unwrap();

    assert!(registry_health_with_limit(&registry, 2).status.is_healthy());
    assert!(registry_health(&registry).status.is_healthy());
}
