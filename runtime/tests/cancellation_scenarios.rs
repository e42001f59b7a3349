//! End-to-end cancellation scenarios through `CancelableClient` and the mock transport.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use cancelable_requests_core::{
    CancelHandle, CancelableState, CancellationRegistry, ComponentId, LifecycleAdapter,
    RegistryConfig, RequestId, RequestTag, SlotState, is_canceled_outcome, wrap_error_handler,
    wrap_success_handler,
};
use cancelable_requests_runtime::{
    CancelInterceptor, CancelableClient, RequestError, RequestOptions, RequestOutcome, Response,
};
use cancelable_requests_testing::{
    MockError, MockRequest, MockTransport, SequentialIds, counting_handle, init_test_tracing,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_test::{assert_pending, assert_ready};

type Sent = JoinHandle<Result<Response<String>, RequestError<MockError>>>;

struct Harness {
    registry: Arc<CancellationRegistry>,
    transport: MockTransport,
    client: Arc<CancelableClient<MockTransport>>,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    fn with_config(config: RegistryConfig) -> Self {
        init_test_tracing();
        let registry = Arc::new(CancellationRegistry::new(config));
        let transport = MockTransport::new();
        let client = Arc::new(CancelableClient::new(
            transport.clone(),
            Arc::clone(&registry),
        ));
        Self {
            registry,
            transport,
            client,
        }
    }

    fn spawn_send(&self, target: &str, options: RequestOptions) -> Sent {
        let client = Arc::clone(&self.client);
        let request = MockRequest::new(target);
        tokio::spawn(async move { client.send(request, options).await })
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_supersession_then_unmount_leaves_nothing() {
    let harness = Harness::new();
    let component = harness.registry.register(ComponentId::from("A"));
    let list = RequestId::from("list");
    let tag = || RequestTag::for_component(component.clone()).with_request_id("list");
    let _first_responder = harness.transport.script("/api/list");
    let _second_responder = harness.transport.script("/api/list");

    let first = harness.spawn_send("/api/list", tag().into());
    wait_until(|| harness.registry.pending_count(&component, &list) == 1).await;

    let second = harness.spawn_send("/api/list", tag().into());
    let first_error = first.await.unwrap().unwrap_err();

    assert!(CancelableClient::<MockTransport>::is_cancel(&first_error));
    assert!(is_canceled_outcome(&first_error));
    assert_eq!(harness.transport.cancel_count(), 1);

    wait_until(|| harness.registry.pending_count(&component, &list) == 1).await;
    let report = harness.registry.unregister(&component, true);

    assert_eq!(report.handles_invoked, 1);
    let second_error = second.await.unwrap().unwrap_err();
    assert!(second_error.is_canceled());
    assert!(is_canceled_outcome(&second_error));
    assert_eq!(harness.transport.cancel_count(), 2);
    assert!(harness.registry.snapshot(&component).is_none());
    assert!(!harness.registry.is_registered(&component));
}

#[tokio::test]
async fn test_completed_response_reflects_later_cancel() {
    let harness = Harness::new();
    let component = harness.registry.register(ComponentId::from("A"));

    let response = harness
        .client
        .send(
            MockRequest::new("/api/users"),
            RequestTag::for_component(component.clone()).into(),
        )
        .await
        .unwrap();

    let request = RequestId::from("/api/users");
    let label = response.tag().and_then(RequestTag::instance).unwrap();
    assert_eq!(
        harness.registry.slot_state(&component, &request, &label),
        Some(SlotState::Removed)
    );
    assert!(!response.is_canceled());

    let report = harness.registry.cancel_request(&component, &request);

    assert_eq!(report.tombstones_upgraded, 1);
    assert_eq!(report.handles_invoked, 0);
    assert!(response.is_canceled());
    assert_eq!(harness.transport.cancel_count(), 0);
}

#[tokio::test]
async fn test_completed_response_stays_live_without_upgrade() {
    let harness = Harness::with_config(
        RegistryConfig::builder()
            .change_remove_on_cancel(false)
            .build(),
    );
    let component = harness.registry.register(ComponentId::from("A"));

    let response = harness
        .client
        .send(
            MockRequest::new("/api/users"),
            RequestTag::for_component(component.clone()).into(),
        )
        .await
        .unwrap();
    harness
        .registry
        .cancel_request(&component, &RequestId::from("/api/users"));

    assert!(!response.is_canceled());
}

#[tokio::test]
async fn test_success_handler_skipped_after_unmount() {
    let harness = Harness::new();
    let component = harness.registry.register(ComponentId::from("A"));
    let rendered: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&rendered);
    let mut render = wrap_success_handler(move |response: Response<String>| {
        sink.lock().unwrap().push(response.into_body());
    });

    let live = harness
        .client
        .send(
            MockRequest::new("/api/a"),
            RequestTag::for_component(component.clone()).into(),
        )
        .await
        .unwrap();
    let stale = harness
        .client
        .send(
            MockRequest::new("/api/b"),
            RequestTag::for_component(component.clone()).into(),
        )
        .await
        .unwrap();

    assert_eq!(render(live), Some(()));
    harness.registry.unregister(&component, true);
    assert_eq!(render(stale), None);

    assert_eq!(*rendered.lock().unwrap(), vec!["response from /api/a".to_string()]);
}

#[tokio::test]
async fn test_transport_failure_reaches_error_handler() {
    let harness = Harness::new();
    let component = harness.registry.register(ComponentId::from("A"));
    let responder = harness.transport.script("/api/users");
    let reported: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&reported);
    let mut report = wrap_error_handler(move |error: RequestError<MockError>| {
        sink.lock().unwrap().push(error.to_string());
    });

    let sent = harness.spawn_send("/api/users", RequestTag::for_component(component).into());
    responder.fail("503");
    let error = sent.await.unwrap().unwrap_err();

    assert_eq!(report(error), Some(()));
    assert_eq!(
        *reported.lock().unwrap(),
        vec!["Transport error: Scripted failure: 503".to_string()]
    );
}

#[tokio::test]
async fn test_misuse_fails_open() {
    let harness = Harness::new();

    let untagged_component = harness
        .client
        .send(MockRequest::new("/x"), RequestTag::default().into())
        .await
        .unwrap();
    let unregistered = harness
        .client
        .send(
            MockRequest::new("/x"),
            RequestTag::for_component("ghost").into(),
        )
        .await
        .unwrap();

    assert!(!untagged_component.tag().unwrap().is_tracked());
    assert!(!unregistered.tag().unwrap().is_tracked());
    assert!(!unregistered.is_canceled());
    assert_eq!(harness.registry.stats().request_groups, 0);
}

#[tokio::test]
async fn test_teardown_during_yield_cancels_immediately() {
    let registry = Arc::new(CancellationRegistry::default());
    let interceptor = CancelInterceptor::new(Arc::clone(&registry));
    let component = registry.register(ComponentId::from("A"));
    let (handle, calls) = counting_handle();
    let mut tag = RequestTag::for_component(component.clone());

    let label = {
        let mut before = tokio_test::task::spawn(interceptor.before_request(&mut tag, "/x", handle));
        assert_pending!(before.poll());

        registry.unregister(&component, true);

        assert_ready!(before.poll())
    };

    assert!(label.is_some());
    assert_eq!(calls.count(), 1);
    assert!(tag.is_canceled());

    registry.register(component);
    assert!(tag.is_canceled());
}

#[tokio::test]
async fn test_cancel_during_yield_finds_nothing() {
    let registry = Arc::new(CancellationRegistry::default());
    let interceptor = CancelInterceptor::new(Arc::clone(&registry));
    let component = registry.register(ComponentId::from("A"));
    let request = RequestId::from("/x");
    let mut tag = RequestTag::for_component(component.clone());

    let label = {
        let mut before =
            tokio_test::task::spawn(interceptor.before_request(&mut tag, "/x", CancelHandle::noop()));
        assert_pending!(before.poll());

        let report = registry.cancel_request(&component, &request);
        assert_eq!(report.handles_invoked, 0);

        assert_ready!(before.poll()).unwrap()
    };

    assert_eq!(
        registry.slot_state(&component, &request, &label),
        Some(SlotState::Pending)
    );
    assert!(!tag.is_canceled());
}

#[tokio::test]
async fn test_lifecycle_destroy_cancels_in_flight_request() {
    let harness = Harness::new();
    let adapter =
        LifecycleAdapter::with_id_generator(Arc::clone(&harness.registry), Arc::new(SequentialIds::new()));
    let mut state = CancelableState::default();
    let component = adapter.on_create(&mut state);
    let _responder = harness.transport.script("/api/feed");
    let outcome: Arc<Mutex<Option<RequestOutcome>>> = Arc::new(Mutex::new(None));
    let outcome_sink = Arc::clone(&outcome);

    let sent = harness.spawn_send(
        "/api/feed",
        RequestOptions::new()
            .tag(state.tag())
            .on_end(move |ended| *outcome_sink.lock().unwrap() = Some(ended)),
    );
    wait_until(|| {
        harness
            .registry
            .pending_count(&component, &RequestId::from("/api/feed"))
            == 1
    })
    .await;

    let report = adapter.on_destroy(&state);
    let error = sent.await.unwrap().unwrap_err();

    assert_eq!(component.as_str(), "component-0");
    assert_eq!(report.handles_invoked, 1);
    assert!(error.is_canceled());
    assert_eq!(*outcome.lock().unwrap(), Some(RequestOutcome::Canceled));
    assert!(!harness.registry.is_registered(&component));
}

#[tokio::test]
async fn test_handle_callback_can_cancel_directly() {
    let harness = Harness::new();
    let component = harness.registry.register(ComponentId::from("A"));
    let _responder = harness.transport.script("/api/slow");
    let handle: Arc<Mutex<Option<CancelHandle>>> = Arc::new(Mutex::new(None));
    let handle_sink = Arc::clone(&handle);

    let sent = harness.spawn_send(
        "/api/slow",
        RequestTag::for_component(component)
            .on_handle(move |h| *handle_sink.lock().unwrap() = Some(h))
            .into(),
    );
    wait_until(|| handle.lock().unwrap().is_some()).await;

    let cancel = handle.lock().unwrap().take().unwrap();
    cancel.cancel().unwrap();
    let error = sent.await.unwrap().unwrap_err();

    assert!(error.is_canceled());
    assert_eq!(harness.transport.cancel_count(), 1);
    let mut on_error = wrap_error_handler(|_: RequestError<MockError>| ());
    assert_eq!(on_error(error), None);
}

#[tokio::test]
async fn test_dropped_send_retires_pending_slot() {
    let harness = Harness::new();
    let component = harness.registry.register(ComponentId::from("A"));
    let _responder = harness.transport.script("/api/slow");

    let elapsed = tokio::time::timeout(
        Duration::from_millis(50),
        harness.client.send(
            MockRequest::new("/api/slow"),
            RequestTag::for_component(component.clone()).into(),
        ),
    )
    .await;

    assert!(elapsed.is_err());
    assert_eq!(
        harness
            .registry
            .pending_count(&component, &RequestId::from("/api/slow")),
        0
    );
    assert_eq!(harness.registry.stats().pending, 0);
    assert_eq!(harness.registry.stats().removed, 1);
}
