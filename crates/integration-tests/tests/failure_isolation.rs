//! Circuit breaking in front of the delivery queue

mod common;

use common::{memory_pool, Harness, START_MILLIS};
use serde_json::json;
use shopguard_core::application::{shutdown_channel, CallError, IsolatorConfig, EMAIL_SERVICE};
use shopguard_core::domain::{
    CircuitConfig, CircuitState, OperationKind, OperationPayload, OperationStatus, Priority,
};
use shopguard_core::port::notifier::mocks::RecordingNotifier;
use shopguard_core::port::{DispatchError, Notification};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Three timeouts open the email circuit; the fourth call never reaches the service
#[tokio::test]
async fn test_email_circuit_opens_and_fails_fast() {
    let config = IsolatorConfig::default().with_override(EMAIL_SERVICE, CircuitConfig::new(3, 120_000));
    let mut h = Harness::new(memory_pool().await, true, config);
    let notifier = Arc::new(RecordingNotifier::new());
    let (stop, token) = shutdown_channel();
    let relay = tokio::spawn(h.relay.take().unwrap().run(notifier.clone(), token));

    let calls = AtomicUsize::new(0);
    let invoked = &calls;
    let send_invoice = || async move {
        invoked.fetch_add(1, Ordering::SeqCst);
        Err::<(), _>(DispatchError::Timeout)
    };

    for _ in 0..3 {
        let err = h.isolator.execute(EMAIL_SERVICE, send_invoice).await.unwrap_err();
        assert_eq!(err, CallError::Dispatch(DispatchError::Timeout));
    }
    let status = h.isolator.get_status(EMAIL_SERVICE);
    assert_eq!(status.state, CircuitState::Open);
    assert_eq!(status.consecutive_failures, 3);

    h.clock.advance(5_000);
    let err = h.isolator.execute(EMAIL_SERVICE, send_invoice).await.unwrap_err();
    match err {
        CallError::CircuitOpen {
            circuit,
            retry_after_ms,
        } => {
            assert_eq!(circuit, EMAIL_SERVICE);
            assert_eq!(retry_after_ms, 115_000);
        }
        other => panic!("expected fail-fast, got {:?}", other),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    stop.shutdown();
    relay.await.unwrap();
    let sent = notifier.sent();
    assert_eq!(sent.len(), 1);
    assert!(matches!(
        &sent[0],
        Notification::CircuitOpened { circuit, consecutive_failures: 3 } if circuit == EMAIL_SERVICE
    ));
}

/// Client errors are re-raised but never trip the circuit
#[tokio::test]
async fn test_client_errors_do_not_count() {
    let h = Harness::new(memory_pool().await, true, IsolatorConfig::default());

    for _ in 0..20 {
        let result = h
            .isolator
            .execute("ticketing_service", || async {
                Err::<(), _>(DispatchError::Client { status: 422 })
            })
            .await;
        assert_eq!(
            result,
            Err(CallError::Dispatch(DispatchError::Client { status: 422 }))
        );
    }
    let status = h.isolator.get_status("ticketing_service");
    assert_eq!(status.state, CircuitState::Closed);
    assert_eq!(status.consecutive_failures, 0);
}

/// An open circuit defers queued work without spending the attempt budget,
/// then a successful probe closes it and the backlog drains
#[tokio::test]
async fn test_open_circuit_defers_queue_then_recovers() {
    let config = IsolatorConfig::default().with_override("client", CircuitConfig::new(2, 30_000));
    let h = Harness::new(memory_pool().await, true, config);
    h.dispatcher
        .set_default(Err(DispatchError::Server { status: 503 }));

    let mut ids = Vec::new();
    for n in 0..3 {
        let id = h
            .queue
            .enqueue(
                OperationKind::Client,
                OperationPayload::new(json!({ "client": n })),
                Priority::Medium,
            )
            .await
            .unwrap();
        ids.push(id);
    }

    let report = h.queue.drain().await;
    assert_eq!(report.attempted, 3);
    assert_eq!(report.retried, 2);
    assert_eq!(report.deferred, 1);
    assert_eq!(h.dispatcher.call_count(), 2);
    assert_eq!(h.isolator.get_status("client").state, CircuitState::Open);

    let deferred = h.queue.get_operation(&ids[2]).await.unwrap().unwrap();
    assert_eq!(deferred.status, OperationStatus::Pending);
    assert_eq!(deferred.attempts, 0);
    assert!(deferred.next_attempt_at.unwrap() >= START_MILLIS + 30_000);

    // Still open before the recovery timeout: nothing is sent
    h.clock.advance(10_000);
    let report = h.queue.drain().await;
    assert_eq!(report.completed, 0);
    assert_eq!(h.dispatcher.call_count(), 2);

    h.clock.advance(25_000);
    h.dispatcher.set_default(Ok(()));
    let report = h.queue.drain().await;
    assert_eq!(report.completed, 3);
    assert_eq!(h.isolator.get_status("client").state, CircuitState::Closed);

    for id in &ids {
        let op = h.queue.get_operation(id).await.unwrap().unwrap();
        assert_eq!(op.status, OperationStatus::Completed);
        assert!(op.attempts <= 1);
    }
}

/// A failed probe reopens the circuit for a full recovery timeout
#[tokio::test]
async fn test_failed_probe_reopens() {
    let config = IsolatorConfig::default().with_override("quote", CircuitConfig::new(1, 10_000));
    let h = Harness::new(memory_pool().await, true, config);

    let fail = || async { Err::<(), _>(DispatchError::Connection("refused".into())) };
    assert!(h.isolator.execute("quote", fail).await.is_err());
    assert_eq!(h.isolator.get_status("quote").state, CircuitState::Open);

    h.clock.advance(10_000);
    let err = h.isolator.execute("quote", fail).await.unwrap_err();
    assert!(!err.is_circuit_open());

    let status = h.isolator.get_status("quote");
    assert_eq!(status.state, CircuitState::Open);
    assert_eq!(status.retry_after_ms, Some(10_000));

    assert!(h.isolator.reset("quote"));
    assert_eq!(h.isolator.get_status("quote").state, CircuitState::Closed);
    let ok = h.isolator.execute("quote", || async { Ok::<_, DispatchError>(7) }).await;
    assert_eq!(ok, Ok(7));
}
