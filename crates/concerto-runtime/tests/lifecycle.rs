//! Termination, failures, serving controller and custom policies

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use concerto_core::compat::{ClassDescriptorBuilder, CompatibilityTable};
use concerto_core::config::{LimitMode, MethodConfig, ReentrancyMode, ServeConfig};
use concerto_core::error::{Error, Result};
use concerto_core::io::ManualClock;
use concerto_runtime::{
    activate, ActiveObject, ObjectContext, ObjectHandle, ObjectState, SchedulingView,
    ServingPolicy,
};

use common::{object_id, submit_all, wait_for_running, Timeline, TimedObject};

fn store_table() -> Arc<CompatibilityTable> {
    ClassDescriptorBuilder::new("Store")
        .fields(["data"])
        .method("read", MethodConfig::default().reading(["data"]))
        .method("write", MethodConfig::default().modifying(["data"]))
        .build()
        .unwrap()
}

fn serve_store(object: TimedObject, degree: usize) -> ObjectHandle {
    activate(object_id("store"), object, store_table())
        .serve(ServeConfig::multi_active(
            degree,
            LimitMode::LimitAllThreads,
            ReentrancyMode::NonReentrant,
        ))
        .unwrap()
}

// =============================================================================
// Termination
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_terminate_withdraws_pending_requests() {
    let handle = serve_store(TimedObject::new(Timeline::default()).with("write", 10), 4);

    let replies: Vec<_> = (0..3)
        .map(|i| handle.submit("write", Bytes::from(format!("write-{}", i))).unwrap())
        .collect();
    wait_for_running(&handle, 1).await;

    assert_eq!(handle.terminate(), 2);
    assert!(handle.is_terminated());
    assert_eq!(handle.state(), ObjectState::Terminated);

    // Terminating twice withdraws nothing more
    assert_eq!(handle.terminate(), 0);

    let results = futures::future::join_all(replies.into_iter().map(|r| r.wait())).await;
    assert_eq!(results[0].as_ref().unwrap(), &Bytes::from("write-0"));
    assert!(results[1].as_ref().unwrap_err().is_terminated());
    assert!(results[2].as_ref().unwrap_err().is_terminated());

    let rejected = handle.submit("write", Bytes::new());
    assert!(matches!(rejected, Err(Error::ObjectTerminated { .. })));
    let rejected = handle.invoke("read", Bytes::new()).await;
    assert!(matches!(rejected, Err(Error::ObjectTerminated { .. })));

    handle.wait_idle().await;
    let snapshot = handle.snapshot();
    assert!(snapshot.pending.is_empty());
    assert!(snapshot.running.is_empty());
    assert_eq!(snapshot.stats.withdrawn, 2);
    assert_eq!(snapshot.stats.completed, 1);
}

#[tokio::test(start_paused = true)]
async fn test_wait_idle_resolves_after_the_last_request() {
    let timeline = Timeline::default();
    let handle = serve_store(
        TimedObject::new(timeline.clone())
            .with("read", 10)
            .with("write", 30),
        4,
    );

    // Idle from the start
    handle.wait_idle().await;

    for (i, method) in ["write", "read", "read"].iter().enumerate() {
        let reply = handle
            .submit(method, Bytes::from(format!("{}-{}", method, i)))
            .unwrap();
        drop(reply);
    }
    handle.wait_idle().await;

    assert_eq!(timeline.spans().len(), 3);
    assert_eq!(handle.snapshot().stats.completed, 3);
}

// =============================================================================
// Failures
// =============================================================================

struct Flaky;

#[async_trait]
impl ActiveObject for Flaky {
    async fn invoke(&self, _ctx: &ObjectContext, method: &str, args: Bytes) -> Result<Bytes> {
        match method {
            "fail" => Err(anyhow::anyhow!("disk unavailable").into()),
            "panic" => panic!("body exploded"),
            _ => Ok(args),
        }
    }
}

fn flaky_table() -> Arc<CompatibilityTable> {
    ClassDescriptorBuilder::new("Flaky")
        .method("fail", MethodConfig::default())
        .method("panic", MethodConfig::default())
        .method("ok", MethodConfig::default())
        .build()
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_failures_stay_with_their_request() {
    let handle = activate(object_id("flaky"), Flaky, flaky_table())
        .serve(ServeConfig::default())
        .unwrap();

    let results = submit_all(&handle, &["fail", "panic", "ok"]).await;

    match &results[0] {
        Err(Error::Other(e)) => assert_eq!(e.to_string(), "disk unavailable"),
        other => panic!("expected body error, got {:?}", other),
    }
    assert!(matches!(
        &results[1],
        Err(Error::InvocationPanicked { method, .. }) if method == "panic"
    ));
    assert_eq!(results[2].as_ref().unwrap(), &Bytes::from("ok-2"));

    // The object keeps serving
    let again = handle.invoke("ok", Bytes::from_static(b"again")).await.unwrap();
    assert_eq!(&again[..], b"again");

    let snapshot = handle.snapshot();
    assert_eq!(snapshot.stats.completed, 4);
    assert_eq!(snapshot.stats.failed, 2);
    assert!(snapshot.running.is_empty());
    assert_eq!(snapshot.state, ObjectState::Active);
}

#[tokio::test]
async fn test_unknown_method_is_rejected() {
    let handle = activate(object_id("flaky"), Flaky, flaky_table())
        .serve(ServeConfig::default())
        .unwrap();

    let result = handle.submit("missing", Bytes::new());
    assert!(matches!(
        result,
        Err(Error::UnknownMethod { ref method, .. }) if method == "missing"
    ));

    // A caller-provided slot receives the same error
    let (reply_tx, rx) = oneshot::channel();
    assert!(handle.enqueue("missing", Bytes::new(), reply_tx).is_err());
    assert!(matches!(rx.await.unwrap(), Err(Error::UnknownMethod { .. })));

    assert_eq!(handle.snapshot().stats.enqueued, 0);
}

#[tokio::test(start_paused = true)]
async fn test_invoke_timeout_leaves_request_running() {
    let handle = serve_store(TimedObject::new(Timeline::default()).with("write", 100), 1)
        .with_timeout(Duration::from_millis(5));

    let result = handle.invoke("write", Bytes::new()).await;
    assert!(matches!(
        result,
        Err(Error::InvocationTimeout { timeout_ms: 5, .. })
    ));

    handle.wait_idle().await;
    assert_eq!(handle.snapshot().stats.completed, 1);
    assert_eq!(handle.snapshot().stats.failed, 0);
}

// =============================================================================
// Typed requests
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct AddRequest {
    a: i64,
    b: i64,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct AddResponse {
    sum: i64,
}

struct Adder;

#[async_trait]
impl ActiveObject for Adder {
    async fn invoke(&self, _ctx: &ObjectContext, method: &str, args: Bytes) -> Result<Bytes> {
        let request: AddRequest = serde_json::from_slice(&args)
            .map_err(|e| Error::invocation_failed("adder", method, e.to_string()))?;
        let response = AddResponse {
            sum: request.a + request.b,
        };
        let payload = serde_json::to_vec(&response)
            .map_err(|e| Error::invocation_failed("adder", method, e.to_string()))?;
        Ok(Bytes::from(payload))
    }
}

#[tokio::test]
async fn test_typed_request() {
    let table = ClassDescriptorBuilder::new("Adder")
        .group("math", true)
        .method("add", MethodConfig::default().in_group("math"))
        .build()
        .unwrap();
    let handle = activate(object_id("adder"), Adder, table)
        .serve(ServeConfig::default())
        .unwrap();

    let response: AddResponse = handle
        .request("add", &AddRequest { a: 2, b: 40 })
        .await
        .unwrap();
    assert_eq!(response, AddResponse { sum: 42 });

    let malformed: Result<String> = handle.request("add", &AddRequest { a: 1, b: 1 }).await;
    assert!(matches!(malformed, Err(Error::DeserializationFailed { .. })));
}

// =============================================================================
// Introspection
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_snapshot_reports_queue_and_running_set() {
    let clock = Arc::new(ManualClock::new(1_000));
    let handle = activate(
        object_id("store"),
        TimedObject::new(Timeline::default()).with("write", 10),
        store_table(),
    )
    .with_time(clock.clone())
    .serve(ServeConfig::default())
    .unwrap();

    let first = handle.submit("write", Bytes::new()).unwrap();
    clock.advance_ms(5);
    let second = handle.submit("write", Bytes::new()).unwrap();
    wait_for_running(&handle, 1).await;

    let snapshot = handle.snapshot();
    assert_eq!(snapshot.policy, "fifo");
    assert_eq!(snapshot.degree, 64);
    assert_eq!(snapshot.running.len(), 1);
    assert_eq!(snapshot.running[0].sequence, first.sequence());
    assert_eq!(snapshot.running[0].started_at_ms, 1_005);
    assert_eq!(snapshot.running[0].group, None);
    assert_eq!(snapshot.pending.len(), 1);
    assert_eq!(snapshot.pending[0].sequence, second.sequence());
    assert_eq!(snapshot.pending[0].enqueued_at_ms, 1_005);

    let json = serde_json::to_value(&snapshot).unwrap();
    assert_eq!(json["state"], "active");
    assert_eq!(json["limit_mode"], "LIMIT_ALL_THREADS");
    assert_eq!(json["stats"]["enqueued"], 2);

    first.wait().await.unwrap();
    second.wait().await.unwrap();
}

// =============================================================================
// Serving controller
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_degree_changes() {
    let timeline = Timeline::default();
    let handle = serve_store(TimedObject::new(timeline.clone()).with("read", 10), 1);

    let replies: Vec<_> = (0..3)
        .map(|i| handle.submit("read", Bytes::from(format!("read-{}", i))).unwrap())
        .collect();
    wait_for_running(&handle, 1).await;

    assert!(!handle.set_degree(0));
    assert_eq!(handle.degree(), 1);

    // Raising the degree admits the waiting readers at once
    assert!(handle.increment_degree(2));
    assert_eq!(handle.degree(), 3);
    wait_for_running(&handle, 3).await;

    for reply in replies {
        reply.wait().await.unwrap();
    }
    let first = timeline.tagged("read-0");
    assert!(first.overlaps(&timeline.tagged("read-1")));
    assert!(first.overlaps(&timeline.tagged("read-2")));

    assert!(!handle.decrement_degree(5));
    assert_eq!(handle.degree(), 3);
    assert!(handle.decrement_degree(2));
    assert_eq!(handle.degree(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_degree_adjustments_all_apply() {
    let handle = serve_store(TimedObject::new(Timeline::default()), 1);

    let raise: Vec<_> = (0..8)
        .map(|_| {
            let handle = handle.clone();
            tokio::spawn(async move {
                for _ in 0..100 {
                    assert!(handle.increment_degree(1));
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();
    for task in raise {
        task.await.unwrap();
    }
    assert_eq!(handle.degree(), 801);

    let lower: Vec<_> = (0..8)
        .map(|_| {
            let handle = handle.clone();
            tokio::spawn(async move {
                for _ in 0..100 {
                    assert!(handle.decrement_degree(1));
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();
    for task in lower {
        task.await.unwrap();
    }
    assert_eq!(handle.degree(), 1);
    assert!(!handle.decrement_degree(1));
}

#[tokio::test(start_paused = true)]
async fn test_lowered_degree_applies_to_later_admissions() {
    let timeline = Timeline::default();
    let handle = serve_store(TimedObject::new(timeline.clone()).with("read", 10), 4);

    assert!(handle.set_degree(1));
    submit_all(&handle, &["read", "read", "read"]).await;

    let spans = timeline.spans();
    for a in &spans {
        for b in spans.iter().filter(|s| s.tag != a.tag) {
            assert!(!a.overlaps(b));
        }
    }
    assert_eq!(handle.snapshot().stats.peak_running, 1);
}

// =============================================================================
// Custom policies
// =============================================================================

/// Proposes every pending request newest first, plus one that does not exist
#[derive(Debug)]
struct NewestFirst;

impl ServingPolicy for NewestFirst {
    fn name(&self) -> &str {
        "newest-first"
    }

    fn select(&self, view: &SchedulingView<'_>) -> Vec<u64> {
        let mut proposals: Vec<u64> = view.pending().iter().map(|r| r.sequence).collect();
        proposals.reverse();
        proposals.push(u64::MAX);
        proposals
    }
}

#[tokio::test(start_paused = true)]
async fn test_custom_policy_proposals_are_revalidated() {
    let timeline = Timeline::default();
    let handle = activate(
        object_id("store"),
        TimedObject::new(timeline.clone())
            .with("read", 10)
            .with("write", 10),
        store_table(),
    )
    .serve_with_policy(
        Arc::new(NewestFirst),
        ServeConfig::multi_active(4, LimitMode::LimitAllThreads, ReentrancyMode::NonReentrant),
    )
    .unwrap();

    let results = submit_all(&handle, &["write", "read", "read"]).await;
    assert!(results.iter().all(|r| r.is_ok()));

    // The readers overtake the writer, which never overlaps them
    let writer = timeline.tagged("write-0");
    for reader in timeline.of("read") {
        assert!(reader.end <= writer.start);
    }
    assert_eq!(handle.snapshot().policy, "newest-first");
}

#[tokio::test]
async fn test_serve_rejects_invalid_degree() {
    let result = activate(
        object_id("store"),
        TimedObject::new(Timeline::default()),
        store_table(),
    )
    .serve(ServeConfig::greedy(0));
    assert!(matches!(result, Err(Error::InvalidConfiguration { .. })));
}
