//! Metrics collection for Concerto
//!
//! TigerStyle: Explicit metric names with units, type-safe recording.
//!
//! Recorders go through the global OpenTelemetry meter when the `otel`
//! feature is enabled and compile to no-ops otherwise.

#[cfg(feature = "otel")]
use crate::constants::*;
#[cfg(feature = "otel")]
use once_cell::sync::Lazy;
#[cfg(feature = "otel")]
use opentelemetry::metrics::{Counter, Histogram};
#[cfg(feature = "otel")]
use opentelemetry::{global, KeyValue};

#[cfg(feature = "otel")]
static REQUESTS_ENQUEUED_COUNTER: Lazy<Counter<u64>> = Lazy::new(|| {
    global::meter("concerto")
        .u64_counter(METRIC_NAME_REQUESTS_ENQUEUED_TOTAL)
        .with_description("Requests accepted into a pending queue")
        .init()
});

#[cfg(feature = "otel")]
static REQUESTS_DISPATCHED_COUNTER: Lazy<Counter<u64>> = Lazy::new(|| {
    global::meter("concerto")
        .u64_counter(METRIC_NAME_REQUESTS_DISPATCHED_TOTAL)
        .with_description("Requests moved from pending to running")
        .init()
});

#[cfg(feature = "otel")]
static REQUESTS_COMPLETED_COUNTER: Lazy<Counter<u64>> = Lazy::new(|| {
    global::meter("concerto")
        .u64_counter(METRIC_NAME_REQUESTS_COMPLETED_TOTAL)
        .with_description("Requests that finished running")
        .init()
});

#[cfg(feature = "otel")]
static REQUESTS_WITHDRAWN_COUNTER: Lazy<Counter<u64>> = Lazy::new(|| {
    global::meter("concerto")
        .u64_counter(METRIC_NAME_REQUESTS_WITHDRAWN_TOTAL)
        .with_description("Pending requests failed by termination")
        .init()
});

#[cfg(feature = "otel")]
static REENTRANT_INLINE_COUNTER: Lazy<Counter<u64>> = Lazy::new(|| {
    global::meter("concerto")
        .u64_counter(METRIC_NAME_REENTRANT_INLINE_TOTAL)
        .with_description("Self-calls executed inline on the calling worker")
        .init()
});

#[cfg(feature = "otel")]
static REQUEST_DURATION_HISTOGRAM: Lazy<Histogram<f64>> = Lazy::new(|| {
    global::meter("concerto")
        .f64_histogram(METRIC_NAME_REQUEST_DURATION_SECONDS)
        .with_description("Request body duration in seconds")
        .init()
});

/// Record a request entering a pending queue
#[cfg(feature = "otel")]
pub fn record_request_enqueued(method: &str) {
    REQUESTS_ENQUEUED_COUNTER.add(1, &[KeyValue::new("method", method.to_string())]);
}

/// Record a request being dispatched
#[cfg(feature = "otel")]
pub fn record_request_dispatched(method: &str) {
    REQUESTS_DISPATCHED_COUNTER.add(1, &[KeyValue::new("method", method.to_string())]);
}

/// Record a finished request
///
/// # Arguments
/// * `method` - Method name
/// * `status` - "success", "error" or "panic"
/// * `duration_seconds` - Time spent running
#[cfg(feature = "otel")]
pub fn record_request_completed(method: &str, status: &str, duration_seconds: f64) {
    REQUESTS_COMPLETED_COUNTER.add(
        1,
        &[
            KeyValue::new("method", method.to_string()),
            KeyValue::new("status", status.to_string()),
        ],
    );

    REQUEST_DURATION_HISTOGRAM.record(
        duration_seconds,
        &[KeyValue::new("method", method.to_string())],
    );
}

/// Record pending requests withdrawn at termination
#[cfg(feature = "otel")]
pub fn record_requests_withdrawn(count: u64) {
    REQUESTS_WITHDRAWN_COUNTER.add(count, &[]);
}

/// Record a self-call executed inline
#[cfg(feature = "otel")]
pub fn record_reentrant_inline(method: &str) {
    REENTRANT_INLINE_COUNTER.add(1, &[KeyValue::new("method", method.to_string())]);
}

// No-op implementations when otel feature is disabled
#[cfg(not(feature = "otel"))]
pub fn record_request_enqueued(_method: &str) {}

#[cfg(not(feature = "otel"))]
pub fn record_request_dispatched(_method: &str) {}

#[cfg(not(feature = "otel"))]
pub fn record_request_completed(_method: &str, _status: &str, _duration_seconds: f64) {}

#[cfg(not(feature = "otel"))]
pub fn record_requests_withdrawn(_count: u64) {}

#[cfg(not(feature = "otel"))]
pub fn record_reentrant_inline(_method: &str) {}
