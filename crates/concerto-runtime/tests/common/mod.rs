//! Shared fixtures for scheduler tests
//!
//! Bodies sleep for a configured time and record when they ran. Tests use
//! `start_paused = true`, so the recorded instants are virtual and exact.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::Instant;

use concerto_core::error::{Error, Result};
use concerto_core::object::ObjectId;
use concerto_runtime::{ActiveObject, ObjectContext, ObjectHandle};

/// One executed body
#[derive(Debug, Clone)]
pub struct Span {
    pub method: String,
    pub tag: String,
    pub start: Instant,
    pub end: Instant,
}

impl Span {
    /// Half-open interval overlap
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Shared record of executed bodies
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    spans: Arc<Mutex<Vec<Span>>>,
}

impl Timeline {
    pub fn record(&self, span: Span) {
        self.spans.lock().unwrap().push(span);
    }

    pub fn spans(&self) -> Vec<Span> {
        self.spans.lock().unwrap().clone()
    }

    pub fn of(&self, method: &str) -> Vec<Span> {
        self.spans()
            .into_iter()
            .filter(|s| s.method == method)
            .collect()
    }

    pub fn tagged(&self, tag: &str) -> Span {
        self.spans()
            .into_iter()
            .find(|s| s.tag == tag)
            .unwrap_or_else(|| panic!("no span tagged {}", tag))
    }

    /// Tags ordered by start instant, ties by tag
    pub fn start_order(&self) -> Vec<String> {
        let mut spans = self.spans();
        spans.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.tag.cmp(&b.tag)));
        spans.into_iter().map(|s| s.tag).collect()
    }
}

/// Object whose methods sleep for a fixed time and echo their arguments
///
/// The argument bytes are used as the span tag.
pub struct TimedObject {
    durations: HashMap<String, Duration>,
    timeline: Timeline,
}

impl TimedObject {
    pub fn new(timeline: Timeline) -> Self {
        Self {
            durations: HashMap::new(),
            timeline,
        }
    }

    pub fn with(mut self, method: &str, millis: u64) -> Self {
        self.durations
            .insert(method.to_string(), Duration::from_millis(millis));
        self
    }
}

#[async_trait]
impl ActiveObject for TimedObject {
    async fn invoke(&self, _ctx: &ObjectContext, method: &str, args: Bytes) -> Result<Bytes> {
        let duration = self
            .durations
            .get(method)
            .copied()
            .ok_or_else(|| Error::invocation_failed("timed", method, "no duration configured"))?;

        let start = Instant::now();
        tokio::time::sleep(duration).await;
        self.timeline.record(Span {
            method: method.to_string(),
            tag: String::from_utf8_lossy(&args).into_owned(),
            start,
            end: Instant::now(),
        });
        Ok(args)
    }
}

pub fn object_id(name: &str) -> ObjectId {
    ObjectId::new("test", name).unwrap()
}

/// Submit `methods` in order, tagging each `"{method}-{index}"`, and wait
/// for every result
pub async fn submit_all(handle: &ObjectHandle, methods: &[&str]) -> Vec<Result<Bytes>> {
    let replies: Vec<_> = methods
        .iter()
        .enumerate()
        .map(|(i, method)| {
            handle
                .submit(method, Bytes::from(format!("{}-{}", method, i)))
                .unwrap()
        })
        .collect();

    futures::future::join_all(replies.into_iter().map(|r| r.wait())).await
}

/// Poll the snapshot until `running` requests execute
pub async fn wait_for_running(handle: &ObjectHandle, running: usize) {
    for _ in 0..1000 {
        if handle.snapshot().running.len() == running {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("running set never reached {} requests", running);
}
