//! Admission controller and dispatch loop
//!
//! TigerStyle: One lock, never held across an await.
//!
//! Each served object owns one [`Scheduler`]: a pending queue, a running set
//! and the serving policy, all behind a single mutex. A dedicated task runs
//! the dispatch loop. It asks the policy for a selection, re-validates every
//! proposal, moves the accepted requests into the running set and spawns one
//! worker task per request. Arrivals, completions, degree changes and
//! termination wake the loop through a `Notify` permit, so no wake-up is
//! lost between a scan and the next wait.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use concerto_core::compat::{CompatibilityResolver, InvocationDescriptor};
use concerto_core::config::{LimitMode, ReentrancyMode, ServeConfig};
use concerto_core::constants::CONCURRENCY_DEGREE_MAX;
use concerto_core::error::{Error, Result};
use concerto_core::io::TimeProvider;
use concerto_core::metrics;
use concerto_core::object::ObjectId;

use crate::activation::ObjectState;
use crate::handle::ObjectHandle;
use crate::object::{ActiveObject, ObjectContext};
use crate::pending::{PendingQueue, ReplySender};
use crate::policy::{DegreeBudget, SchedulingView, ServingPolicy};
use crate::reentrancy::{self, ServingFrame};
use crate::running::{RunningRequest, RunningSet};

/// Activation counter; frames compare instances, not object IDs
static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

// =============================================================================
// Statistics and snapshots
// =============================================================================

/// Counters for one served object
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    /// Requests accepted into the pending queue
    pub enqueued: u64,
    /// Requests moved into the running set
    pub dispatched: u64,
    /// Requests that left the running set (any outcome)
    pub completed: u64,
    /// Completed requests that returned an error or panicked
    pub failed: u64,
    /// Pending requests failed by termination
    pub withdrawn: u64,
    /// Self-calls served inline
    pub reentrant_inline: u64,
    /// Largest running set observed
    pub peak_running: usize,
}

/// A queued request as reported by [`SchedulerSnapshot`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingSummary {
    pub sequence: u64,
    pub method: String,
    pub enqueued_at_ms: u64,
}

/// An executing request as reported by [`SchedulerSnapshot`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunningSummary {
    pub sequence: u64,
    pub method: String,
    pub group: Option<String>,
    pub started_at_ms: u64,
}

/// Point-in-time view of a scheduler
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerSnapshot {
    pub object: ObjectId,
    pub policy: String,
    pub state: ObjectState,
    pub degree: usize,
    pub limit_mode: LimitMode,
    /// Queue contents in arrival order
    pub pending: Vec<PendingSummary>,
    /// Executing requests by sequence number
    pub running: Vec<RunningSummary>,
    pub stats: SchedulerStats,
}

impl SchedulerSnapshot {
    /// Oldest pending request
    pub fn oldest_pending(&self) -> Option<&PendingSummary> {
        self.pending.first()
    }
}

// =============================================================================
// Scheduler
// =============================================================================

/// State guarded by the scheduler lock
#[derive(Debug)]
struct SchedulerState {
    pending: PendingQueue,
    running: RunningSet,
    lifecycle: ObjectState,
    degree: usize,
    stats: SchedulerStats,
}

/// A request leaving the pending queue for a worker
struct Dispatch {
    sequence: u64,
    descriptor: Arc<InvocationDescriptor>,
    args: Bytes,
    reply_tx: ReplySender,
}

/// How a body finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Success,
    Error,
    Panic,
}

impl Outcome {
    fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Error => "error",
            Outcome::Panic => "panic",
        }
    }
}

/// Per-object admission controller
pub(crate) struct Scheduler {
    pub(crate) id: ObjectId,
    pub(crate) instance: u64,
    pub(crate) resolver: CompatibilityResolver,
    pub(crate) object: Arc<dyn ActiveObject>,
    pub(crate) reentrancy: ReentrancyMode,
    policy: Arc<dyn ServingPolicy>,
    limit_mode: LimitMode,
    time: Arc<dyn TimeProvider>,
    state: Mutex<SchedulerState>,
    /// Wakes the dispatch loop
    wake: Notify,
    /// Signals that nothing is pending or running
    idle: Notify,
}

impl Scheduler {
    pub(crate) fn new(
        id: ObjectId,
        resolver: CompatibilityResolver,
        object: Arc<dyn ActiveObject>,
        policy: Arc<dyn ServingPolicy>,
        config: &ServeConfig,
        time: Arc<dyn TimeProvider>,
    ) -> Self {
        debug_assert!(config.degree > 0 && config.degree <= CONCURRENCY_DEGREE_MAX);

        Self {
            id,
            instance: NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed),
            resolver,
            object,
            reentrancy: config.reentrancy,
            policy,
            limit_mode: config.limit_mode,
            time,
            state: Mutex::new(SchedulerState {
                pending: PendingQueue::new(),
                running: RunningSet::new(),
                lifecycle: ObjectState::Active,
                degree: config.degree,
                stats: SchedulerStats::default(),
            }),
            wake: Notify::new(),
            idle: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        // Bodies never run under this lock, so a poisoned guard still holds
        // consistent state
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn policy_name(&self) -> &str {
        self.policy.name()
    }

    // -------------------------------------------------------------------------
    // Arrival
    // -------------------------------------------------------------------------

    /// Accept a request into the pending queue
    ///
    /// On rejection the error is also delivered through `reply_tx`.
    pub(crate) fn enqueue(&self, method: &str, args: Bytes, reply_tx: ReplySender) -> Result<u64> {
        let Some(descriptor) = self.resolver.table().descriptor(method) else {
            let _ = reply_tx.send(Err(self.unknown_method(method)));
            return Err(self.unknown_method(method));
        };

        let accepted = {
            let mut state = self.lock();
            if state.lifecycle.can_accept() {
                let now_ms = self.time.monotonic_ms();
                let sequence = state.pending.enqueue(descriptor, args, reply_tx, now_ms);
                state.stats.enqueued += 1;
                Ok(sequence)
            } else {
                Err(reply_tx)
            }
        };

        match accepted {
            Ok(sequence) => {
                debug!(object = %self.id, sequence, method, "request enqueued");
                metrics::record_request_enqueued(method);
                self.wake.notify_one();
                Ok(sequence)
            }
            Err(reply_tx) => {
                let _ = reply_tx.send(Err(Error::terminated(self.id.to_string())));
                Err(Error::terminated(self.id.to_string()))
            }
        }
    }

    fn unknown_method(&self, method: &str) -> Error {
        Error::UnknownMethod {
            object: self.id.to_string(),
            method: method.to_string(),
        }
    }

    // -------------------------------------------------------------------------
    // Admission
    // -------------------------------------------------------------------------

    /// Run the policy and move every accepted proposal into the running set
    ///
    /// Returns `None` once the object is terminated.
    fn admit(&self) -> Option<Vec<Dispatch>> {
        let mut state = self.lock();
        if !state.lifecycle.can_accept() {
            return None;
        }
        if state.pending.is_empty() {
            return Some(Vec::new());
        }

        let proposals = {
            let view = SchedulingView::new(
                &state.pending,
                &state.running,
                &self.resolver,
                state.degree,
                self.limit_mode,
            );
            self.policy.select(&view)
        };

        let state = &mut *state;
        let mut budget = DegreeBudget::new(state.degree, self.limit_mode, &state.running);
        let mut batch = Vec::with_capacity(proposals.len());

        for sequence in proposals {
            let Some(request) = state.pending.get(sequence) else {
                warn!(object = %self.id, sequence, policy = self.policy.name(), "policy proposed a request that is not pending");
                continue;
            };
            if !budget.available(&request.descriptor) {
                warn!(object = %self.id, sequence, method = request.method(), "proposal exceeds concurrency degree, skipped");
                continue;
            }
            if !state.running.admits(&request.invocation(), &self.resolver) {
                warn!(object = %self.id, sequence, method = request.method(), "proposal incompatible with running set, skipped");
                continue;
            }

            let Some(request) = state.pending.remove(sequence) else {
                continue;
            };
            budget.take(&request.descriptor);
            state.running.insert(RunningRequest {
                sequence,
                descriptor: request.descriptor.clone(),
                args: request.args.clone(),
                started_at_ms: self.time.monotonic_ms(),
            });
            state.stats.dispatched += 1;
            state.stats.peak_running = state.stats.peak_running.max(state.running.len());

            debug!(
                object = %self.id,
                sequence,
                method = request.method(),
                running = state.running.len(),
                "request dispatched"
            );
            metrics::record_request_dispatched(request.method());

            batch.push(Dispatch {
                sequence,
                descriptor: request.descriptor,
                args: request.args,
                reply_tx: request.reply_tx,
            });
        }

        Some(batch)
    }

    /// Start a worker task for one dispatched request
    fn spawn_worker(self: &Arc<Self>, dispatch: Dispatch) {
        let scheduler = Arc::clone(self);

        tokio::spawn(async move {
            let Dispatch {
                sequence,
                descriptor,
                args,
                reply_tx,
            } = dispatch;

            let guard = RunningGuard::new(Arc::clone(&scheduler), sequence, descriptor.clone());
            let frame = ServingFrame::dispatched(
                scheduler.instance,
                scheduler.id.clone(),
                sequence,
                descriptor.clone(),
                args.clone(),
            );
            let ctx = ObjectContext::new(ObjectHandle::new(Arc::clone(&scheduler)), frame.clone());

            let result =
                reentrancy::serve(frame, scheduler.object.invoke(&ctx, &descriptor.method, args))
                    .await;

            // Leave the running set before the caller observes the result
            guard.finish(if result.is_ok() {
                Outcome::Success
            } else {
                Outcome::Error
            });
            let _ = reply_tx.send(result);
        });
    }

    // -------------------------------------------------------------------------
    // Completion
    // -------------------------------------------------------------------------

    fn complete(&self, sequence: u64, method: &str, outcome: Outcome, started: Instant) {
        let idle = {
            let mut state = self.lock();
            let removed = state.running.remove(sequence);
            debug_assert!(removed.is_some(), "request {} was not running", sequence);

            state.stats.completed += 1;
            if outcome != Outcome::Success {
                state.stats.failed += 1;
            }
            state.running.is_empty() && state.pending.is_empty()
        };

        let elapsed = started.elapsed();
        metrics::record_request_completed(method, outcome.as_str(), elapsed.as_secs_f64());
        match outcome {
            Outcome::Panic => {
                warn!(object = %self.id, sequence, method, "request body panicked")
            }
            _ => debug!(
                object = %self.id,
                sequence,
                method,
                outcome = outcome.as_str(),
                elapsed_ms = elapsed.as_millis() as u64,
                "request completed"
            ),
        }

        self.wake.notify_one();
        if idle {
            self.idle.notify_waiters();
        }
    }

    // -------------------------------------------------------------------------
    // Inline reentrancy
    // -------------------------------------------------------------------------

    pub(crate) fn record_inline(&self, method: &str, depth: usize) {
        self.lock().stats.reentrant_inline += 1;
        debug!(object = %self.id, method, depth, "self-call served inline");
        metrics::record_reentrant_inline(method);
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Withdraw every pending request and stop accepting new ones
    ///
    /// Returns the number of withdrawn requests. Running requests finish.
    pub(crate) fn terminate(&self) -> usize {
        let (withdrawn, idle) = {
            let mut state = self.lock();
            if !state.lifecycle.can_transition_to(ObjectState::Terminated)
                || state.lifecycle == ObjectState::Terminated
            {
                return 0;
            }
            state.lifecycle = ObjectState::Terminated;
            let withdrawn = state.pending.withdraw_all();
            state.stats.withdrawn += withdrawn.len() as u64;
            (withdrawn, state.running.is_empty())
        };

        let count = withdrawn.len();
        for request in withdrawn {
            let _ = request
                .reply_tx
                .send(Err(Error::terminated(self.id.to_string())));
        }

        metrics::record_requests_withdrawn(count as u64);
        info!(object = %self.id, withdrawn = count, "object terminated");

        self.wake.notify_one();
        if idle {
            self.idle.notify_waiters();
        }
        count
    }

    pub(crate) fn state(&self) -> ObjectState {
        self.lock().lifecycle
    }

    /// Resolve once nothing is pending or running
    pub(crate) async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let idle = {
                let state = self.lock();
                state.running.is_empty() && state.pending.is_empty()
            };
            if idle {
                return;
            }
            notified.await;
        }
    }

    // -------------------------------------------------------------------------
    // Serving controller
    // -------------------------------------------------------------------------

    pub(crate) fn degree(&self) -> usize {
        self.lock().degree
    }

    /// Apply a new degree if it is within `1..=CONCURRENCY_DEGREE_MAX`
    pub(crate) fn set_degree(&self, degree: usize) -> bool {
        self.adjust_degree(|_| Some(degree))
    }

    pub(crate) fn increment_degree(&self, by: usize) -> bool {
        self.adjust_degree(|current| current.checked_add(by))
    }

    pub(crate) fn decrement_degree(&self, by: usize) -> bool {
        self.adjust_degree(|current| current.checked_sub(by))
    }

    /// Compute and apply the next degree under one lock
    fn adjust_degree(&self, next: impl FnOnce(usize) -> Option<usize>) -> bool {
        let change = {
            let mut state = self.lock();
            match next(state.degree) {
                Some(degree) if (1..=CONCURRENCY_DEGREE_MAX).contains(&degree) => {
                    Ok((std::mem::replace(&mut state.degree, degree), degree))
                }
                rejected => Err((state.degree, rejected)),
            }
        };

        match change {
            Ok((previous, degree)) => {
                info!(object = %self.id, previous, degree, "concurrency degree changed");
                if degree > previous {
                    self.wake.notify_one();
                }
                true
            }
            Err((current, rejected)) => {
                debug!(object = %self.id, current, requested = ?rejected, "degree change ignored");
                false
            }
        }
    }

    // -------------------------------------------------------------------------
    // Introspection
    // -------------------------------------------------------------------------

    pub(crate) fn snapshot(&self) -> SchedulerSnapshot {
        let state = self.lock();
        SchedulerSnapshot {
            object: self.id.clone(),
            policy: self.policy.name().to_string(),
            state: state.lifecycle,
            degree: state.degree,
            limit_mode: self.limit_mode,
            pending: state
                .pending
                .iter()
                .map(|r| PendingSummary {
                    sequence: r.sequence,
                    method: r.method().to_string(),
                    enqueued_at_ms: r.enqueued_at_ms,
                })
                .collect(),
            running: state
                .running
                .iter()
                .map(|r| RunningSummary {
                    sequence: r.sequence,
                    method: r.method().to_string(),
                    group: r.descriptor.group.clone(),
                    started_at_ms: r.started_at_ms,
                })
                .collect(),
            stats: state.stats.clone(),
        }
    }
}

/// Removes a request from the running set when its worker ends
///
/// Dropped without `finish` only when the body panicked.
struct RunningGuard {
    scheduler: Arc<Scheduler>,
    sequence: u64,
    descriptor: Arc<InvocationDescriptor>,
    started: Instant,
    outcome: Outcome,
}

impl RunningGuard {
    fn new(scheduler: Arc<Scheduler>, sequence: u64, descriptor: Arc<InvocationDescriptor>) -> Self {
        Self {
            scheduler,
            sequence,
            descriptor,
            started: Instant::now(),
            outcome: Outcome::Panic,
        }
    }

    fn finish(mut self, outcome: Outcome) {
        self.outcome = outcome;
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.scheduler.complete(
            self.sequence,
            &self.descriptor.method,
            self.outcome,
            self.started,
        );
    }
}

/// Dispatch loop of one object
#[instrument(skip(scheduler), fields(object = %scheduler.id, policy = scheduler.policy_name()), level = "info")]
pub(crate) async fn run(scheduler: Arc<Scheduler>) {
    info!("scheduler starting");

    while let Some(batch) = scheduler.admit() {
        if batch.is_empty() {
            scheduler.wake.notified().await;
            continue;
        }
        for dispatch in batch {
            scheduler.spawn_worker(dispatch);
        }
    }

    info!("scheduler stopped");
}
