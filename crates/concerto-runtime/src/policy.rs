//! Serving policies
//!
//! TigerStyle: Policies propose, the scheduler disposes.
//!
//! A policy looks at a read-only [`SchedulingView`] and returns the sequence
//! numbers it wants to start, in the order they should start. The scheduler
//! re-checks each proposal against the running set and the concurrency
//! degree before dispatching it, so a custom policy can reorder but never
//! break compatibility.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use concerto_core::compat::{CompatibilityResolver, InvocationDescriptor};
use concerto_core::config::{LimitMode, PolicyKind};

use crate::pending::{PendingQueue, Scan};
use crate::running::RunningSet;

// =============================================================================
// Scheduling view
// =============================================================================

/// What a policy may look at while selecting
#[derive(Debug, Clone, Copy)]
pub struct SchedulingView<'a> {
    pending: &'a PendingQueue,
    running: &'a RunningSet,
    resolver: &'a CompatibilityResolver,
    degree: usize,
    limit_mode: LimitMode,
}

impl<'a> SchedulingView<'a> {
    /// Create a view
    pub fn new(
        pending: &'a PendingQueue,
        running: &'a RunningSet,
        resolver: &'a CompatibilityResolver,
        degree: usize,
        limit_mode: LimitMode,
    ) -> Self {
        debug_assert!(degree > 0, "degree must be positive");
        Self {
            pending,
            running,
            resolver,
            degree,
            limit_mode,
        }
    }

    /// Pending requests
    pub fn pending(&self) -> &'a PendingQueue {
        self.pending
    }

    /// Running requests
    pub fn running(&self) -> &'a RunningSet {
        self.running
    }

    /// Resolver for the object's class
    pub fn resolver(&self) -> &'a CompatibilityResolver {
        self.resolver
    }

    /// Current concurrency degree
    pub fn degree(&self) -> usize {
        self.degree
    }

    /// How the degree is counted
    pub fn limit_mode(&self) -> LimitMode {
        self.limit_mode
    }

    /// Fresh slot accounting seeded with the running set
    pub fn budget(&self) -> DegreeBudget {
        DegreeBudget::new(self.degree, self.limit_mode, self.running)
    }
}

// =============================================================================
// Degree accounting
// =============================================================================

/// Running plus provisionally selected requests, measured against `degree`
#[derive(Debug, Clone)]
pub struct DegreeBudget {
    degree: usize,
    limit_mode: LimitMode,
    total: usize,
    per_key: HashMap<String, usize>,
}

impl DegreeBudget {
    /// Seed from the current running set
    pub fn new(degree: usize, limit_mode: LimitMode, running: &RunningSet) -> Self {
        Self {
            degree,
            limit_mode,
            total: running.len(),
            per_key: match limit_mode {
                LimitMode::LimitAllThreads => HashMap::new(),
                LimitMode::LimitPerGroup => running.limit_counts.clone(),
            },
        }
    }

    /// Accounting without a limit
    pub fn unbounded(running: &RunningSet) -> Self {
        Self::new(usize::MAX, LimitMode::LimitAllThreads, running)
    }

    /// Whether a request with `descriptor` could take a slot
    pub fn available(&self, descriptor: &InvocationDescriptor) -> bool {
        match self.limit_mode {
            LimitMode::LimitAllThreads => self.total < self.degree,
            LimitMode::LimitPerGroup => {
                self.per_key
                    .get(descriptor.limit_key())
                    .copied()
                    .unwrap_or(0)
                    < self.degree
            }
        }
    }

    /// Take a slot for `descriptor`
    pub fn take(&mut self, descriptor: &InvocationDescriptor) {
        debug_assert!(self.available(descriptor));
        self.total += 1;
        if self.limit_mode == LimitMode::LimitPerGroup {
            *self
                .per_key
                .entry(descriptor.limit_key().to_string())
                .or_insert(0) += 1;
        }
    }

    /// Whether no request of any kind can take a slot
    pub fn exhausted(&self) -> bool {
        self.limit_mode == LimitMode::LimitAllThreads && self.total >= self.degree
    }
}

// =============================================================================
// Policy trait
// =============================================================================

/// Dispatch ordering strategy
pub trait ServingPolicy: Send + Sync + fmt::Debug {
    /// Name used in logs and snapshots
    fn name(&self) -> &str;

    /// Sequence numbers to start now, in start order
    fn select(&self, view: &SchedulingView<'_>) -> Vec<u64>;
}

/// Built-in policy for `kind`
pub fn policy_for(kind: PolicyKind) -> Arc<dyn ServingPolicy> {
    match kind {
        PolicyKind::Fifo => Arc::new(FifoPolicy),
        PolicyKind::MultiActive => Arc::new(MultiActivePolicy),
        PolicyKind::Greedy => Arc::new(GreedyPolicy),
    }
}

// =============================================================================
// Built-in policies
// =============================================================================

/// Classic active object: the head starts only when nothing is running
#[derive(Debug, Clone, Copy, Default)]
pub struct FifoPolicy;

impl ServingPolicy for FifoPolicy {
    fn name(&self) -> &str {
        "fifo"
    }

    fn select(&self, view: &SchedulingView<'_>) -> Vec<u64> {
        if !view.running().is_empty() {
            return Vec::new();
        }
        view.pending()
            .peek_admissible_from(view.running(), view.resolver(), Scan::Head)
            .map(|request| vec![request.sequence])
            .unwrap_or_default()
    }
}

/// Bounded concurrency that never lets a request overtake an earlier one it
/// is incompatible with
///
/// Requests are visited in arrival order. A request starts if a slot is
/// free, it is admissible against the running set and everything already
/// picked in this pass, and it is mutually compatible with every earlier
/// request left waiting.
#[derive(Debug, Clone, Copy, Default)]
pub struct MultiActivePolicy;

impl ServingPolicy for MultiActivePolicy {
    fn name(&self) -> &str {
        "multi-active"
    }

    fn select(&self, view: &SchedulingView<'_>) -> Vec<u64> {
        view.pending()
            .admissible_from(view.running(), view.resolver(), Scan::Ordered, &mut view.budget())
            .into_iter()
            .map(|request| request.sequence)
            .collect()
    }
}

/// Bounded concurrency without head-of-line blocking
///
/// Any admissible request starts, whatever is queued ahead of it. Two
/// incompatible requests may therefore start out of arrival order; this is
/// the policy's contract, traded for throughput.
#[derive(Debug, Clone, Copy, Default)]
pub struct GreedyPolicy;

impl ServingPolicy for GreedyPolicy {
    fn name(&self) -> &str {
        "greedy"
    }

    fn select(&self, view: &SchedulingView<'_>) -> Vec<u64> {
        view.pending()
            .admissible_from(view.running(), view.resolver(), Scan::Any, &mut view.budget())
            .into_iter()
            .map(|request| request.sequence)
            .collect()
    }
}
