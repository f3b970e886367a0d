//! Pending queue
//!
//! TigerStyle: Arrival order is the only order, sequence numbers never repeat.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::oneshot;

use concerto_core::compat::{CompatibilityResolver, Invocation, InvocationDescriptor};
use concerto_core::error::Result;

use crate::policy::DegreeBudget;
use crate::running::RunningSet;

/// Result slot of one request
pub type ReplySender = oneshot::Sender<Result<Bytes>>;

/// A request waiting to be dispatched
#[derive(Debug)]
pub struct PendingRequest {
    /// Arrival sequence number, strictly increasing per object
    pub sequence: u64,
    /// Resolved compatibility metadata
    pub descriptor: Arc<InvocationDescriptor>,
    /// Serialized arguments
    pub args: Bytes,
    /// Channel receiving the outcome, resolved exactly once
    pub reply_tx: ReplySender,
    /// When the request arrived (monotonic ms)
    pub enqueued_at_ms: u64,
}

impl PendingRequest {
    /// Method name
    pub fn method(&self) -> &str {
        &self.descriptor.method
    }

    /// View for the resolver
    pub fn invocation(&self) -> Invocation<'_> {
        Invocation::new(&self.descriptor, &self.args)
    }
}

/// How far a scan of the [`PendingQueue`] may look past the head
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scan {
    /// Requests start strictly in arrival order; the scan stops at the first
    /// one that cannot start
    Head,
    /// A request may pass earlier ones left waiting only if it is mutually
    /// compatible with each of them
    Ordered,
    /// Any request, regardless of what is ahead of it
    Any,
}

/// Arrival-ordered buffer of requests not yet dispatched
///
/// # TigerStyle
/// - FIFO by sequence number
/// - Sequence numbers are assigned here and never reused
/// - No silent drops: every request leaves through `remove` or `withdraw_all`
#[derive(Debug, Default)]
pub struct PendingQueue {
    queue: VecDeque<PendingRequest>,
    /// Next sequence number to hand out
    next_sequence: u64,
    /// Total requests removed for dispatch (for metrics)
    removed_count: u64,
}

impl PendingQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a request and return its sequence number
    pub fn enqueue(
        &mut self,
        descriptor: Arc<InvocationDescriptor>,
        args: Bytes,
        reply_tx: ReplySender,
        enqueued_at_ms: u64,
    ) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        debug_assert!(
            self.queue.back().map_or(true, |last| last.sequence < sequence),
            "sequence numbers must be strictly increasing"
        );

        self.queue.push_back(PendingRequest {
            sequence,
            descriptor,
            args,
            reply_tx,
            enqueued_at_ms,
        });
        sequence
    }

    /// First request that could start now under `scan`
    ///
    /// Admissibility is tested against `running` only; no degree applies.
    pub fn peek_admissible_from(
        &self,
        running: &RunningSet,
        resolver: &CompatibilityResolver,
        scan: Scan,
    ) -> Option<&PendingRequest> {
        let mut budget = DegreeBudget::unbounded(running);
        self.scan(running, resolver, scan, &mut budget, 1)
            .into_iter()
            .next()
    }

    /// Every request one selection pass under `scan` would start, in start
    /// order
    ///
    /// Each pick takes a slot from `budget` and is treated as running for
    /// the requests after it: a later candidate must clear it as well as
    /// `running`.
    pub fn admissible_from(
        &self,
        running: &RunningSet,
        resolver: &CompatibilityResolver,
        scan: Scan,
        budget: &mut DegreeBudget,
    ) -> Vec<&PendingRequest> {
        self.scan(running, resolver, scan, budget, usize::MAX)
    }

    fn scan(
        &self,
        running: &RunningSet,
        resolver: &CompatibilityResolver,
        scan: Scan,
        budget: &mut DegreeBudget,
        limit: usize,
    ) -> Vec<&PendingRequest> {
        let mut picked: Vec<&PendingRequest> = Vec::new();
        let mut waiting: Vec<&PendingRequest> = Vec::new();

        for request in &self.queue {
            if picked.len() >= limit || budget.exhausted() {
                break;
            }
            let invocation = request.invocation();

            let may_pass = scan != Scan::Ordered
                || waiting
                    .iter()
                    .all(|w| resolver.mutually_compatible(&invocation, &w.invocation()));
            let starts = may_pass
                && budget.available(&request.descriptor)
                && picked
                    .iter()
                    .all(|p| resolver.compatible(&invocation, &p.invocation()))
                && running.admits(&invocation, resolver);

            if starts {
                budget.take(&request.descriptor);
                picked.push(request);
            } else if scan == Scan::Head {
                break;
            } else {
                waiting.push(request);
            }
        }

        debug_assert!(picked.len() <= limit);
        picked
    }

    /// Remove a request by sequence number
    pub fn remove(&mut self, sequence: u64) -> Option<PendingRequest> {
        let index = self
            .queue
            .binary_search_by_key(&sequence, |r| r.sequence)
            .ok()?;
        let request = self.queue.remove(index)?;
        self.removed_count = self.removed_count.wrapping_add(1);

        debug_assert_eq!(request.sequence, sequence);
        Some(request)
    }

    /// Look up a request by sequence number
    pub fn get(&self, sequence: u64) -> Option<&PendingRequest> {
        let index = self
            .queue
            .binary_search_by_key(&sequence, |r| r.sequence)
            .ok()?;
        self.queue.get(index)
    }

    /// Drain every pending request
    ///
    /// Used on termination; the caller fails each result slot.
    pub fn withdraw_all(&mut self) -> Vec<PendingRequest> {
        self.queue.drain(..).collect()
    }

    /// Oldest pending request
    pub fn head(&self) -> Option<&PendingRequest> {
        self.queue.front()
    }

    /// Pending requests in arrival order
    pub fn iter(&self) -> impl Iterator<Item = &PendingRequest> {
        self.queue.iter()
    }

    /// Number of pending requests
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Total sequence numbers handed out
    pub fn enqueued_count(&self) -> u64 {
        self.next_sequence
    }

    /// Total requests removed for dispatch
    pub fn removed_count(&self) -> u64 {
        self.removed_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::running::RunningRequest;
    use concerto_core::compat::{ClassDescriptorBuilder, CompatibilityTable};
    use concerto_core::config::{LimitMode, MethodConfig};

    fn table() -> Arc<CompatibilityTable> {
        ClassDescriptorBuilder::new("Store")
            .fields(["data", "log"])
            .method("read", MethodConfig::default().reading(["data"]))
            .method("write", MethodConfig::default().modifying(["data"]))
            .method("append", MethodConfig::default().modifying(["log"]))
            .build()
            .unwrap()
    }

    fn push(queue: &mut PendingQueue, table: &CompatibilityTable, method: &str) -> u64 {
        let (tx, _rx) = oneshot::channel();
        queue.enqueue(table.descriptor(method).unwrap(), Bytes::new(), tx, 0)
    }

    fn running(table: &CompatibilityTable, methods: &[&str]) -> RunningSet {
        let mut set = RunningSet::new();
        for (i, method) in methods.iter().enumerate() {
            set.insert(RunningRequest {
                sequence: 1000 + i as u64,
                descriptor: table.descriptor(method).unwrap(),
                args: Bytes::new(),
                started_at_ms: 0,
            });
        }
        set
    }

    #[test]
    fn test_sequence_numbers_increase() {
        let table = table();
        let mut queue = PendingQueue::new();

        let a = push(&mut queue, &table, "read");
        let b = push(&mut queue, &table, "write");
        assert!(a < b);

        queue.remove(a).unwrap();
        let c = push(&mut queue, &table, "read");
        assert!(c > b);
        assert_eq!(queue.enqueued_count(), 3);
        assert_eq!(queue.removed_count(), 1);
    }

    #[test]
    fn test_remove_from_middle_keeps_order() {
        let table = table();
        let mut queue = PendingQueue::new();
        let seqs: Vec<u64> = (0..5).map(|_| push(&mut queue, &table, "read")).collect();

        let removed = queue.remove(seqs[2]).unwrap();
        assert_eq!(removed.sequence, seqs[2]);
        assert!(queue.remove(seqs[2]).is_none());

        let remaining: Vec<u64> = queue.iter().map(|r| r.sequence).collect();
        assert_eq!(remaining, vec![seqs[0], seqs[1], seqs[3], seqs[4]]);
        assert_eq!(queue.head().unwrap().sequence, seqs[0]);
    }

    #[test]
    fn test_withdraw_all_empties_queue() {
        let table = table();
        let mut queue = PendingQueue::new();
        push(&mut queue, &table, "read");
        push(&mut queue, &table, "write");

        let withdrawn = queue.withdraw_all();
        assert_eq!(withdrawn.len(), 2);
        assert!(queue.is_empty());
        assert!(queue.head().is_none());
    }

    #[test]
    fn test_peek_admissible_scan_modes() {
        let table = table();
        let resolver = CompatibilityResolver::new(table.clone());
        let mut queue = PendingQueue::new();
        let _w = push(&mut queue, &table, "write");
        let r = push(&mut queue, &table, "read");

        // A reader is running: the queued writer is blocked
        let readers = running(&table, &["read"]);
        assert!(queue
            .peek_admissible_from(&readers, &resolver, Scan::Head)
            .is_none());
        assert!(queue
            .peek_admissible_from(&readers, &resolver, Scan::Ordered)
            .is_none());
        assert_eq!(
            queue
                .peek_admissible_from(&readers, &resolver, Scan::Any)
                .map(|p| p.sequence),
            Some(r)
        );

        let idle = RunningSet::new();
        assert_eq!(
            queue
                .peek_admissible_from(&idle, &resolver, Scan::Head)
                .map(PendingRequest::method),
            Some("write")
        );
    }

    fn sequences(picked: Vec<&PendingRequest>) -> Vec<u64> {
        picked.into_iter().map(|r| r.sequence).collect()
    }

    #[test]
    fn test_admissible_from_treats_picks_as_running() {
        let table = table();
        let resolver = CompatibilityResolver::new(table.clone());
        let mut queue = PendingQueue::new();
        for method in ["read", "read", "write", "read"] {
            push(&mut queue, &table, method);
        }
        let idle = RunningSet::new();
        let budget = || DegreeBudget::new(8, LimitMode::LimitAllThreads, &idle);

        // The writer waits behind the picked readers; the last reader may not
        // pass the waiting writer
        let ordered = queue.admissible_from(&idle, &resolver, Scan::Ordered, &mut budget());
        assert_eq!(sequences(ordered), vec![0, 1]);

        let any = queue.admissible_from(&idle, &resolver, Scan::Any, &mut budget());
        assert_eq!(sequences(any), vec![0, 1, 3]);

        let head = queue.admissible_from(&idle, &resolver, Scan::Head, &mut budget());
        assert_eq!(sequences(head), vec![0, 1]);
    }

    #[test]
    fn test_admissible_from_respects_budget() {
        let table = table();
        let resolver = CompatibilityResolver::new(table.clone());
        let mut queue = PendingQueue::new();
        for _ in 0..4 {
            push(&mut queue, &table, "read");
        }
        let readers = running(&table, &["read"]);
        let mut budget = DegreeBudget::new(3, LimitMode::LimitAllThreads, &readers);

        let picked = queue.admissible_from(&readers, &resolver, Scan::Ordered, &mut budget);
        assert_eq!(sequences(picked), vec![0, 1]);
        assert!(budget.exhausted());
    }

    #[test]
    fn test_ordered_scan_passes_compatible_waiters() {
        let table = table();
        let resolver = CompatibilityResolver::new(table.clone());
        let mut queue = PendingQueue::new();
        push(&mut queue, &table, "write");
        push(&mut queue, &table, "append");

        // The running writer blocks the queued writer, but the appender
        // touches a different field and may pass it
        let writer = running(&table, &["write"]);
        assert_eq!(
            queue
                .peek_admissible_from(&writer, &resolver, Scan::Ordered)
                .map(PendingRequest::method),
            Some("append")
        );
        assert!(queue
            .peek_admissible_from(&writer, &resolver, Scan::Head)
            .is_none());
    }
}
