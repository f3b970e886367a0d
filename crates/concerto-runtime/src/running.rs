//! Running set
//!
//! TigerStyle: Aggregates are kept in step with entries on every insert and
//! remove.
//!
//! Besides the requests themselves the set keeps per-field read and write
//! counts. When every running request declares its field access and the
//! candidate's access misses all of them, admission is decided without
//! visiting individual entries.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use bytes::Bytes;

use concerto_core::compat::{
    CompatibilityResolver, FieldSet, Invocation, InvocationDescriptor,
};

/// A dispatched request
#[derive(Debug, Clone)]
pub struct RunningRequest {
    /// Arrival sequence number
    pub sequence: u64,
    /// Resolved compatibility metadata
    pub descriptor: Arc<InvocationDescriptor>,
    /// Serialized arguments (conditions may inspect them)
    pub args: Bytes,
    /// When the request was dispatched (monotonic ms)
    pub started_at_ms: u64,
}

impl RunningRequest {
    /// Method name
    pub fn method(&self) -> &str {
        &self.descriptor.method
    }

    /// View for the resolver
    pub fn invocation(&self) -> Invocation<'_> {
        Invocation::new(&self.descriptor, &self.args)
    }
}

/// Currently executing requests of one object
#[derive(Debug, Default)]
pub struct RunningSet {
    entries: BTreeMap<u64, RunningRequest>,
    /// Running count per `limit_key`
    pub(crate) limit_counts: HashMap<String, usize>,
    field_reads: HashMap<String, usize>,
    field_writes: HashMap<String, usize>,
    /// Running requests reading every field
    reads_all: usize,
    /// Running requests without declared field access
    undeclared: usize,
}

fn increment(counts: &mut HashMap<String, usize>, key: &str) {
    *counts.entry(key.to_string()).or_insert(0) += 1;
}

fn decrement(counts: &mut HashMap<String, usize>, key: &str) {
    if let Some(count) = counts.get_mut(key) {
        debug_assert!(*count > 0);
        *count -= 1;
        if *count == 0 {
            counts.remove(key);
        }
    }
}

impl RunningSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a dispatched request
    pub fn insert(&mut self, request: RunningRequest) {
        debug_assert!(
            !self.entries.contains_key(&request.sequence),
            "request {} is already running",
            request.sequence
        );

        let descriptor = &request.descriptor;
        increment(&mut self.limit_counts, descriptor.limit_key());
        match &descriptor.field_access {
            Some(access) => {
                match &access.reads {
                    FieldSet::All => self.reads_all += 1,
                    FieldSet::Names(names) => {
                        for field in names {
                            increment(&mut self.field_reads, field);
                        }
                    }
                }
                for field in &access.modifies {
                    increment(&mut self.field_writes, field);
                }
            }
            None => self.undeclared += 1,
        }

        self.entries.insert(request.sequence, request);
    }

    /// Remove a finished request
    pub fn remove(&mut self, sequence: u64) -> Option<RunningRequest> {
        let request = self.entries.remove(&sequence)?;

        let descriptor = &request.descriptor;
        decrement(&mut self.limit_counts, descriptor.limit_key());
        match &descriptor.field_access {
            Some(access) => {
                match &access.reads {
                    FieldSet::All => self.reads_all -= 1,
                    FieldSet::Names(names) => {
                        for field in names {
                            decrement(&mut self.field_reads, field);
                        }
                    }
                }
                for field in &access.modifies {
                    decrement(&mut self.field_writes, field);
                }
            }
            None => self.undeclared -= 1,
        }

        if self.entries.is_empty() {
            debug_assert!(self.limit_counts.is_empty());
            debug_assert!(self.field_reads.is_empty() && self.field_writes.is_empty());
            debug_assert!(self.reads_all == 0 && self.undeclared == 0);
        }
        Some(request)
    }

    /// Whether `candidate` clears every running request
    pub fn admits(&self, candidate: &Invocation<'_>, resolver: &CompatibilityResolver) -> bool {
        if self.entries.is_empty() || self.fields_clear(candidate) {
            return true;
        }
        resolver.admissible(candidate, self.entries.values().map(RunningRequest::invocation))
    }

    /// Field-level check against the aggregates
    ///
    /// True only when the candidate and every running request declare field
    /// access and none of them conflict.
    fn fields_clear(&self, candidate: &Invocation<'_>) -> bool {
        if self.undeclared > 0 {
            return false;
        }
        let Some(access) = &candidate.descriptor.field_access else {
            return false;
        };

        let writes_clear = (access.modifies.is_empty() || self.reads_all == 0)
            && access.modifies.iter().all(|field| {
                !self.field_reads.contains_key(field) && !self.field_writes.contains_key(field)
            });
        let reads_clear = match &access.reads {
            FieldSet::All => self.field_writes.is_empty(),
            FieldSet::Names(names) => names
                .iter()
                .all(|field| !self.field_writes.contains_key(field)),
        };

        writes_clear && reads_clear
    }

    /// Check if a request is running
    pub fn contains(&self, sequence: u64) -> bool {
        self.entries.contains_key(&sequence)
    }

    /// Running requests by sequence number
    pub fn iter(&self) -> impl Iterator<Item = &RunningRequest> {
        self.entries.values()
    }

    /// Number of running requests
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if nothing is running
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Running requests sharing a limit key (group, or method if ungrouped)
    pub fn group_count(&self, key: &str) -> usize {
        self.limit_counts.get(key).copied().unwrap_or(0)
    }
}
