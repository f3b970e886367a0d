//! Compatibility matrix resolver
//!
//! TigerStyle: Pure, deterministic pairwise decisions.
//!
//! A candidate may start alongside a running invocation when at least one of
//! the following holds, checked in order:
//!
//! 1. Both belong to the same self-compatible group (and the group's
//!    condition, if any, accepts the pair).
//! 2. A rule connects their two distinct groups (and its condition, if any,
//!    accepts the pair).
//! 3. The candidate lists the running method as a peer.
//! 4. Both declare field access and the accesses do not conflict.
//!
//! Admission against a set is conjunctive: every running invocation must be
//! cleared by one of the above.

use super::descriptor::{CompatibilityTable, Invocation};
use std::fmt;
use std::sync::Arc;

/// Which check cleared a pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmitReason {
    /// Same self-compatible group
    SameGroup,
    /// A rule connects the two groups
    Rule,
    /// The candidate declares the running method as a peer
    Peer,
    /// Field accesses do not conflict
    DisjointFields,
}

impl fmt::Display for AdmitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdmitReason::SameGroup => write!(f, "same-group"),
            AdmitReason::Rule => write!(f, "rule"),
            AdmitReason::Peer => write!(f, "peer"),
            AdmitReason::DisjointFields => write!(f, "disjoint-fields"),
        }
    }
}

/// Pairwise admissibility over one class's compatibility table
#[derive(Debug, Clone)]
pub struct CompatibilityResolver {
    table: Arc<CompatibilityTable>,
}

impl CompatibilityResolver {
    /// Create a resolver over `table`
    pub fn new(table: Arc<CompatibilityTable>) -> Self {
        Self { table }
    }

    /// The underlying table
    pub fn table(&self) -> &Arc<CompatibilityTable> {
        &self.table
    }

    /// Why `candidate` may run alongside `running`, or `None` if it may not
    pub fn admit_reason(
        &self,
        candidate: &Invocation<'_>,
        running: &Invocation<'_>,
    ) -> Option<AdmitReason> {
        let c = candidate.descriptor;
        let r = running.descriptor;

        if let (Some(cg), Some(rg)) = (c.group.as_deref(), r.group.as_deref()) {
            if cg == rg {
                if self
                    .table
                    .group(cg)
                    .is_some_and(|g| g.admits_pair(candidate, running))
                {
                    return Some(AdmitReason::SameGroup);
                }
            } else if self
                .table
                .rules_between(cg, rg)
                .any(|rule| rule.admits_pair(candidate, running))
            {
                return Some(AdmitReason::Rule);
            }
        }

        if c.peers.allows(&r.method) {
            return Some(AdmitReason::Peer);
        }

        match (&c.field_access, &r.field_access) {
            (Some(cf), Some(rf)) if !cf.conflicts_with(rf) => Some(AdmitReason::DisjointFields),
            _ => None,
        }
    }

    /// Whether `candidate` may run alongside `running`
    pub fn compatible(&self, candidate: &Invocation<'_>, running: &Invocation<'_>) -> bool {
        self.admit_reason(candidate, running).is_some()
    }

    /// Whether each of the two may run alongside the other
    pub fn mutually_compatible(&self, a: &Invocation<'_>, b: &Invocation<'_>) -> bool {
        self.compatible(a, b) && self.compatible(b, a)
    }

    /// Whether `candidate` clears every invocation in `running`
    pub fn admissible<'a, I>(&self, candidate: &Invocation<'_>, running: I) -> bool
    where
        I: IntoIterator<Item = Invocation<'a>>,
    {
        running
            .into_iter()
            .all(|r| self.compatible(candidate, &r))
    }
}
