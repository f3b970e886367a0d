//! Concerto Runtime
//!
//! Per-object scheduling for multi-active objects.
//!
//! # Overview
//!
//! The runtime provides:
//! - An arrival-ordered pending queue per object
//! - A running set checked against the class's compatibility table
//! - Pluggable serving policies (FIFO, MultiActive, Greedy, custom)
//! - A dispatch loop running compatible requests on concurrent tasks
//! - Inline execution of compatible self-calls
//!
//! # TigerStyle
//! - Two incompatible requests never run at the same time
//! - Bounded concurrency (explicit degree per object)
//! - Every result slot is resolved exactly once

pub mod activation;
pub mod handle;
pub mod object;
pub mod pending;
pub mod policy;
pub mod reentrancy;
pub mod running;
pub mod scheduler;

pub use activation::{activate, Activation, ObjectState};
pub use handle::{ObjectHandle, PendingReply};
pub use object::{ActiveObject, ObjectContext};
pub use pending::{PendingQueue, PendingRequest, ReplySender, Scan};
pub use policy::{
    policy_for, DegreeBudget, FifoPolicy, GreedyPolicy, MultiActivePolicy, SchedulingView,
    ServingPolicy,
};
pub use reentrancy::{current_frame, ServingFrame};
pub use running::{RunningRequest, RunningSet};
pub use scheduler::{PendingSummary, RunningSummary, SchedulerSnapshot, SchedulerStats};
