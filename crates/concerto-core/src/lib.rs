//! Concerto Core
//!
//! Core types, errors, constants and the compatibility model for Concerto,
//! a multi-active object scheduler.
//!
//! # Overview
//!
//! An active object normally serves one request at a time. Concerto lets a
//! class declare which of its methods may run side by side (groups, rules
//! between groups, peer methods, field reads and writes); this crate turns
//! those declarations into a read-only [`CompatibilityTable`] and answers
//! pairwise admissibility questions through [`CompatibilityResolver`]. The
//! per-object scheduler lives in `concerto-runtime`.
//!
//! # TigerStyle
//!
//! This crate follows [TigerStyle](https://github.com/tigerbeetle/tigerbeetle/blob/main/docs/TIGER_STYLE.md)
//! engineering principles:
//! - Safety > Performance > Developer Experience
//! - Explicit limits with big-endian naming (e.g., `CONCURRENCY_DEGREE_MAX`)
//! - Configuration errors surface at activation, never mid-service
//! - No recursion (bounded iteration only)

pub mod compat;
pub mod config;
pub mod constants;
pub mod error;
pub mod io;
pub mod metrics;
pub mod object;
pub mod telemetry;

pub use compat::{
    AdmitReason, ClassDescriptorBuilder, CompatibilityResolver, CompatibilityRule,
    CompatibilityTable, Condition, ConditionRegistry, FieldAccess, FieldSet, Group, Invocation,
    InvocationDescriptor, PeerCompatibility,
};
pub use config::{
    ClassConfig, GroupConfig, LimitMode, MethodConfig, NameList, PolicyKind, ReentrancyMode,
    RuleConfig, ServeConfig,
};
pub use constants::*;
pub use error::{ConfigError, Error, Result};
pub use io::{ManualClock, TimeProvider, WallClockTime};
pub use object::ObjectId;
pub use telemetry::{init_telemetry, TelemetryConfig, TelemetryGuard};
