//! Object activation and serving entry points
//!
//! TigerStyle: Explicit lifecycle states, validation before anything runs.
//!
//! `activate` binds an object to its class's compatibility table; one of the
//! `serve*` calls then starts the object's scheduler and returns the handle
//! callers use from then on.
//!
//! Lifecycle:
//! ```text
//!   +--------+   terminate()   +------------+
//!   | Active | --------------> | Terminated |
//!   +--------+                 +------------+
//! ```

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use concerto_core::compat::{CompatibilityResolver, CompatibilityTable};
use concerto_core::config::{LimitMode, ReentrancyMode, ServeConfig};
use concerto_core::error::Result;
use concerto_core::io::{TimeProvider, WallClockTime};
use concerto_core::object::ObjectId;

use crate::handle::ObjectHandle;
use crate::object::ActiveObject;
use crate::policy::{policy_for, FifoPolicy, ServingPolicy};
use crate::scheduler::{self, Scheduler};

/// Object lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectState {
    /// Accepting and serving requests
    #[default]
    Active,
    /// Pending requests withdrawn, new ones rejected
    Terminated,
}

impl ObjectState {
    /// Check if new requests are accepted
    pub fn can_accept(&self) -> bool {
        matches!(self, ObjectState::Active)
    }

    /// Check if the transition is valid
    pub fn can_transition_to(&self, next: ObjectState) -> bool {
        match (self, next) {
            (ObjectState::Active, ObjectState::Terminated) => true,
            _ if *self == next => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for ObjectState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObjectState::Active => write!(f, "active"),
            ObjectState::Terminated => write!(f, "terminated"),
        }
    }
}

/// Bind an object to its class table
pub fn activate<O: ActiveObject>(
    id: ObjectId,
    object: O,
    table: Arc<CompatibilityTable>,
) -> Activation {
    Activation {
        id,
        object: Arc::new(object),
        table,
        time: Arc::new(WallClockTime::new()),
    }
}

/// An activated object that is not serving yet
pub struct Activation {
    id: ObjectId,
    object: Arc<dyn ActiveObject>,
    table: Arc<CompatibilityTable>,
    time: Arc<dyn TimeProvider>,
}

impl Activation {
    /// Use `time` for queue and start timestamps
    pub fn with_time(mut self, time: Arc<dyn TimeProvider>) -> Self {
        self.time = time;
        self
    }

    /// Object ID
    pub fn id(&self) -> &ObjectId {
        &self.id
    }

    /// Compatibility table of the object's class
    pub fn table(&self) -> &Arc<CompatibilityTable> {
        &self.table
    }

    /// Serve with the built-in policy named by `config.policy`
    ///
    /// Must be called from within a tokio runtime.
    pub fn serve(self, config: ServeConfig) -> Result<ObjectHandle> {
        config.validate()?;
        let policy = policy_for(config.policy);
        Ok(self.start(policy, config))
    }

    /// Serve with bounded multi-active scheduling
    pub fn serve_multi_active(
        self,
        degree: usize,
        limit_mode: LimitMode,
        reentrancy: ReentrancyMode,
    ) -> Result<ObjectHandle> {
        self.serve(ServeConfig::multi_active(degree, limit_mode, reentrancy))
    }

    /// Serve with an explicit policy
    ///
    /// `policy` replaces `config.policy`; degree, limit mode and reentrancy
    /// still come from `config`.
    pub fn serve_with_policy(
        self,
        policy: Arc<dyn ServingPolicy>,
        config: ServeConfig,
    ) -> Result<ObjectHandle> {
        config.validate()?;
        Ok(self.start(policy, config))
    }

    /// Serve one request at a time in arrival order
    pub fn serve_fifo(self) -> ObjectHandle {
        self.start(Arc::new(FifoPolicy), ServeConfig::fifo())
    }

    fn start(self, policy: Arc<dyn ServingPolicy>, config: ServeConfig) -> ObjectHandle {
        info!(
            object = %self.id,
            class = self.table.class_name(),
            policy = policy.name(),
            degree = config.degree,
            limit_mode = ?config.limit_mode,
            reentrancy = ?config.reentrancy,
            "serving object"
        );

        let scheduler = Arc::new(Scheduler::new(
            self.id,
            CompatibilityResolver::new(self.table),
            self.object,
            policy,
            &config,
            self.time,
        ));
        tokio::spawn(scheduler::run(Arc::clone(&scheduler)));

        ObjectHandle::new(scheduler)
    }
}
