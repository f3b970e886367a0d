//! Configuration for Concerto
//!
//! TigerStyle: Explicit defaults, validation, reasonable limits.
//!
//! Two configuration surfaces live here:
//! - [`ServeConfig`]: how one active object serves its queue (policy,
//!   concurrency degree, limit mode, reentrancy mode).
//! - [`ClassConfig`]: the declarative compatibility description of an active
//!   object class (groups, rules, per-method declarations). It is consumed
//!   once by [`crate::compat::ClassDescriptorBuilder::from_config`].

use crate::constants::*;
use crate::error::{Error, Result};
use serde::de::{self, Deserializer};
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// =============================================================================
// Serving Configuration
// =============================================================================

/// Built-in serving policies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyKind {
    /// One request at a time, strict arrival order
    #[default]
    Fifo,
    /// Bounded concurrency, never overtakes an incompatible earlier request
    MultiActive,
    /// Bounded concurrency, admits any compatible request regardless of position
    Greedy,
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyKind::Fifo => write!(f, "fifo"),
            PolicyKind::MultiActive => write!(f, "multi-active"),
            PolicyKind::Greedy => write!(f, "greedy"),
        }
    }
}

/// How the concurrency degree is counted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LimitMode {
    /// `degree` bounds all running requests of the object
    #[default]
    LimitAllThreads,
    /// `degree` bounds running requests of each group separately
    LimitPerGroup,
}

/// What happens when a running body calls back into its own object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReentrancyMode {
    /// Compatible self-calls run inline on the calling worker
    ReentrantSameThread,
    /// Self-calls are enqueued like any external call
    #[default]
    NonReentrant,
}

/// Serving configuration for one active object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServeConfig {
    /// Dispatch ordering
    #[serde(default)]
    pub policy: PolicyKind,

    /// Maximum concurrently running requests (ignored by FIFO, which is the
    /// default until an object opts into multi-activity)
    #[serde(default = "default_degree")]
    pub degree: usize,

    /// How `degree` is counted
    #[serde(default)]
    pub limit_mode: LimitMode,

    /// Self-call handling
    #[serde(default)]
    pub reentrancy: ReentrancyMode,
}

fn default_degree() -> usize {
    CONCURRENCY_DEGREE_DEFAULT
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            policy: PolicyKind::default(),
            degree: default_degree(),
            limit_mode: LimitMode::default(),
            reentrancy: ReentrancyMode::default(),
        }
    }
}

impl ServeConfig {
    /// Multi-active serving with explicit knobs
    pub fn multi_active(degree: usize, limit_mode: LimitMode, reentrancy: ReentrancyMode) -> Self {
        Self {
            policy: PolicyKind::MultiActive,
            degree,
            limit_mode,
            reentrancy,
        }
    }

    /// Greedy serving bounded by `degree`
    pub fn greedy(degree: usize) -> Self {
        Self {
            policy: PolicyKind::Greedy,
            degree,
            ..Default::default()
        }
    }

    /// Classic one-request-at-a-time serving
    pub fn fifo() -> Self {
        Self {
            policy: PolicyKind::Fifo,
            degree: 1,
            ..Default::default()
        }
    }

    /// Set the reentrancy mode
    pub fn with_reentrancy(mut self, reentrancy: ReentrancyMode) -> Self {
        self.reentrancy = reentrancy;
        self
    }

    /// Set the limit mode
    pub fn with_limit_mode(mut self, limit_mode: LimitMode) -> Self {
        self.limit_mode = limit_mode;
        self
    }

    /// Load from a JSON document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| Error::DeserializationFailed {
                reason: format!("serve config: {}", e),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.degree == 0 {
            return Err(Error::invalid_configuration(
                "serve.degree",
                "must be at least 1",
            ));
        }

        if self.degree > CONCURRENCY_DEGREE_MAX {
            return Err(Error::invalid_configuration(
                "serve.degree",
                format!("{} exceeds limit {}", self.degree, CONCURRENCY_DEGREE_MAX),
            ));
        }

        Ok(())
    }
}

// =============================================================================
// Class Compatibility Configuration
// =============================================================================

/// A list of names or the `"*"` wildcard
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameList {
    /// Every name
    All,
    /// An explicit set of names
    Names(Vec<String>),
}

impl NameList {
    /// Build an explicit list
    pub fn names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        NameList::Names(names.into_iter().map(Into::into).collect())
    }
}

impl Serialize for NameList {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            NameList::All => serializer.serialize_str(WILDCARD),
            NameList::Names(names) => {
                let mut seq = serializer.serialize_seq(Some(names.len()))?;
                for name in names {
                    seq.serialize_element(name)?;
                }
                seq.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for NameList {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            One(String),
            Many(Vec<String>),
        }

        match Raw::deserialize(deserializer)? {
            Raw::One(s) if s == WILDCARD => Ok(NameList::All),
            Raw::One(s) => Err(de::Error::custom(format!(
                "expected \"{}\" or a list of names, found \"{}\"",
                WILDCARD, s
            ))),
            Raw::Many(names) if names.iter().any(|n| n == WILDCARD) => Ok(NameList::All),
            Raw::Many(names) => Ok(NameList::Names(names)),
        }
    }
}

/// Group declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupConfig {
    /// Group name, unique within the class hierarchy
    pub name: String,

    /// Whether members of this group may run alongside each other
    #[serde(default)]
    pub self_compatible: bool,

    /// Named condition restricting same-group pairs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

/// Compatibility rule between groups
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleConfig {
    /// Groups that may run pairwise concurrently
    pub groups: Vec<String>,

    /// Named condition restricting the pairs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

/// Per-method declarations
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodConfig {
    /// Group the method belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member_of: Option<String>,

    /// Methods this one may run alongside (directional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compatible_with: Option<NameList>,

    /// Fields read by the method
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reads: Option<NameList>,

    /// Fields written by the method
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modifies: Option<Vec<String>>,
}

/// Declarative compatibility description of one active object class
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassConfig {
    /// Class name (for error reporting)
    pub class: String,

    /// Declared fields; when non-empty, `reads`/`modifies` must use them
    #[serde(default)]
    pub fields: Vec<String>,

    /// Group declarations
    #[serde(default)]
    pub groups: Vec<GroupConfig>,

    /// Rules between groups
    #[serde(default)]
    pub rules: Vec<RuleConfig>,

    /// Public methods by name
    #[serde(default)]
    pub methods: BTreeMap<String, MethodConfig>,
}

impl ClassConfig {
    /// Load from a JSON document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| Error::DeserializationFailed {
                reason: format!("class config: {}", e),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Structural validation
    ///
    /// Cross references (groups, conditions, peers, fields) are checked by
    /// the descriptor builder, which reports them all at once.
    pub fn validate(&self) -> Result<()> {
        if self.class.is_empty() {
            return Err(Error::invalid_configuration(
                "class.class",
                "class name must not be empty",
            ));
        }

        if self.groups.len() > CLASS_GROUPS_COUNT_MAX {
            return Err(Error::invalid_configuration(
                "class.groups",
                format!(
                    "{} exceeds limit {}",
                    self.groups.len(),
                    CLASS_GROUPS_COUNT_MAX
                ),
            ));
        }

        if self.methods.len() > CLASS_METHODS_COUNT_MAX {
            return Err(Error::invalid_configuration(
                "class.methods",
                format!(
                    "{} exceeds limit {}",
                    self.methods.len(),
                    CLASS_METHODS_COUNT_MAX
                ),
            ));
        }

        Ok(())
    }
}
