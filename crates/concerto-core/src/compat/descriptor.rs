//! Compatibility descriptors
//!
//! The resolved, read-only form of a class's compatibility declarations.
//! A [`CompatibilityTable`] is built once per class and shared by every
//! activation of that class; nothing in it changes after activation.

use bytes::Bytes;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

// =============================================================================
// Invocation view
// =============================================================================

/// A resolved invocation as seen by conditions and the resolver
#[derive(Debug, Clone, Copy)]
pub struct Invocation<'a> {
    /// Descriptor of the invoked method
    pub descriptor: &'a InvocationDescriptor,
    /// Serialized arguments
    pub args: &'a Bytes,
}

impl<'a> Invocation<'a> {
    /// Create a new invocation view
    pub fn new(descriptor: &'a InvocationDescriptor, args: &'a Bytes) -> Self {
        Self { descriptor, args }
    }

    /// Name of the invoked method
    pub fn method(&self) -> &'a str {
        &self.descriptor.method
    }
}

// =============================================================================
// Conditions
// =============================================================================

type Predicate = dyn Fn(&Invocation<'_>, &Invocation<'_>) -> bool + Send + Sync;

/// Typed predicate attached to a group or rule
///
/// Evaluated as `condition(candidate, running)` for a specific pair of
/// invocations. The name only serves diagnostics.
#[derive(Clone)]
pub struct Condition {
    name: Arc<str>,
    predicate: Arc<Predicate>,
}

impl Condition {
    /// Wrap a closure
    pub fn new<F>(name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&Invocation<'_>, &Invocation<'_>) -> bool + Send + Sync + 'static,
    {
        let name: String = name.into();
        debug_assert!(!name.is_empty(), "condition name must not be empty");
        Self {
            name: Arc::from(name),
            predicate: Arc::new(predicate),
        }
    }

    /// Pairs whose arguments are byte-identical
    pub fn args_equal() -> Self {
        Self::new("args_equal", |a, b| a.args == b.args)
    }

    /// Pairs whose arguments differ
    pub fn args_differ() -> Self {
        Self::new("args_differ", |a, b| a.args != b.args)
    }

    /// Condition name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Evaluate for a (candidate, running) pair
    pub fn evaluate(&self, candidate: &Invocation<'_>, running: &Invocation<'_>) -> bool {
        (self.predicate)(candidate, running)
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Condition").field(&self.name).finish()
    }
}

// =============================================================================
// Groups and rules
// =============================================================================

/// A named bucket of methods sharing a concurrency classification
#[derive(Debug, Clone)]
pub struct Group {
    /// Group name
    pub name: String,
    /// Whether members may run alongside each other
    pub self_compatible: bool,
    /// Restricts same-group pairs when present
    pub condition: Option<Condition>,
}

impl Group {
    /// Whether two invocations of this group may overlap
    pub fn admits_pair(&self, candidate: &Invocation<'_>, running: &Invocation<'_>) -> bool {
        if !self.self_compatible {
            return false;
        }
        self.condition
            .as_ref()
            .map_or(true, |c| c.evaluate(candidate, running))
    }
}

/// Any two distinct groups drawn from `groups` may run concurrently
#[derive(Debug, Clone)]
pub struct CompatibilityRule {
    /// Connected groups (at least two)
    pub groups: BTreeSet<String>,
    /// Restricts the pairs when present
    pub condition: Option<Condition>,
}

impl CompatibilityRule {
    /// Whether this rule names both groups
    pub fn connects(&self, a: &str, b: &str) -> bool {
        a != b && self.groups.contains(a) && self.groups.contains(b)
    }

    /// Whether the rule admits this pair
    pub fn admits_pair(&self, candidate: &Invocation<'_>, running: &Invocation<'_>) -> bool {
        self.condition
            .as_ref()
            .map_or(true, |c| c.evaluate(candidate, running))
    }
}

// =============================================================================
// Method-level declarations
// =============================================================================

/// Methods a method declares itself compatible with
///
/// Directional: only the declaring side's list is consulted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PeerCompatibility {
    /// No declaration
    #[default]
    None,
    /// Compatible with every method
    All,
    /// Compatible with the named methods
    Methods(BTreeSet<String>),
}

impl PeerCompatibility {
    /// Whether `method` is covered
    pub fn allows(&self, method: &str) -> bool {
        match self {
            PeerCompatibility::None => false,
            PeerCompatibility::All => true,
            PeerCompatibility::Methods(methods) => methods.contains(method),
        }
    }
}

/// Read set of a method
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldSet {
    /// Reads every field
    All,
    /// Reads the named fields
    Names(BTreeSet<String>),
}

impl Default for FieldSet {
    fn default() -> Self {
        FieldSet::Names(BTreeSet::new())
    }
}

impl FieldSet {
    /// Whether the set shares a field with `fields`
    pub fn intersects(&self, fields: &BTreeSet<String>) -> bool {
        match self {
            FieldSet::All => !fields.is_empty(),
            FieldSet::Names(names) => !names.is_disjoint(fields),
        }
    }

    /// Whether this is the wildcard
    pub fn is_all(&self) -> bool {
        matches!(self, FieldSet::All)
    }
}

/// Field-level reads and writes of a method
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldAccess {
    /// Fields read
    pub reads: FieldSet,
    /// Fields written
    pub modifies: BTreeSet<String>,
}

impl FieldAccess {
    /// Reader/writer exclusion
    ///
    /// `self` conflicts with `other` if it writes anything `other` reads or
    /// writes, or reads anything `other` writes. Read/read never conflicts.
    pub fn conflicts_with(&self, other: &FieldAccess) -> bool {
        other.reads.intersects(&self.modifies)
            || !self.modifies.is_disjoint(&other.modifies)
            || self.reads.intersects(&other.modifies)
    }

    /// Whether the method writes nothing
    pub fn is_read_only(&self) -> bool {
        self.modifies.is_empty()
    }
}

// =============================================================================
// InvocationDescriptor
// =============================================================================

/// Resolved compatibility metadata of one method
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationDescriptor {
    /// Method name
    pub method: String,
    /// Group membership
    pub group: Option<String>,
    /// Field-level access; `None` when the method declares no fields
    pub field_access: Option<FieldAccess>,
    /// Declared peer methods
    pub peers: PeerCompatibility,
}

impl InvocationDescriptor {
    /// Key used to count running requests under per-group limits
    ///
    /// Ungrouped methods form a slot of their own.
    pub fn limit_key(&self) -> &str {
        self.group.as_deref().unwrap_or(&self.method)
    }
}

// =============================================================================
// CompatibilityTable
// =============================================================================

/// Read-only compatibility description of one class
///
/// Lookups by method name are O(1) and return the same cached
/// `Arc<InvocationDescriptor>` every time.
#[derive(Debug)]
pub struct CompatibilityTable {
    pub(crate) class: String,
    pub(crate) groups: HashMap<String, Group>,
    pub(crate) rules: Vec<CompatibilityRule>,
    /// group -> group -> indices into `rules`, both orders present
    pub(crate) rule_index: HashMap<String, HashMap<String, Vec<usize>>>,
    pub(crate) methods: HashMap<String, Arc<InvocationDescriptor>>,
}

impl CompatibilityTable {
    /// Class name
    pub fn class_name(&self) -> &str {
        &self.class
    }

    /// Descriptor of a method
    pub fn descriptor(&self, method: &str) -> Option<Arc<InvocationDescriptor>> {
        self.methods.get(method).cloned()
    }

    /// Group by name
    pub fn group(&self, name: &str) -> Option<&Group> {
        self.groups.get(name)
    }

    /// Rules naming both groups
    pub fn rules_between<'a>(
        &'a self,
        a: &str,
        b: &str,
    ) -> impl Iterator<Item = &'a CompatibilityRule> + 'a {
        self.rule_index
            .get(a)
            .and_then(|peers| peers.get(b))
            .into_iter()
            .flatten()
            .map(move |&i| &self.rules[i])
    }

    /// All rules
    pub fn rules(&self) -> &[CompatibilityRule] {
        &self.rules
    }

    /// Declared method names
    pub fn methods(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }

    /// Number of declared methods
    pub fn method_count(&self) -> usize {
        self.methods.len()
    }
}
