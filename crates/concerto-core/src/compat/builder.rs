//! Compatibility descriptor builder
//!
//! TigerStyle: Fail fast at class activation, report every problem at once.
//!
//! A class registers its groups, rules and per-method declarations once,
//! either through the typed API or from a [`ClassConfig`]. `build()` checks
//! every cross reference and produces the read-only [`CompatibilityTable`].
//! Nothing is resolved at request time.

use super::descriptor::{
    CompatibilityRule, CompatibilityTable, Condition, FieldAccess, FieldSet, Group,
    InvocationDescriptor, Invocation, PeerCompatibility,
};
use crate::config::{ClassConfig, MethodConfig, NameList};
use crate::constants::*;
use crate::error::{ConfigError, Error, Result};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, error};

// =============================================================================
// Condition registry
// =============================================================================

/// Name -> typed condition, consulted only while building
#[derive(Debug, Clone, Default)]
pub struct ConditionRegistry {
    conditions: HashMap<String, Condition>,
}

impl ConditionRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with `args_equal` and `args_differ`
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.insert(Condition::args_equal());
        registry.insert(Condition::args_differ());
        registry
    }

    /// Register a closure under `name`
    pub fn register<F>(mut self, name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&Invocation<'_>, &Invocation<'_>) -> bool + Send + Sync + 'static,
    {
        self.insert(Condition::new(name, predicate));
        self
    }

    /// Register an existing condition under its own name
    pub fn insert(&mut self, condition: Condition) {
        self.conditions
            .insert(condition.name().to_string(), condition);
    }

    /// Look up a condition
    pub fn get(&self, name: &str) -> Option<&Condition> {
        self.conditions.get(name)
    }
}

// =============================================================================
// MethodConfig helpers for the typed API
// =============================================================================

impl MethodConfig {
    /// Declare group membership
    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.member_of = Some(group.into());
        self
    }

    /// Declare compatible peer methods
    pub fn compatible_with<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.compatible_with = Some(NameList::names(methods));
        self
    }

    /// Declare compatibility with every method
    pub fn compatible_with_all(mut self) -> Self {
        self.compatible_with = Some(NameList::All);
        self
    }

    /// Declare the fields read
    pub fn reading<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reads = Some(NameList::names(fields));
        self
    }

    /// Declare that every field is read
    pub fn reading_all(mut self) -> Self {
        self.reads = Some(NameList::All);
        self
    }

    /// Declare the fields written
    pub fn modifying<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.modifies = Some(fields.into_iter().map(Into::into).collect());
        self
    }
}

// =============================================================================
// Builder
// =============================================================================

#[derive(Debug, Clone)]
struct GroupDecl {
    name: String,
    self_compatible: bool,
    condition: Option<Condition>,
}

#[derive(Debug, Clone)]
struct RuleDecl {
    groups: Vec<String>,
    condition: Option<Condition>,
}

/// Registration API for one active object class
#[derive(Debug, Clone, Default)]
pub struct ClassDescriptorBuilder {
    class: String,
    parent: Option<Box<ClassDescriptorBuilder>>,
    fields: Vec<String>,
    groups: Vec<GroupDecl>,
    rules: Vec<RuleDecl>,
    methods: BTreeMap<String, MethodConfig>,
    /// Problems found before `build()` (unresolved condition names)
    deferred: Vec<ConfigError>,
}

impl ClassDescriptorBuilder {
    /// Start describing `class`
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            ..Default::default()
        }
    }

    /// Build from a declarative configuration, resolving condition names
    /// against `registry`
    pub fn from_config(config: &ClassConfig, registry: &ConditionRegistry) -> Self {
        let mut builder = Self::new(config.class.clone()).fields(config.fields.iter().cloned());

        for group in &config.groups {
            let condition = builder.resolve_condition(
                registry,
                group.condition.as_deref(),
                || format!("group '{}'", group.name),
            );
            builder.groups.push(GroupDecl {
                name: group.name.clone(),
                self_compatible: group.self_compatible,
                condition,
            });
        }

        for rule in &config.rules {
            let condition = builder.resolve_condition(
                registry,
                rule.condition.as_deref(),
                || format!("rule {:?}", rule.groups),
            );
            builder.rules.push(RuleDecl {
                groups: rule.groups.clone(),
                condition,
            });
        }

        for (name, method) in &config.methods {
            builder.methods.insert(name.clone(), method.clone());
        }

        builder
    }

    fn resolve_condition(
        &mut self,
        registry: &ConditionRegistry,
        name: Option<&str>,
        location: impl FnOnce() -> String,
    ) -> Option<Condition> {
        let name = name?;
        match registry.get(name) {
            Some(condition) => Some(condition.clone()),
            None => {
                self.deferred.push(ConfigError::UnresolvedCondition {
                    location: location(),
                    condition: name.to_string(),
                });
                None
            }
        }
    }

    /// Inherit groups, rules and methods of `parent`
    ///
    /// Ancestors are processed first; redeclaring an inherited group is an
    /// error, redeclaring an inherited method overrides it.
    pub fn extends(mut self, parent: &ClassDescriptorBuilder) -> Self {
        self.parent = Some(Box::new(parent.clone()));
        self
    }

    /// Declare the fields methods may reference
    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Declare a group
    pub fn group(mut self, name: impl Into<String>, self_compatible: bool) -> Self {
        self.groups.push(GroupDecl {
            name: name.into(),
            self_compatible,
            condition: None,
        });
        self
    }

    /// Declare a self-compatible group whose same-group pairs must satisfy
    /// `condition`
    pub fn group_when(mut self, name: impl Into<String>, condition: Condition) -> Self {
        self.groups.push(GroupDecl {
            name: name.into(),
            self_compatible: true,
            condition: Some(condition),
        });
        self
    }

    /// Declare an unconditional rule
    pub fn rule<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rules.push(RuleDecl {
            groups: groups.into_iter().map(Into::into).collect(),
            condition: None,
        });
        self
    }

    /// Declare a conditional rule
    pub fn rule_when<I, S>(mut self, groups: I, condition: Condition) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rules.push(RuleDecl {
            groups: groups.into_iter().map(Into::into).collect(),
            condition: Some(condition),
        });
        self
    }

    /// Declare a public method
    pub fn method(mut self, name: impl Into<String>, config: MethodConfig) -> Self {
        self.methods.insert(name.into(), config);
        self
    }

    /// Validate everything and produce the shared table
    pub fn build(&self) -> Result<Arc<CompatibilityTable>> {
        let mut errors = Vec::new();

        // Oldest ancestor first
        let mut lineage: Vec<&ClassDescriptorBuilder> = Vec::new();
        let mut cursor = Some(self);
        while let Some(builder) = cursor {
            lineage.push(builder);
            cursor = builder.parent.as_deref();
        }
        lineage.reverse();

        let mut fields: BTreeSet<String> = BTreeSet::new();
        let mut groups: HashMap<String, Group> = HashMap::new();
        let mut rule_decls: Vec<&RuleDecl> = Vec::new();
        let mut method_decls: BTreeMap<&str, &MethodConfig> = BTreeMap::new();

        if self.class.is_empty() {
            errors.push(ConfigError::InvalidName {
                name: String::new(),
                reason: "class name must not be empty".into(),
            });
        }

        for builder in &lineage {
            errors.extend(builder.deferred.iter().cloned());
            for field in &builder.fields {
                match check_name(field, FIELD_NAME_LENGTH_BYTES_MAX) {
                    Some(problem) => errors.push(problem),
                    None => {
                        fields.insert(field.clone());
                    }
                }
            }

            for decl in &builder.groups {
                if let Some(problem) = check_name(&decl.name, GROUP_NAME_LENGTH_BYTES_MAX) {
                    errors.push(problem);
                    continue;
                }
                if groups.contains_key(&decl.name) {
                    errors.push(ConfigError::DuplicateGroup {
                        group: decl.name.clone(),
                    });
                    continue;
                }
                groups.insert(
                    decl.name.clone(),
                    Group {
                        name: decl.name.clone(),
                        self_compatible: decl.self_compatible,
                        condition: decl.condition.clone(),
                    },
                );
            }

            rule_decls.extend(builder.rules.iter());

            for (name, config) in &builder.methods {
                method_decls.insert(name.as_str(), config);
            }
        }

        if groups.len() > CLASS_GROUPS_COUNT_MAX {
            errors.push(ConfigError::TooMany {
                what: "groups",
                count: groups.len(),
                limit: CLASS_GROUPS_COUNT_MAX,
            });
        }
        if method_decls.len() > CLASS_METHODS_COUNT_MAX {
            errors.push(ConfigError::TooMany {
                what: "methods",
                count: method_decls.len(),
                limit: CLASS_METHODS_COUNT_MAX,
            });
        }

        let rules = build_rules(&rule_decls, &groups, &mut errors);

        let mut methods = HashMap::with_capacity(method_decls.len());
        for (&name, config) in &method_decls {
            if let Some(problem) = check_name(name, METHOD_NAME_LENGTH_BYTES_MAX) {
                errors.push(problem);
                continue;
            }
            let descriptor =
                build_descriptor(name, config, &groups, &method_decls, &fields, &mut errors);
            methods.insert(name.to_string(), Arc::new(descriptor));
        }

        if !errors.is_empty() {
            for problem in &errors {
                error!(class = %self.class, %problem, "compatibility definition error");
            }
            return Err(Error::ClassDefinition {
                class: self.class.clone(),
                errors,
            });
        }

        let mut rule_index: HashMap<String, HashMap<String, Vec<usize>>> = HashMap::new();
        for (i, rule) in rules.iter().enumerate() {
            for a in &rule.groups {
                for b in &rule.groups {
                    if a != b {
                        rule_index
                            .entry(a.clone())
                            .or_default()
                            .entry(b.clone())
                            .or_default()
                            .push(i);
                    }
                }
            }
        }

        debug!(
            class = %self.class,
            groups = groups.len(),
            rules = rules.len(),
            methods = methods.len(),
            "compatibility table built"
        );

        Ok(Arc::new(CompatibilityTable {
            class: self.class.clone(),
            groups,
            rules,
            rule_index,
            methods,
        }))
    }
}

fn check_name(name: &str, limit: usize) -> Option<ConfigError> {
    if name.is_empty() {
        return Some(ConfigError::InvalidName {
            name: name.to_string(),
            reason: "must not be empty".into(),
        });
    }
    if name.len() > limit {
        return Some(ConfigError::InvalidName {
            name: name.to_string(),
            reason: format!("length {} exceeds limit {}", name.len(), limit),
        });
    }
    if name == WILDCARD {
        return Some(ConfigError::InvalidName {
            name: name.to_string(),
            reason: "reserved wildcard".into(),
        });
    }
    None
}

fn build_rules(
    decls: &[&RuleDecl],
    groups: &HashMap<String, Group>,
    errors: &mut Vec<ConfigError>,
) -> Vec<CompatibilityRule> {
    let mut rules = Vec::with_capacity(decls.len());

    for decl in decls {
        let distinct: BTreeSet<String> = decl.groups.iter().cloned().collect();
        if distinct.len() < RULE_GROUPS_COUNT_MIN {
            errors.push(ConfigError::MalformedRule {
                groups: decl.groups.clone(),
                reason: format!("must name at least {} distinct groups", RULE_GROUPS_COUNT_MIN),
            });
            continue;
        }

        let undefined: Vec<&String> = distinct.iter().filter(|g| !groups.contains_key(*g)).collect();
        if !undefined.is_empty() {
            for group in undefined {
                errors.push(ConfigError::UndefinedGroup {
                    location: format!("rule {:?}", decl.groups),
                    group: group.clone(),
                });
            }
            continue;
        }

        rules.push(CompatibilityRule {
            groups: distinct,
            condition: decl.condition.clone(),
        });
    }

    rules
}

fn build_descriptor(
    name: &str,
    config: &MethodConfig,
    groups: &HashMap<String, Group>,
    methods: &BTreeMap<&str, &MethodConfig>,
    fields: &BTreeSet<String>,
    errors: &mut Vec<ConfigError>,
) -> InvocationDescriptor {
    if let Some(group) = &config.member_of {
        if !groups.contains_key(group) {
            errors.push(ConfigError::UndefinedGroup {
                location: format!("method '{}'", name),
                group: group.clone(),
            });
        }
    }

    let peers = match &config.compatible_with {
        None => PeerCompatibility::None,
        Some(NameList::All) => PeerCompatibility::All,
        Some(NameList::Names(peers)) => {
            for peer in peers {
                if !methods.contains_key(peer.as_str()) {
                    errors.push(ConfigError::UndefinedMethod {
                        method: name.to_string(),
                        peer: peer.clone(),
                    });
                }
            }
            PeerCompatibility::Methods(peers.iter().cloned().collect())
        }
    };

    let mut check_field = |field: &String| {
        if !fields.is_empty() && !fields.contains(field) {
            errors.push(ConfigError::UndefinedField {
                method: name.to_string(),
                field: field.clone(),
            });
        }
    };

    let field_access = if config.reads.is_none() && config.modifies.is_none() {
        None
    } else {
        let reads = match &config.reads {
            Some(NameList::All) => FieldSet::All,
            Some(NameList::Names(names)) => {
                names.iter().for_each(&mut check_field);
                FieldSet::Names(names.iter().cloned().collect())
            }
            None => FieldSet::default(),
        };
        let modifies: BTreeSet<String> = config.modifies.iter().flatten().cloned().collect();
        modifies.iter().for_each(&mut check_field);
        Some(FieldAccess { reads, modifies })
    };

    InvocationDescriptor {
        method: name.to_string(),
        group: config.member_of.clone(),
        field_access,
        peers,
    }
}
