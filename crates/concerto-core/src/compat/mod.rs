//! Compatibility model
//!
//! Groups, rules, peer declarations and field access are registered once per
//! class by [`ClassDescriptorBuilder`], frozen into a [`CompatibilityTable`],
//! and queried pairwise by [`CompatibilityResolver`].

mod builder;
mod descriptor;
mod resolver;

pub use builder::{ClassDescriptorBuilder, ConditionRegistry};
pub use descriptor::{
    CompatibilityRule, CompatibilityTable, Condition, FieldAccess, FieldSet, Group,
    Invocation, InvocationDescriptor, PeerCompatibility,
};
pub use resolver::{AdmitReason, CompatibilityResolver};
