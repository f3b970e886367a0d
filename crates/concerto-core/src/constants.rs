//! TigerStyle constants for Concerto
//!
//! All limits are explicit, use big-endian naming (most significant first),
//! and include units in the name.

// =============================================================================
// Object Identity Limits
// =============================================================================

/// Maximum length of an object ID in bytes
pub const OBJECT_ID_LENGTH_BYTES_MAX: usize = 256;

/// Maximum length of an object namespace in bytes
pub const OBJECT_NAMESPACE_LENGTH_BYTES_MAX: usize = 128;

// =============================================================================
// Compatibility Descriptor Limits
// =============================================================================

/// Maximum length of a group name in bytes
pub const GROUP_NAME_LENGTH_BYTES_MAX: usize = 128;

/// Maximum length of a method name in bytes
pub const METHOD_NAME_LENGTH_BYTES_MAX: usize = 256;

/// Maximum length of a field name in bytes
pub const FIELD_NAME_LENGTH_BYTES_MAX: usize = 128;

/// Maximum number of groups declared by one class (ancestors included)
pub const CLASS_GROUPS_COUNT_MAX: usize = 256;

/// Maximum number of methods declared by one class (ancestors included)
pub const CLASS_METHODS_COUNT_MAX: usize = 4096;

/// Minimum number of distinct groups a compatibility rule must name
pub const RULE_GROUPS_COUNT_MIN: usize = 2;

/// Wildcard accepted by `compatible_with` and `reads` declarations
pub const WILDCARD: &str = "*";

// =============================================================================
// Scheduling Limits
// =============================================================================

/// Maximum concurrency degree of a single active object
pub const CONCURRENCY_DEGREE_MAX: usize = 4096;

/// Default concurrency degree for multi-active serving
pub const CONCURRENCY_DEGREE_DEFAULT: usize = 64;

/// Maximum nesting of inline reentrant calls on one worker
///
/// TigerStyle: no unbounded recursion, a self-call chain deeper than this
/// fails instead of growing the stack.
pub const REENTRANT_DEPTH_MAX: usize = 64;

// =============================================================================
// Metric Names
// =============================================================================

/// Counter: requests accepted into a pending queue
pub const METRIC_NAME_REQUESTS_ENQUEUED_TOTAL: &str = "concerto_requests_enqueued_total";

/// Counter: requests moved from pending to running
pub const METRIC_NAME_REQUESTS_DISPATCHED_TOTAL: &str = "concerto_requests_dispatched_total";

/// Counter: requests finished (label: status)
pub const METRIC_NAME_REQUESTS_COMPLETED_TOTAL: &str = "concerto_requests_completed_total";

/// Counter: pending requests withdrawn at termination
pub const METRIC_NAME_REQUESTS_WITHDRAWN_TOTAL: &str = "concerto_requests_withdrawn_total";

/// Counter: reentrant calls served inline on the calling worker
pub const METRIC_NAME_REENTRANT_INLINE_TOTAL: &str = "concerto_reentrant_inline_total";

/// Histogram: request body duration in seconds
pub const METRIC_NAME_REQUEST_DURATION_SECONDS: &str = "concerto_request_duration_seconds";
