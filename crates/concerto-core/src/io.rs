//! Time abstraction
//!
//! TigerStyle: Scheduling code never reads the system clock directly.
//!
//! Running requests record their start time through a `TimeProvider`, so
//! tests can substitute a manually advanced clock and observe exact start
//! orders.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

// ============================================================================
// Time Provider
// ============================================================================

/// Time provider abstraction
///
/// # Implementations
///
/// - `WallClockTime`: Production - uses system clock
/// - `ManualClock`: Tests - advanced explicitly
pub trait TimeProvider: Send + Sync + std::fmt::Debug {
    /// Get current time in milliseconds since epoch
    fn now_ms(&self) -> u64;

    /// Get monotonic timestamp (for measuring durations)
    fn monotonic_ms(&self) -> u64 {
        self.now_ms()
    }
}

/// Production time provider using wall clock
#[derive(Debug, Clone, Default)]
pub struct WallClockTime;

impl WallClockTime {
    /// Create a new wall clock time provider
    pub fn new() -> Self {
        Self
    }
}

impl TimeProvider for WallClockTime {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    fn monotonic_ms(&self) -> u64 {
        static ORIGIN: OnceLock<Instant> = OnceLock::new();
        ORIGIN.get_or_init(Instant::now).elapsed().as_millis() as u64
    }
}

/// Manually advanced clock for tests
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicU64,
}

impl ManualClock {
    /// Create a clock starting at `start_ms`
    pub fn new(start_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(start_ms),
        }
    }

    /// Advance the clock by `ms`
    pub fn advance_ms(&self, ms: u64) {
        self.now_ms.fetch_add(ms, Ordering::SeqCst);
    }
}

impl TimeProvider for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}
