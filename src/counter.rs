//! "Every Nth call" trigger counter.

use parking_lot::Mutex;

/// Count at which the counter wraps back to 1.
pub const COUNTER_CEILING: u32 = 1000;

/// Thread-safe call counter that fires on every Nth call.
///
/// The usual cycle is `increment`, then `should_trigger`, then `reset` when
/// the trigger fired. The three steps are individually locked but not as a
/// whole, so concurrent callers may both observe the same trigger.
#[derive(Debug)]
pub struct TriggerCounter {
    count: Mutex<u32>,
    trigger_on: u32,
    active: bool,
}

impl TriggerCounter {
    /// Create a counter firing on every `trigger_on`-th call.
    pub fn new(trigger_on: u32, active: bool) -> Self {
        Self {
            count: Mutex::new(0),
            trigger_on,
            active,
        }
    }

    /// Counter that is active exactly when `trigger_on > 0`.
    pub fn every(trigger_on: u32) -> Self {
        Self::new(trigger_on, trigger_on > 0)
    }

    /// Add one call, wrapping to 1 at the ceiling.
    pub fn increment(&self) {
        let mut count = self.count.lock();
        *count += 1;
        if *count >= COUNTER_CEILING {
            *count = 1;
        }
    }

    /// Whether the current call is the Nth one (1-indexed, counted since the
    /// last reset).
    pub fn should_trigger(&self) -> bool {
        let count = self.count.lock();
        self.active && *count >= self.trigger_on
    }

    /// Start a new cycle.
    pub fn reset(&self) {
        *self.count.lock() = 0;
    }

    /// Current count.
    pub fn count(&self) -> u32 {
        *self.count.lock()
    }

    pub fn trigger_on(&self) -> u32 {
        self.trigger_on
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}
