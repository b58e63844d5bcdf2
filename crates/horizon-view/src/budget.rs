//! Per-tick send budgets.

use std::sync::atomic::{AtomicU32, Ordering};

/// Global count of chunks dispatched this tick, capped at a maximum.
#[derive(Debug)]
pub struct TickBudget {
    max: u32,
    used: AtomicU32,
}

impl TickBudget {
    /// Creates a budget allowing `max` sends per tick.
    #[must_use]
    pub const fn new(max: u32) -> Self {
        Self {
            max,
            used: AtomicU32::new(0),
        }
    }

    /// Takes one token; `false` when the tick is exhausted.
    pub fn try_acquire(&self) -> bool {
        self.used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                (used < self.max).then_some(used + 1)
            })
            .is_ok()
    }

    /// Returns a token taken for a send that did not happen.
    pub fn release(&self) {
        let _ = self
            .used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| used.checked_sub(1));
    }

    /// Starts a new tick.
    pub fn reset(&self) {
        self.used.store(0, Ordering::Release);
    }

    /// Tokens taken this tick.
    #[must_use]
    pub fn used(&self) -> u32 {
        self.used.load(Ordering::Acquire)
    }

    /// Tokens left this tick.
    #[must_use]
    pub fn remaining(&self) -> u32 {
        self.max.saturating_sub(self.used())
    }

    /// Whether no tokens are left.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    /// Configured per-tick maximum.
    #[must_use]
    pub const fn max(&self) -> u32 {
        self.max
    }
}

/// Sends a single connection may make this tick.
///
/// Fast movers get half the base (at least one); a connection left waiting
/// by global exhaustion last tick gets double, capped at `boost_cap`.
#[must_use]
pub fn per_connection_budget(base: u32, moving_fast: bool, waiting: bool, boost_cap: u32) -> u32 {
    if moving_fast {
        (base / 2).max(1)
    } else if waiting {
        base.saturating_mul(2).min(boost_cap.max(base))
    } else {
        base
    }
}
