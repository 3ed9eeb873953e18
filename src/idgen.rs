//! Monotonic wrapping request-id allocator (§4.1).
//!
//! Ids live in `[1, MAX]` and wrap back to 1. Uniqueness only has to hold
//! among *currently outstanding* ids on one `Engine` — the engine itself
//! rejects duplicate registrations — so a single atomic counter with a
//! skip-if-pending check is sufficient; no randomness is required.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::engine::Engine;

/// Comfortably fits the protocol's signed 32-bit request-id field.
pub const MAX_ID: u32 = 0x7fff_ffff;

pub struct IdGen {
    next: AtomicU32,
}

impl IdGen {
    pub fn new() -> Self {
        IdGen { next: AtomicU32::new(1) }
    }

    fn bump(current: u32) -> u32 {
        if current >= MAX_ID {
            1
        } else {
            current + 1
        }
    }

    /// Allocates the next id. Safe under parallel callers: the counter
    /// advances atomically, and any id still pending on `engine` is skipped
    /// so a slow-moving predecessor never gets a duplicate issued to it.
    pub fn next(&self, engine: &Engine) -> u32 {
        loop {
            let current = self.next.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
                Some(Self::bump(v))
            });
            let candidate = current.unwrap_or(1);
            if !engine.is_pending(candidate) {
                return candidate;
            }
            // candidate still in flight from a previous wrap-around; loop to
            // draw the next one instead of issuing a collision.
        }
    }
}

impl Default for IdGen {
    fn default() -> Self {
        Self::new()
    }
}
