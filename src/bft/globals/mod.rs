//! Small process-wide global helpers.

use std::sync::atomic::{AtomicBool, Ordering};

/// A simple atomic boolean flag, used to guard one-time global
/// initialization (see `crate::bft::init`).
pub struct Flag(AtomicBool);

impl Flag {
    /// Creates a new, unset `Flag`.
    pub const fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    /// Checks whether the flag is set.
    pub fn test(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Sets the flag.
    pub fn set(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Unsets the flag.
    pub fn unset(&self) {
        self.0.store(false, Ordering::Release);
    }
}
