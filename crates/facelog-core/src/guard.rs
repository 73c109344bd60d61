//! Non-blocking single-flight guard.

use std::sync::atomic::{AtomicBool, Ordering};

/// Admits at most one holder at a time; contenders are turned away, not queued.
#[derive(Debug, Default)]
pub struct SingleFlight {
    busy: AtomicBool,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the guard if it is free. The returned permit releases it on drop,
    /// including during unwinding.
    pub fn try_acquire(&self) -> Option<FlightPermit<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| FlightPermit { busy: &self.busy })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Proof of holding a [`SingleFlight`].
#[must_use = "the guard is released as soon as the permit is dropped"]
#[derive(Debug)]
pub struct FlightPermit<'a> {
    busy: &'a AtomicBool,
}

impl Drop for FlightPermit<'_> {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}
