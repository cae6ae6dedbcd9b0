//! Cooperative shutdown signal shared by the long-lived task loops.
//!
//! All waits in the agent go through [`ShutdownSignal::wait_for`] so
//! that process termination interrupts an in-progress sleep instead
//! of merely preventing the next one. This matters most for the
//! rotation scheduler, whose wait spans days.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

pub struct ShutdownSignal {
    stopped: Mutex<bool>,
    condvar: Condvar,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self {
            stopped: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    /// Flip the flag and wake every in-progress wait.
    pub fn trigger(&self) {
        *self.stopped.lock() = true;
        self.condvar.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        *self.stopped.lock()
    }

    /// Wait up to `duration`. Returns true when shutdown was
    /// triggered, including mid-wait; false when the full duration
    /// elapsed.
    pub fn wait_for(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut stopped = self.stopped.lock();
        while !*stopped {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            if self
                .condvar
                .wait_for(&mut stopped, deadline - now)
                .timed_out()
            {
                return *stopped;
            }
        }
        true
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
