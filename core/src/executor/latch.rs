use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::util::lock;

/// Opens once `count_down` has been called `count` times.
pub struct CountDownLatch {
    remaining: Mutex<usize>,
    opened: Condvar,
}

impl CountDownLatch {
    pub fn new(count: usize) -> Self {
        Self {
            remaining: Mutex::new(count),
            opened: Condvar::new(),
        }
    }

    pub fn count_down(&self) {
        let mut remaining = lock(&self.remaining);
        if *remaining > 0 {
            *remaining -= 1;
            if *remaining == 0 {
                self.opened.notify_all();
            }
        }
    }

    pub fn count(&self) -> usize {
        *lock(&self.remaining)
    }

    /// Waits up to `timeout` for the latch to open. Returns whether it is open.
    pub fn await_timeout(&self, timeout: Duration) -> bool {
        let remaining = lock(&self.remaining);
        let (remaining, _) = self
            .opened
            .wait_timeout_while(remaining, timeout, |remaining| *remaining > 0)
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *remaining == 0
    }
}
