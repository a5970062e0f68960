//! Blocking counting semaphore

use parking_lot::{Condvar, Mutex};

/// Counting semaphore for OS threads
#[derive(Debug, Default)]
pub struct Semaphore {
    permits: Mutex<usize>,
    available: Condvar,
}

impl Semaphore {
    pub fn new(permits: usize) -> Self {
        Self {
            permits: Mutex::new(permits),
            available: Condvar::new(),
        }
    }

    /// Add `count` permits, waking waiters
    pub fn release(&self, count: usize) {
        if count == 0 {
            return;
        }
        let mut permits = self.permits.lock();
        *permits += count;
        if count == 1 {
            self.available.notify_one();
        } else {
            self.available.notify_all();
        }
    }

    /// Block until a permit is available and take it
    pub fn acquire(&self) {
        let mut permits = self.permits.lock();
        while *permits == 0 {
            self.available.wait(&mut permits);
        }
        *permits -= 1;
    }

    /// Take `count` permits, one at a time as they become available
    pub fn acquire_many(&self, count: usize) {
        for _ in 0..count {
            self.acquire();
        }
    }

    pub fn available_permits(&self) -> usize {
        *self.permits.lock()
    }
}
