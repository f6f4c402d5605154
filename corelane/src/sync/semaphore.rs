use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// A counting semaphore.
///
/// Worker queues use it to track how many items are enqueued across all of
/// their priority FIFOs, and joinable tasks use a `Semaphore::new(0)` as a
/// one-shot binary permit released by the completing side.
#[derive(Debug)]
pub struct Semaphore {
    permits: Mutex<usize>,
    cvar: Condvar,
}

impl Semaphore {
    pub fn new(permits: usize) -> Self {
        Self {
            permits: Mutex::new(permits),
            cvar: Condvar::new(),
        }
    }

    /// Blocks the calling thread until a permit is available, then takes it.
    pub fn acquire(&self) {
        let mut permits = self.permits.lock();

        // Loop to account for spurious wakeups.
        while *permits == 0 {
            self.cvar.wait(&mut permits);
        }

        *permits -= 1;
    }

    /// Takes a permit if one is immediately available.
    pub fn try_acquire(&self) -> bool {
        let mut permits = self.permits.lock();
        if *permits == 0 {
            return false;
        }

        *permits -= 1;
        true
    }

    /// Blocks until a permit is available or `timeout` elapsed. Returns
    /// whether a permit was taken.
    pub fn acquire_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut permits = self.permits.lock();

        while *permits == 0 {
            if self.cvar.wait_until(&mut permits, deadline).timed_out() {
                break;
            }
        }

        if *permits == 0 {
            return false;
        }

        *permits -= 1;
        true
    }

    /// Adds `n` permits and wakes up to `n` blocked threads.
    pub fn release(&self, n: usize) {
        if n == 0 {
            return;
        }

        let mut permits = self.permits.lock();
        *permits += n;

        if n == 1 {
            self.cvar.notify_one();
        } else {
            self.cvar.notify_all();
        }
    }

    /// Number of permits currently available. Only a snapshot.
    pub fn available(&self) -> usize {
        *self.permits.lock()
    }
}

impl Default for Semaphore {
    fn default() -> Self {
        Self::new(0)
    }
}
