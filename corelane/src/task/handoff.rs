use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::task::Waker;

/// Marker stored in the slot once the producer completed. Boxed wakers are
/// always aligned, so this address can never collide with a real one.
const COMPLETE: *mut Waker = ptr::without_provenance_mut(1);

/// Single-use hand-off cell between a task that completes (producer) and the
/// task awaiting it (consumer).
///
/// The slot is in one of three states: empty, holding the consumer's boxed
/// waker, or `COMPLETE`. Every transition is a single atomic operation, so
/// exactly one side ends up owning the waker:
///
/// - the consumer installs its waker with a CAS; if it observes `COMPLETE`
///   instead, the output is ready and it must not suspend.
/// - the producer swaps in `COMPLETE`; if it takes a waker out, it is
///   responsible for resuming the consumer.
///
/// There is a single consumer by construction (the owner of the `Task`
/// handle), so installs never race with each other.
#[derive(Debug)]
pub(crate) struct Handoff {
    slot: AtomicPtr<Waker>,
}

impl Handoff {
    pub(crate) fn new() -> Self {
        Self {
            slot: AtomicPtr::new(ptr::null_mut()),
        }
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.slot.load(Ordering::Acquire) == COMPLETE
    }

    /// Installs (or replaces) the consumer's waker. Returns false if the
    /// producer already completed, in which case nothing was installed.
    pub(crate) fn install(&self, waker: &Waker) -> bool {
        let mut curr = self.slot.load(Ordering::Acquire);
        if curr == COMPLETE {
            return false;
        }

        let new = Box::into_raw(Box::new(waker.clone()));

        loop {
            match self
                .slot
                .compare_exchange(curr, new, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(prev) => {
                    // We took the previous waker out of the slot, it's ours
                    // to free.
                    if !prev.is_null() {
                        drop(unsafe { Box::from_raw(prev) });
                    }
                    return true;
                }
                Err(actual) if actual == COMPLETE => {
                    drop(unsafe { Box::from_raw(new) });
                    return false;
                }
                Err(actual) => curr = actual,
            }
        }
    }

    /// Marks the producer side complete and returns the consumer's waker if
    /// one was installed. Must be called at most once.
    pub(crate) fn complete(&self) -> Option<Waker> {
        let prev = self.slot.swap(COMPLETE, Ordering::AcqRel);
        debug_assert!(prev != COMPLETE, "handoff completed twice");

        if prev.is_null() || prev == COMPLETE {
            None
        } else {
            // Safety: the pointer came from `Box::into_raw` in `install` and
            // the swap removed it from the slot, nobody else can reach it.
            Some(*unsafe { Box::from_raw(prev) })
        }
    }
}

impl Drop for Handoff {
    fn drop(&mut self) {
        let curr = *self.slot.get_mut();
        if !curr.is_null() && curr != COMPLETE {
            drop(unsafe { Box::from_raw(curr) });
        }
    }
}

// Safety: the raw pointer is only ever dereferenced by the side that removed
// it from the slot.
unsafe impl Send for Handoff {}
unsafe impl Sync for Handoff {}
