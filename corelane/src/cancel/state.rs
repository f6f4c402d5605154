use parking_lot::{Condvar, Mutex};
use smallvec::SmallVec;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

#[cfg(test)]
use std::sync::atomic::AtomicUsize;

// Most states are linked to a handful of other states at most, keep the
// propagation snapshot on the stack.
const INLINE_LINKS: usize = 4;

/// Unique id of a cancellation state, used to find our own entry in the
/// link lists of the states we are linked to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct StateId(u64);

impl StateId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug)]
struct Link {
    id: StateId,
    state: Weak<CancellationState>,
}

#[derive(Debug, Default)]
struct Links {
    /// States to cancel when we get cancelled.
    downstream: Vec<Link>,

    /// States we were linked from. Never owning, only used to remove
    /// ourselves from their `downstream` list on drop.
    upstream: Vec<Link>,
}

/// Shared cancellation state.
///
/// Owned by every [`CancellationSource`] and [`CancellationToken`] pointing to
/// it. Neither direction of the link graph owns the other side: a downstream
/// state stays alive only as long as somebody holds a handle to it.
///
/// [`CancellationSource`]: crate::cancel::CancellationSource
/// [`CancellationToken`]: crate::cancel::CancellationToken
#[derive(Debug)]
pub(crate) struct CancellationState {
    id: StateId,

    /// Monotonic: once set, never cleared.
    cancelled: AtomicBool,

    /// Guards the link lists and is the lock blocked waiters sleep on.
    links: Mutex<Links>,

    cvar: Condvar,

    /// Number of times a `cancel` call went past the idempotency check.
    #[cfg(test)]
    pub(crate) notifications: AtomicUsize,
}

impl CancellationState {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            id: StateId::next(),
            cancelled: AtomicBool::new(false),
            links: Mutex::new(Links::default()),
            cvar: Condvar::new(),

            #[cfg(test)]
            notifications: AtomicUsize::new(0),
        })
    }

    /// Creates a new state downstream of every state in `upstream`.
    pub(crate) fn new_linked<'a, I>(upstream: I) -> Arc<Self>
    where
        I: IntoIterator<Item = &'a Arc<CancellationState>>,
    {
        let state = Self::new();
        let mut start_cancelled = false;

        for parent in upstream {
            // Checking the flag while holding the parent's lock closes the race
            // with a concurrent `cancel` on the parent: either it snapshots its
            // downstream list after our push, or we observe its flag.
            let parent_cancelled = {
                let mut links = parent.links.lock();
                links.downstream.push(Link {
                    id: state.id,
                    state: Arc::downgrade(&state),
                });
                parent.is_cancelled()
            };

            state.links.lock().upstream.push(Link {
                id: parent.id,
                state: Arc::downgrade(parent),
            });

            start_cancelled |= parent_cancelled;
        }

        if start_cancelled {
            state.cancel();
        }

        state
    }

    #[inline(always)]
    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Cancels this state and, depth-first, every live downstream state.
    /// Calling it again is a no-op.
    pub(crate) fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }

        #[cfg(test)]
        self.notifications.fetch_add(1, Ordering::Relaxed);

        // Waiters check the flag under the lock, so notifying while holding
        // it guarantees no wakeup is lost.
        let downstream = {
            let links = self.links.lock();
            self.cvar.notify_all();

            links
                .downstream
                .iter()
                .filter_map(|link| link.state.upgrade())
                .collect::<SmallVec<[_; INLINE_LINKS]>>()
        };

        tracing::trace!(
            state = self.id.0,
            downstream = downstream.len(),
            "cancellation requested"
        );

        // Recurse after releasing our lock, we never hold two node locks.
        for state in downstream {
            state.cancel();
        }
    }

    /// Blocks until cancelled.
    pub(crate) fn wait(&self) {
        let mut links = self.links.lock();
        while !self.is_cancelled() {
            self.cvar.wait(&mut links);
        }
    }

    /// Blocks until cancelled or `timeout` elapsed. Returns whether
    /// cancellation occurred.
    pub(crate) fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.is_cancelled() {
            return true;
        }

        let deadline = Instant::now() + timeout;
        let mut links = self.links.lock();

        while !self.is_cancelled() {
            if self.cvar.wait_until(&mut links, deadline).timed_out() {
                break;
            }
        }

        self.is_cancelled()
    }

    #[cfg(test)]
    pub(crate) fn num_downstream(&self) -> usize {
        self.links.lock().downstream.len()
    }

    #[cfg(test)]
    pub(crate) fn num_upstream(&self) -> usize {
        self.links.lock().upstream.len()
    }
}

impl Drop for CancellationState {
    fn drop(&mut self) {
        let upstream = std::mem::take(&mut self.links.get_mut().upstream);

        for link in upstream {
            if let Some(parent) = link.state.upgrade() {
                parent
                    .links
                    .lock()
                    .downstream
                    .retain(|child| child.id != self.id);
            }
        }
    }
}
