use crate::context;
use std::fmt;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

/// An opaque ID that uniquely identifies a task relative to all other tasks
/// created by this process.
///
/// # Notes
///
/// - Task IDs are *not* sequential across threads, and do not indicate the
///   order in which tasks were started.
/// - The ID of the task currently being polled on this thread is available
///   through [`task::try_id()`](crate::task::try_id()).
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct Id(pub(crate) NonZeroU64);

/// Returns the [`Id`] of the task currently being polled on this thread, or
/// `None` if called outside of a task.
pub fn try_id() -> Option<Id> {
    context::current_task_id()
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Id {
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);

        let id = COUNTER.fetch_add(1, Ordering::Relaxed);

        // Even at a billion tasks per second, it takes centuries to wrap.
        let Some(id) = NonZeroU64::new(id) else {
            Self::exhausted();
        };

        Self(id)
    }

    #[cold]
    fn exhausted() -> ! {
        panic!("failed to generate unique task ID: bitspace exhausted")
    }

    pub fn as_u64(&self) -> u64 {
        self.0.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::thread;

    #[test]
    fn test_new_task_id_unique() {
        let handles = (0..4)
            .map(|_| thread::spawn(|| (0..64).map(|_| Id::next()).collect::<Vec<_>>()))
            .collect::<Vec<_>>();

        let all_ids = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect::<HashSet<_>>();

        assert_eq!(all_ids.len(), 4 * 64);
    }

    #[test]
    fn test_no_task_id_outside_task() {
        assert_eq!(try_id(), None);
    }
}
