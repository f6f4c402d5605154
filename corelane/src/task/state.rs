use bitflags::bitflags;
use std::sync::atomic::{AtomicU8, Ordering};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct Snapshot: u8 {
        /// The future is being polled. Only one thread may hold this bit.
        const RUNNING = 1;

        /// Woken while running, the poller has to poll again.
        const NOTIFIED = 1 << 1;

        /// The future completed or was dropped. Terminal.
        const COMPLETE = 1 << 2;

        /// The owning handle went away before completion, the future must be
        /// dropped without being polled again.
        const CLOSED = 1 << 3;
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum TransitionToRunning {
    /// Caller now owns the right to poll the future.
    Success,

    /// Someone else is polling, they were told to poll again.
    Notified,

    /// Nothing left to poll.
    Dead,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum TransitionToIdle {
    Ok,

    /// Woken during the poll, caller keeps the `RUNNING` bit and polls again.
    OkNotified,

    /// Closed during the poll, caller keeps the `RUNNING` bit and has to drop
    /// the future.
    Closed,
}

/// Task lifecycle, packed in a single atomic byte.
#[derive(Debug)]
pub(crate) struct State {
    val: AtomicU8,
}

impl State {
    pub(crate) fn new() -> Self {
        Self {
            val: AtomicU8::new(Snapshot::empty().bits()),
        }
    }

    pub(crate) fn load(&self) -> Snapshot {
        Snapshot::from_bits_retain(self.val.load(Ordering::Acquire))
    }

    pub(crate) fn transition_to_running(&self) -> TransitionToRunning {
        self.fetch_update(|curr| {
            if curr.intersects(Snapshot::COMPLETE | Snapshot::CLOSED) {
                (None, TransitionToRunning::Dead)
            } else if curr.contains(Snapshot::RUNNING) {
                (
                    Some(curr | Snapshot::NOTIFIED),
                    TransitionToRunning::Notified,
                )
            } else {
                (
                    Some((curr | Snapshot::RUNNING) - Snapshot::NOTIFIED),
                    TransitionToRunning::Success,
                )
            }
        })
    }

    pub(crate) fn transition_to_idle(&self) -> TransitionToIdle {
        self.fetch_update(|curr| {
            debug_assert!(curr.contains(Snapshot::RUNNING));

            if curr.contains(Snapshot::CLOSED) {
                (None, TransitionToIdle::Closed)
            } else if curr.contains(Snapshot::NOTIFIED) {
                (
                    Some(curr - Snapshot::NOTIFIED),
                    TransitionToIdle::OkNotified,
                )
            } else {
                (Some(curr - Snapshot::RUNNING), TransitionToIdle::Ok)
            }
        })
    }

    /// Must be called by the thread holding the `RUNNING` bit.
    pub(crate) fn transition_to_complete(&self) {
        let prev = Snapshot::from_bits_retain(self.val.fetch_or(
            Snapshot::COMPLETE.bits(),
            Ordering::AcqRel,
        ));
        debug_assert!(prev.contains(Snapshot::RUNNING));

        self.val
            .fetch_and(!Snapshot::RUNNING.bits(), Ordering::AcqRel);
    }

    /// Marks the task closed. Returns true if the caller acquired the
    /// `RUNNING` bit and is responsible for dropping the future. Otherwise the
    /// current poller, if any, will notice the `CLOSED` bit when it is done.
    pub(crate) fn transition_to_closed(&self) -> bool {
        self.fetch_update(|curr| {
            if curr.contains(Snapshot::COMPLETE) {
                (None, false)
            } else if curr.contains(Snapshot::RUNNING) {
                (Some(curr | Snapshot::CLOSED), false)
            } else {
                (Some(curr | Snapshot::CLOSED | Snapshot::RUNNING), true)
            }
        })
    }

    fn fetch_update<F, T>(&self, mut f: F) -> T
    where
        F: FnMut(Snapshot) -> (Option<Snapshot>, T),
    {
        let mut curr = self.load();

        loop {
            let (next, res) = f(curr);

            let Some(next) = next else {
                return res;
            };

            match self.val.compare_exchange(
                curr.bits(),
                next.bits(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return res,
                Err(actual) => curr = Snapshot::from_bits_retain(actual),
            }
        }
    }
}
