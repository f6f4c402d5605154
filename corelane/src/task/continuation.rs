use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::task::Waker;

/// Why a continuation was resumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WakeReason {
    /// Not resumed yet.
    Pending = 0,

    /// Picked up by a worker, or its signal fired.
    Resumed = 1,

    /// The signal it was waiting on hung up or became invalid, or the event
    /// waiter failed.
    Abandoned = 2,

    /// The scheduler refused the continuation, it is shutting down.
    Rejected = 3,
}

impl WakeReason {
    fn from_u8(val: u8) -> Self {
        match val {
            0 => WakeReason::Pending,
            1 => WakeReason::Resumed,
            2 => WakeReason::Abandoned,
            _ => WakeReason::Rejected,
        }
    }
}

/// Shared cell recording the [`WakeReason`] of a continuation. Written by
/// whoever resumes the continuation, read by the suspended future.
#[derive(Debug)]
pub struct WakeOutcome {
    reason: AtomicU8,

    /// The suspended side went away, nobody will look at the reason.
    retracted: AtomicBool,
}

impl WakeOutcome {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            reason: AtomicU8::new(WakeReason::Pending as u8),
            retracted: AtomicBool::new(false),
        })
    }

    pub(crate) fn retract(&self) {
        self.retracted.store(true, Ordering::Release);
    }

    pub(crate) fn is_retracted(&self) -> bool {
        self.retracted.load(Ordering::Acquire)
    }

    pub fn get(&self) -> WakeReason {
        WakeReason::from_u8(self.reason.load(Ordering::Acquire))
    }

    /// Records `reason` unless a reason was already recorded. The first
    /// resolution wins.
    fn resolve(&self, reason: WakeReason) {
        let _ = self.reason.compare_exchange(
            WakeReason::Pending as u8,
            reason as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}

/// Resumption point of a suspended computation.
///
/// Resuming consumes the continuation: each one runs at most once. Dropping
/// a continuation without resuming it leaves the computation suspended.
pub struct Continuation {
    waker: Waker,
    outcome: Option<Arc<WakeOutcome>>,
}

impl Continuation {
    /// A continuation without an outcome cell, for callers that only care
    /// about being woken.
    pub fn new(waker: Waker) -> Self {
        Self {
            waker,
            outcome: None,
        }
    }

    pub fn with_outcome(waker: Waker, outcome: Arc<WakeOutcome>) -> Self {
        Self {
            waker,
            outcome: Some(outcome),
        }
    }

    /// Resumes the suspended computation. When the computation is a
    /// [`Task`](crate::task::Task), it is polled on the calling thread.
    pub fn resume(self) {
        self.finish(WakeReason::Resumed);
    }

    /// Resumes the computation, telling it its wait will never complete.
    pub fn abandon(self) {
        self.finish(WakeReason::Abandoned);
    }

    /// Resumes the computation, telling it the scheduler refused it.
    pub fn reject(self) {
        self.finish(WakeReason::Rejected);
    }

    /// Records why the computation will be resumed without resuming it yet,
    /// for continuations re-routed through a worker queue. Later calls to
    /// `resume`, `abandon` or `reject` keep this reason.
    pub(crate) fn resolve(&self, reason: WakeReason) {
        if let Some(outcome) = &self.outcome {
            outcome.resolve(reason);
        }
    }

    /// Whether the suspension point waiting on this continuation was dropped.
    pub(crate) fn is_retracted(&self) -> bool {
        self.outcome.as_ref().is_some_and(|o| o.is_retracted())
    }

    fn finish(self, reason: WakeReason) {
        // The outcome must be visible before the computation gets polled.
        self.resolve(reason);
        self.waker.wake();
    }
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Continuation")
            .field("outcome", &self.outcome.as_ref().map(|o| o.get()))
            .finish_non_exhaustive()
    }
}
