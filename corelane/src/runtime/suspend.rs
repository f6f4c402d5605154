use crate::context;
use crate::runtime::error::check_wake_reason;
use crate::runtime::{CpuMask, Handle, Priority, SchedulerError, Signal};
use crate::task::{Continuation, WakeOutcome, WakeReason};
use std::fmt;
use std::future::Future;
use std::os::fd::AsFd;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// Scheduler call issued on behalf of a suspended task.
///
/// Recorded during the poll and dispatched once the task is idle, so a
/// worker resuming the continuation never finds the task still running.
pub(crate) enum SuspendAction {
    Schedule {
        handle: Handle,
        continuation: Continuation,
        mask: Option<CpuMask>,
        priority: Priority,
    },
    Register {
        handle: Handle,
        continuation: Continuation,
        signal: Arc<dyn Signal>,
        mask: Option<CpuMask>,
        priority: Priority,
    },
}

impl SuspendAction {
    /// Errors were already reported to the task through its wake outcome.
    pub(crate) fn dispatch(self) {
        let res = match self {
            SuspendAction::Schedule {
                handle,
                continuation,
                mask,
                priority,
            } => handle.schedule(continuation, mask, priority),
            SuspendAction::Register {
                handle,
                continuation,
                signal,
                mask,
                priority,
            } => handle.schedule_on_signal(continuation, signal, mask, priority),
        };

        if let Err(err) = res {
            tracing::trace!(error = %err, "suspend action rejected");
        }
    }
}

impl fmt::Debug for SuspendAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SuspendAction::Schedule { mask, priority, .. } => f
                .debug_struct("Schedule")
                .field("mask", mask)
                .field("priority", priority)
                .finish_non_exhaustive(),
            SuspendAction::Register {
                signal,
                mask,
                priority,
                ..
            } => f
                .debug_struct("Register")
                .field("fd", &signal.as_fd())
                .field("mask", mask)
                .field("priority", priority)
                .finish_non_exhaustive(),
        }
    }
}

/// Suspends the polling task, recording the scheduler call built by
/// `action`. Returns the outcome the task later inspects.
fn suspend(
    cx: &Context<'_>,
    action: impl FnOnce(Continuation) -> SuspendAction,
) -> Arc<WakeOutcome> {
    let outcome = WakeOutcome::new();
    let continuation = Continuation::with_outcome(cx.waker().clone(), Arc::clone(&outcome));

    // Driven outside of a task, the scheduler call can't be delayed.
    if let Err(action) = context::defer(action(continuation)) {
        action.dispatch();
    }

    outcome
}

/// What a suspension point makes of its outcome when polled again.
enum Resumption {
    /// Spurious wake, the continuation is still out there.
    Pending,

    /// Resumed, but the task is being polled on a thread the mask excludes.
    /// Happens when a wake from elsewhere raced the worker picking it up.
    Misplaced,

    Ready(Result<(), SchedulerError>),
}

fn check_outcome(outcome: &WakeOutcome, handle: &Handle, mask: Option<CpuMask>) -> Resumption {
    match outcome.get() {
        WakeReason::Pending => Resumption::Pending,
        WakeReason::Resumed if !handle.is_current_thread_allowed(mask) => Resumption::Misplaced,
        reason => Resumption::Ready(check_wake_reason(reason, handle.is_shutting_down())),
    }
}

/// Future returned by [`Handle::resume_on`] and [`Handle::yield_now`].
///
/// Completes once a worker allowed by the mask picked the task up.
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct ResumeOn {
    handle: Handle,
    mask: Option<CpuMask>,
    priority: Priority,
    outcome: Option<Arc<WakeOutcome>>,
}

impl ResumeOn {
    pub(crate) fn new(handle: Handle, mask: Option<CpuMask>, priority: Priority) -> Self {
        Self {
            handle,
            mask,
            priority,
            outcome: None,
        }
    }
}

impl Future for ResumeOn {
    type Output = Result<(), SchedulerError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(outcome) = &self.outcome {
            match check_outcome(outcome, &self.handle, self.mask) {
                Resumption::Pending => return Poll::Pending,
                Resumption::Ready(res) => return Poll::Ready(res),
                Resumption::Misplaced => {
                    tracing::trace!(mask = ?self.mask, "resumed off the mask, hopping again");
                }
            }
        }

        if self.handle.is_shutting_down() {
            return Poll::Ready(Err(SchedulerError::ShuttingDown));
        }

        let (handle, mask, priority) = (self.handle.clone(), self.mask, self.priority);
        let outcome = suspend(cx, |continuation| SuspendAction::Schedule {
            handle,
            continuation,
            mask,
            priority,
        });

        self.outcome = Some(outcome);
        Poll::Pending
    }
}

impl fmt::Debug for ResumeOn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResumeOn")
            .field("mask", &self.mask)
            .field("priority", &self.priority)
            .field("outcome", &self.outcome.as_ref().map(|o| o.get()))
            .finish()
    }
}

/// Future returned by [`Handle::wait_for`].
///
/// Completes once the signal fired and a worker allowed by the mask picked
/// the task up. Fails with [`SchedulerError::Abandoned`] if the signal hung
/// up first.
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct WaitFor {
    handle: Handle,
    signal: Arc<dyn Signal>,
    mask: Option<CpuMask>,
    priority: Priority,
    outcome: Option<Arc<WakeOutcome>>,

    /// Set when the signal fired but the task was polled off the mask.
    hop: Option<ResumeOn>,
}

impl WaitFor {
    pub(crate) fn new(
        handle: Handle,
        signal: Arc<dyn Signal>,
        mask: Option<CpuMask>,
        priority: Priority,
    ) -> Self {
        Self {
            handle,
            signal,
            mask,
            priority,
            outcome: None,
            hop: None,
        }
    }
}

impl Future for WaitFor {
    type Output = Result<(), SchedulerError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(hop) = &mut self.hop {
            return Pin::new(hop).poll(cx);
        }

        let this = &mut *self;
        if let Some(outcome) = &this.outcome {
            match check_outcome(outcome, &this.handle, this.mask) {
                Resumption::Pending => return Poll::Pending,
                Resumption::Ready(res) => return Poll::Ready(res),
                Resumption::Misplaced => {
                    // The signal was consumed, only the placement is left.
                    let hop = this.hop.insert(this.handle.resume_on(this.mask, this.priority));
                    return Pin::new(hop).poll(cx);
                }
            }
        }

        if self.handle.is_shutting_down() {
            return Poll::Ready(Err(SchedulerError::ShuttingDown));
        }

        if self.handle.is_waiter_stopped() {
            return Poll::Ready(Err(SchedulerError::EventWaiterStopped));
        }

        let (handle, mask, priority) = (self.handle.clone(), self.mask, self.priority);
        let signal = Arc::clone(&self.signal);
        let outcome = suspend(cx, |continuation| SuspendAction::Register {
            handle,
            continuation,
            signal,
            mask,
            priority,
        });

        self.outcome = Some(outcome);
        Poll::Pending
    }
}

impl Drop for WaitFor {
    fn drop(&mut self) {
        let Some(outcome) = &self.outcome else {
            return;
        };

        if outcome.get() == WakeReason::Pending {
            // Lets the event waiter free the slot instead of holding it until
            // the signal fires.
            outcome.retract();
            if let Err(err) = self.handle.0.wake.set() {
                tracing::trace!(error = %err, "failed to wake the event waiter");
            }
        }
    }
}

impl fmt::Debug for WaitFor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitFor")
            .field("fd", &self.signal.as_fd())
            .field("mask", &self.mask)
            .field("priority", &self.priority)
            .field("outcome", &self.outcome.as_ref().map(|o| o.get()))
            .field("hop", &self.hop)
            .finish()
    }
}
