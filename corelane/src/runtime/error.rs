use crate::task::WakeReason;
use std::io;

/// Errors reported by the scheduler and the suspension points built on it.
#[derive(thiserror::Error, Debug)]
pub enum SchedulerError {
    /// The runtime is shutting down, continuations are no longer accepted.
    #[error("Scheduler is shutting down")]
    ShuttingDown,

    /// The event waiter thread stopped after a wait failure. Work can still
    /// be scheduled, signal registrations are rejected.
    #[error("Event waiter stopped, signal registrations are rejected")]
    EventWaiterStopped,

    /// The waited-on signal handle hung up or became invalid, it will never
    /// fire.
    #[error("Signal handle was abandoned")]
    Abandoned,

    /// The OS wait operation of the event waiter failed.
    #[error("Event waiter failed to wait on its signals: {0}")]
    WaitFailure(#[source] io::Error),

    #[error("Invalid runtime configuration: {0}")]
    InvalidConfig(String),
}

impl SchedulerError {
    /// Whether the scheduler can never accept this kind of request again.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SchedulerError::ShuttingDown
                | SchedulerError::EventWaiterStopped
                | SchedulerError::WaitFailure(_)
        )
    }

    pub(crate) fn raw_os_error(&self) -> Option<i32> {
        match self {
            SchedulerError::WaitFailure(e) => e.raw_os_error(),
            _ => None,
        }
    }
}

impl PartialEq for SchedulerError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::ShuttingDown, Self::ShuttingDown) => true,
            (Self::EventWaiterStopped, Self::EventWaiterStopped) => true,
            (Self::Abandoned, Self::Abandoned) => true,
            (Self::WaitFailure(a), Self::WaitFailure(b)) => a.kind() == b.kind(),
            (Self::InvalidConfig(a), Self::InvalidConfig(b)) => a == b,
            _ => false,
        }
    }
}

impl From<SchedulerError> for io::Error {
    fn from(e: SchedulerError) -> Self {
        match e {
            SchedulerError::WaitFailure(io_err) => io_err,
            _ => io::Error::other(e.to_string()),
        }
    }
}

/// Translates how a suspension point was resumed into its result.
pub(crate) fn check_wake_reason(
    reason: WakeReason,
    shutting_down: bool,
) -> Result<(), SchedulerError> {
    match reason {
        WakeReason::Pending | WakeReason::Resumed => Ok(()),
        WakeReason::Abandoned => Err(SchedulerError::Abandoned),
        WakeReason::Rejected if shutting_down => Err(SchedulerError::ShuttingDown),
        WakeReason::Rejected => Err(SchedulerError::EventWaiterStopped),
    }
}
