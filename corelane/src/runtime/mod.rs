//! Multi-queue scheduler.
//!
//! A [`Runtime`] owns one worker thread per queue and an event waiter thread.
//! Suspended computations are handed to the scheduler as
//! [`Continuation`](crate::task::Continuation)s, either right away with
//! [`Handle::schedule`] or once a [`Signal`] fires with
//! [`Handle::schedule_on_signal`].
//!
//! Each worker queue holds one FIFO per [`Priority`] level and always pops
//! from the highest non-empty level. An optional [`CpuMask`] restricts which
//! queues may run a continuation: idle queues are preferred, otherwise the
//! continuation is spread over the allowed queues along a low-discrepancy
//! sequence.

mod error;
pub use error::SchedulerError;

mod mask;
pub use mask::CpuMask;

mod priority;
pub use priority::Priority;

pub mod signal;
pub use signal::{Event, ResetMode, Signal};

pub(crate) mod suspend;
pub use suspend::{ResumeOn, WaitFor};

mod event_waiter;
mod placement;
mod pool;
mod worker;

mod scheduler;
pub use scheduler::Handle;
pub(crate) use scheduler::Scheduler;

#[allow(clippy::module_inception)]
pub mod runtime;
pub use runtime::{Builder, Runtime};
pub(crate) use runtime::RuntimeConfig;

mod spawn;
pub use spawn::{resume_on, spawn, wait_for, yield_now};
