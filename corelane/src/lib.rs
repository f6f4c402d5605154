//! Cooperative task runtime built around explicit continuations.
//!
//! * [`task`]: tasks that run inline on whichever thread wakes them, with
//!   panic capture and awaitable or blocking completion.
//! * [`runtime`]: a pool of worker queues with CPU affinity masks and
//!   priorities, plus an event waiter resuming work when OS handles fire.
//! * [`cancel`]: cancellation sources and tokens linked into a propagation
//!   graph.
//! * [`sync`]: a counting semaphore.

#[doc(inline)]
pub use corelane_macros::main;

#[doc(inline)]
pub use corelane_macros::test;

pub mod cancel;

mod context;

pub mod runtime;
pub use runtime::{resume_on, spawn, wait_for, yield_now};

pub mod sync;

pub mod task;

mod utils;

#[cfg(test)]
mod test_utils;
