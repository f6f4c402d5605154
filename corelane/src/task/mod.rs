//! Suspendable tasks.
//!
//! A task owns a single Rust future. Starting a task polls it on the calling
//! thread until it first suspends; from then on it is polled by whichever
//! thread resumes one of its continuations.
//!
//! Two handle flavors exist:
//!
//! - [`Task`], awaitable from another task, which hands its output over to
//!   the awaiter through a lock-free slot.
//! - [`JoinableTask`], joined from plain threads by blocking on a binary
//!   permit.
//!
//! Panics escaping a task body are caught and surfaced as [`TaskError`].

// Public API
mod continuation;
pub use self::continuation::{Continuation, WakeOutcome, WakeReason};

mod error;
pub use self::error::TaskError;
pub(crate) use self::error::panic_payload_as_str;

pub mod id;
pub use self::id::{Id, try_id};

mod joinable;
pub use self::joinable::{JoinableTask, spawn_joinable};

#[allow(clippy::module_inception)]
mod task;
pub use self::task::{Task, spawn};

// Internals
mod handoff;
pub(crate) use self::handoff::Handoff;

mod harness;

mod raw;

mod state;
