//! Cooperative cancellation.
//!
//! A [`CancellationSource`] owns a shared cancellation state, hands out
//! read-only [`CancellationToken`]s and can be linked into a propagation
//! graph with [`CancellationSource::linked`]. Cancelling a source cancels,
//! synchronously and depth-first, every source linked from it before
//! [`CancellationSource::cancel`] returns.
//!
//! Cancellation is purely an observable flag: queued or running work is never
//! interrupted, task bodies are expected to poll their token.

mod source;
pub use source::{CancellationSource, CancellationToken};

mod state;
pub(crate) use state::CancellationState;

/// Returned by [`CancellationToken::throw_if_cancel_requested`] once
/// cancellation was requested.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("operation was cancelled")]
pub struct OperationCancelled;
