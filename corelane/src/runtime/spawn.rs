//! Free functions operating on the current runtime.
//!
//! Each resolves the runtime with [`Handle::current`]: the runtime owning the
//! calling thread, or the lazily started [global](crate::runtime::Runtime::global)
//! runtime everywhere else.

use crate::runtime::{CpuMask, Handle, Priority, ResumeOn, Signal, WaitFor};
use crate::task::Task;
use std::sync::Arc;

/// Starts a task whose body runs on a worker of the current runtime.
///
/// ```
/// use corelane::runtime::Builder;
///
/// let rt = Builder::new().worker_threads(2).pin_workers(false).try_build().unwrap();
///
/// let sum = rt.block_on(async {
///     let a = corelane::spawn(async { 1 });
///     let b = corelane::spawn(async { 2 });
///     a.await.unwrap() + b.await.unwrap()
/// });
/// assert_eq!(sum, 3);
/// ```
pub fn spawn<F>(future: F) -> Task<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    Handle::current().spawn(future)
}

/// Hops onto any worker of the current runtime.
pub fn yield_now() -> ResumeOn {
    Handle::current().yield_now()
}

/// Hops onto a worker allowed by `mask`, with the given priority.
pub fn resume_on(mask: Option<CpuMask>, priority: Priority) -> ResumeOn {
    Handle::current().resume_on(mask, priority)
}

/// Waits for `signal` to fire, then resumes on a worker allowed by `mask`.
pub fn wait_for(signal: Arc<dyn Signal>, mask: Option<CpuMask>, priority: Priority) -> WaitFor {
    Handle::current().wait_for(signal, mask, priority)
}
