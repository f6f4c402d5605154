use crate::task::harness::CatchUnwind;
use crate::task::raw::RawTask;
use crate::task::{Handoff, Id, TaskError};
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// Starts a continuable task.
///
/// The future is polled right away on the calling thread, until it first
/// suspends or completes. There is no implicit initial suspension: to start
/// the body on a worker thread, begin it with
/// [`Handle::yield_now`](crate::runtime::Handle::yield_now) or use
/// [`Handle::spawn`](crate::runtime::Handle::spawn).
///
/// ```
/// use corelane::task;
///
/// # futures::executor::block_on(async {
/// let task = task::spawn(async { 40 + 2 });
/// assert_eq!(task.await, Ok(42));
/// # });
/// ```
pub fn spawn<F>(future: F) -> Task<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let id = Id::next();
    let shared = Arc::new(Shared {
        output: Mutex::new(None),
        handoff: Handoff::new(),
    });

    let body = {
        let shared = Arc::clone(&shared);
        async move {
            let output = CatchUnwind::new(future).await;
            shared.complete(output);
        }
    };

    let raw = RawTask::new(id, Box::pin(body));
    tracing::trace!(task.id = %id, "task started");
    raw.run_inline();

    Task {
        id,
        raw: Some(raw),
        shared,
    }
}

/// Output slot shared between the task body and its [`Task`] handle.
struct Shared<T> {
    output: Mutex<Option<Result<T, TaskError>>>,
    handoff: Handoff,
}

impl<T> Shared<T> {
    fn complete(&self, output: Result<T, TaskError>) {
        // The output must be stored before the handoff publishes completion.
        *self.output.lock() = Some(output);

        if let Some(waker) = self.handoff.complete() {
            waker.wake();
        }
    }

    #[track_caller]
    fn take_output(&self) -> Result<T, TaskError> {
        self.output
            .lock()
            .take()
            .expect("`Task` polled after it already returned its output")
    }
}

/// Single-owner handle to a suspendable computation which can be awaited by
/// another task.
///
/// Awaiting the handle yields the body's output, or a [`TaskError`] if the
/// body panicked.
///
/// Dropping the handle before the task completed destroys the computation: it
/// is never resumed again, even if one of its continuations is still queued.
/// Use [`Task::detach`] to let it run to completion unobserved instead.
#[must_use = "dropping a `Task` destroys the computation, use `detach` to let it run"]
pub struct Task<T> {
    id: Id,
    raw: Option<Arc<RawTask>>,
    shared: Arc<Shared<T>>,
}

impl<T> Task<T> {
    pub fn id(&self) -> Id {
        self.id
    }

    /// Whether the body has run to completion (or panicked).
    pub fn is_finished(&self) -> bool {
        self.shared.handoff.is_complete()
    }

    /// Lets the computation keep running without an owner. Its output is
    /// dropped.
    pub fn detach(mut self) {
        self.raw.take();
    }
}

impl<T> Future for Task<T> {
    type Output = Result<T, TaskError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let shared = &self.shared;

        // Fast path, or the producer completed before we could suspend.
        if shared.handoff.is_complete() || !shared.handoff.install(cx.waker()) {
            return Poll::Ready(shared.take_output());
        }

        Poll::Pending
    }
}

impl<T> Unpin for Task<T> {}

impl<T> Drop for Task<T> {
    fn drop(&mut self) {
        if let Some(raw) = self.raw.take()
            && !raw.is_complete()
        {
            tracing::trace!(task.id = %self.id, "task dropped before completion");
            raw.close();
        }
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("is_finished", &self.is_finished())
            .finish()
    }
}
