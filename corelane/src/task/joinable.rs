use crate::context;
use crate::sync::Semaphore;
use crate::task::harness::CatchUnwind;
use crate::task::raw::RawTask;
use crate::task::{Id, TaskError};
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Starts a task meant to be joined from plain (non-task) code, usually the
/// root of a task tree.
///
/// Like [`spawn`](crate::task::spawn), the future runs on the calling thread
/// until it first suspends.
pub fn spawn_joinable<F>(future: F) -> JoinableTask<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let id = Id::next();
    let shared = Arc::new(Shared {
        output: Mutex::new(None),
        done: Semaphore::new(0),
    });

    let body = {
        let shared = Arc::clone(&shared);
        async move {
            let output = CatchUnwind::new(future).await;
            *shared.output.lock() = Some(output);
            shared.done.release(1);
        }
    };

    let raw = RawTask::new(id, Box::pin(body));
    tracing::trace!(task.id = %id, "joinable task started");
    raw.run_inline();

    JoinableTask { id, shared }
}

struct Shared<T> {
    output: Mutex<Option<Result<T, TaskError>>>,

    /// Binary permit, released once by the completing body.
    done: Semaphore,
}

/// Handle to a task that can only be waited on by blocking the current thread.
///
/// Dropping the handle detaches the task, it keeps running to completion.
pub struct JoinableTask<T> {
    id: Id,
    shared: Arc<Shared<T>>,
}

impl<T> JoinableTask<T> {
    pub fn id(&self) -> Id {
        self.id
    }

    pub fn is_finished(&self) -> bool {
        self.shared.output.lock().is_some()
    }

    /// Blocks the current thread until the body has completed and returns
    /// its output.
    ///
    /// Must not be called from a runtime worker: the body may need that very
    /// worker to make progress.
    pub fn join(self) -> Result<T, TaskError> {
        debug_assert!(
            context::current_worker().is_none(),
            "`JoinableTask::join` called from a runtime worker thread"
        );

        self.shared.done.acquire();
        self.take_output()
    }

    /// Like [`join`](Self::join), but gives up after `timeout` and hands the
    /// task back.
    pub fn join_timeout(self, timeout: Duration) -> Result<Result<T, TaskError>, Self> {
        if self.shared.done.acquire_timeout(timeout) {
            Ok(self.take_output())
        } else {
            Err(self)
        }
    }

    #[track_caller]
    fn take_output(&self) -> Result<T, TaskError> {
        // The permit is only released after the output was stored.
        self.shared
            .output
            .lock()
            .take()
            .expect("joinable task released its permit without an output")
    }
}

impl<T> fmt::Debug for JoinableTask<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinableTask")
            .field("id", &self.id)
            .field("is_finished", &self.is_finished())
            .finish()
    }
}
