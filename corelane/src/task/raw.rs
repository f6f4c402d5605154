use crate::context;
use crate::runtime::suspend::SuspendAction;
use crate::task::Id;
use crate::task::state::{Snapshot, State, TransitionToIdle, TransitionToRunning};
use parking_lot::Mutex;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};

pub(crate) type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

thread_local! {
    /// Set while this thread drives a poll loop.
    static DRIVING: Cell<bool> = const { Cell::new(false) };

    /// Tasks woken from inside a poll on this thread, already holding their
    /// `RUNNING` bit. Drained by the outermost poll loop.
    static READY: RefCell<VecDeque<Arc<RawTask>>> = const { RefCell::new(VecDeque::new()) };
}

/// Marks the current thread as driving tasks until dropped.
struct Driver(());

impl Driver {
    /// `None` if the thread already drives a poll loop further up the stack.
    fn enter() -> Option<Self> {
        match DRIVING.try_with(|driving| driving.replace(true)) {
            Ok(true) => None,
            Ok(false) | Err(_) => Some(Driver(())),
        }
    }

    fn pop_ready() -> Option<Arc<RawTask>> {
        READY
            .try_with(|ready| ready.borrow_mut().pop_front())
            .ok()
            .flatten()
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        let _ = DRIVING.try_with(|driving| driving.set(false));
    }
}

/// Type-erased, reference counted task.
///
/// The future is only ever polled by the thread holding the `RUNNING` bit, so
/// the mutex around it is never contended. Wakers created for the task are
/// clones of the `Arc<RawTask>`, waking one polls the task on the waking
/// thread.
pub(crate) struct RawTask {
    id: Id,
    state: State,
    future: Mutex<Option<BoxFuture>>,
}

impl RawTask {
    pub(crate) fn new(id: Id, future: BoxFuture) -> Arc<Self> {
        Arc::new(Self {
            id,
            state: State::new(),
            future: Mutex::new(Some(future)),
        })
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.state.load().contains(Snapshot::COMPLETE)
    }

    /// Polls the task on the current thread, unless it is already being
    /// polled somewhere, in which case that poller is asked to poll again.
    ///
    /// A task woken from inside another task's poll on this thread is queued
    /// and polled once the outermost poll loop returns, so chains of
    /// completing tasks run in constant stack depth.
    pub(crate) fn run(self: &Arc<Self>) {
        self.drive(false);
    }

    /// Like [`run`](Self::run), but polls right away even from inside another
    /// task's poll. Used when starting a task.
    pub(crate) fn run_inline(self: &Arc<Self>) {
        self.drive(true);
    }

    fn drive(self: &Arc<Self>, inline: bool) {
        if self.state.transition_to_running() != TransitionToRunning::Success {
            return;
        }

        let Some(_driver) = Driver::enter() else {
            if inline {
                self.poll_loop();
                return;
            }

            let task = Arc::clone(self);
            if READY
                .try_with(move |ready| ready.borrow_mut().push_back(task))
                .is_err()
            {
                self.poll_loop();
            }
            return;
        };

        self.poll_loop();
        while let Some(task) = Driver::pop_ready() {
            task.poll_loop();
        }
    }

    /// Must be called holding the `RUNNING` bit.
    fn poll_loop(self: &Arc<Self>) {
        let waker = Waker::from(Arc::clone(self));
        let mut cx = Context::from_waker(&waker);

        // Suspend actions are only handed out once the task is idle. A wake
        // during the poll makes us poll again first, still holding them.
        let mut pending = context::Actions::new();

        loop {
            if self.state.load().contains(Snapshot::CLOSED) {
                drop(pending);
                self.drop_future();
                self.state.transition_to_complete();
                return;
            }

            let poll = {
                let frame = context::TaskFrame::enter(self.id);
                let poll = match self.future.lock().as_mut() {
                    Some(future) => future.as_mut().poll(&mut cx),
                    None => Poll::Ready(()),
                };
                pending.extend(frame.exit());
                poll
            };

            if poll.is_ready() {
                self.drop_future();
                self.state.transition_to_complete();
                return;
            }

            match self.state.transition_to_idle() {
                TransitionToIdle::Ok => {
                    // Fully suspended, whoever picks up a continuation can
                    // poll us right away.
                    pending.into_iter().for_each(SuspendAction::dispatch);
                    return;
                }
                TransitionToIdle::OkNotified => {}
                TransitionToIdle::Closed => {
                    drop(pending);
                    self.drop_future();
                    self.state.transition_to_complete();
                    return;
                }
            }
        }
    }

    /// The owning handle was dropped before completion. The future is dropped
    /// now if idle, otherwise by the current poller once it returns. Wakes
    /// after this point are no-ops.
    pub(crate) fn close(&self) {
        if self.state.transition_to_closed() {
            self.drop_future();
            self.state.transition_to_complete();
        }
    }

    fn drop_future(&self) {
        // Take it out first, the future's destructor must not run while we
        // hold the lock.
        let future = self.future.lock().take();
        drop(future);
    }
}

impl Wake for RawTask {
    fn wake(self: Arc<Self>) {
        self.run();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.run();
    }
}

impl fmt::Debug for RawTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawTask")
            .field("id", &self.id)
            .field("state", &self.state.load())
            .finish_non_exhaustive()
    }
}
