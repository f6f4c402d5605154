use crate::runtime::Handle;
use crate::runtime::suspend::SuspendAction;
use crate::task::Id;
use smallvec::SmallVec;
use std::cell::{OnceCell, RefCell};
use std::marker::PhantomData;
use std::thread_local;

// Most polls record zero or one suspension, more only happen under join-like
// combinators.
pub(crate) type Actions = SmallVec<[SuspendAction; 2]>;

thread_local! {
    static CONTEXT: Context = const {
        Context {
            runtime: OnceCell::new(),
            frame: RefCell::new(None),
        }
    };
}

struct Context {
    /// Set once when the thread belongs to a runtime.
    runtime: OnceCell<RuntimeContext>,

    /// The task currently being polled on this thread, if any.
    frame: RefCell<Option<Frame>>,
}

#[derive(Debug, Clone)]
pub(crate) struct RuntimeContext {
    pub(crate) handle: Handle,

    /// Worker queue serviced by this thread, `None` on the event waiter.
    pub(crate) worker: Option<usize>,
}

struct Frame {
    task_id: Id,
    actions: Actions,
}

/// Binds the current thread to the runtime of `handle`. Can only be done once
/// per thread.
#[track_caller]
pub(crate) fn init_runtime_context(handle: Handle, worker: Option<usize>) {
    CONTEXT.with(|ctx| {
        let prev = ctx.runtime.set(RuntimeContext { handle, worker });
        assert!(prev.is_ok(), "runtime context already initialized");
    });
}

/// Handle of the runtime owning the current thread.
pub(crate) fn current_handle() -> Option<Handle> {
    CONTEXT
        .try_with(|ctx| ctx.runtime.get().map(|rt| rt.handle.clone()))
        .ok()
        .flatten()
}

/// Index of the worker queue serviced by the current thread.
pub(crate) fn current_worker() -> Option<usize> {
    CONTEXT
        .try_with(|ctx| ctx.runtime.get().and_then(|rt| rt.worker))
        .ok()
        .flatten()
}

pub(crate) fn current_task_id() -> Option<Id> {
    CONTEXT
        .try_with(|ctx| ctx.frame.borrow().as_ref().map(|f| f.task_id))
        .ok()
        .flatten()
}

/// Records `action` for dispatch once the task being polled has suspended.
///
/// When no task is being polled on this thread (the future is driven by a
/// foreign executor), the action is handed back to the caller which must
/// dispatch it right away.
pub(crate) fn defer(action: SuspendAction) -> Result<(), SuspendAction> {
    let mut action = Some(action);

    let _ = CONTEXT.try_with(|ctx| {
        if let Some(frame) = ctx.frame.borrow_mut().as_mut() {
            frame.actions.extend(action.take());
        }
    });

    match action {
        Some(action) => Err(action),
        None => Ok(()),
    }
}

/// Scope of a single poll of a task. Restores the enclosing frame on drop, a
/// task resumed inline from inside another task's poll gets its own frame.
pub(crate) struct TaskFrame {
    prev: Option<Frame>,

    // Frames are tied to the thread-local they were pushed on.
    _not_send: PhantomData<*const ()>,
}

impl TaskFrame {
    pub(crate) fn enter(task_id: Id) -> Self {
        let frame = Frame {
            task_id,
            actions: Actions::new(),
        };
        let prev = CONTEXT.with(|ctx| ctx.frame.replace(Some(frame)));

        Self {
            prev,
            _not_send: PhantomData,
        }
    }

    /// Leaves the frame, returning the suspend actions recorded during the
    /// poll.
    pub(crate) fn exit(mut self) -> Actions {
        let prev = self.prev.take();
        let frame = CONTEXT.with(|ctx| ctx.frame.replace(prev));
        std::mem::forget(self);

        frame.map(|f| f.actions).unwrap_or_default()
    }
}

impl Drop for TaskFrame {
    fn drop(&mut self) {
        // Only reached when unwinding out of a poll. The recorded actions are
        // dropped outside of the borrow.
        let prev = self.prev.take();
        let frame = CONTEXT.try_with(|ctx| ctx.frame.replace(prev));
        drop(frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_nest_and_restore() {
        let outer = Id::next();
        let inner = Id::next();
        assert_eq!(current_task_id(), None);

        let outer_frame = TaskFrame::enter(outer);
        assert_eq!(current_task_id(), Some(outer));

        let inner_frame = TaskFrame::enter(inner);
        assert_eq!(current_task_id(), Some(inner));
        assert!(inner_frame.exit().is_empty());

        assert_eq!(current_task_id(), Some(outer));
        assert!(outer_frame.exit().is_empty());
        assert_eq!(current_task_id(), None);
    }

    #[test]
    fn test_not_a_runtime_thread_by_default() {
        assert!(current_handle().is_none());
        assert_eq!(current_worker(), None);
    }
}
