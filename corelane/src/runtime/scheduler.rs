use crate::context;
use crate::runtime::event_waiter::{self, EventWaiter};
use crate::runtime::placement::Placement;
use crate::runtime::suspend::{ResumeOn, WaitFor};
use crate::runtime::worker::WorkerQueue;
use crate::runtime::{
    CpuMask, Event, Priority, ResetMode, Runtime, RuntimeConfig, SchedulerError, Signal, pool,
};
use crate::task::{self, Continuation, Task};
use anyhow::{Context, Result, anyhow};
use crossbeam_queue::SegQueue;
use parking_lot::Mutex;
use std::fmt;
use std::os::fd::AsFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

#[cfg(test)]
use crate::utils::scheduler::{Call, Method, Tracker};

/// A continuation waiting for the event waiter to adopt it into its wait set.
pub(crate) struct Registration {
    pub(crate) continuation: Continuation,
    pub(crate) signal: Arc<dyn Signal>,
    pub(crate) mask: Option<CpuMask>,
    pub(crate) priority: Priority,
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("fd", &self.signal.as_fd())
            .field("mask", &self.mask)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

/// Shared state of a runtime: the worker queues, the pending registrations
/// of the event waiter and the threads servicing them.
pub(crate) struct Scheduler {
    pub(crate) cfg: RuntimeConfig,

    queues: Box<[WorkerQueue]>,

    placement: Placement,

    /// Registrations not adopted by the event waiter yet.
    pending: SegQueue<Registration>,

    /// Slot 0 of the event waiter's wait set.
    pub(crate) wake: Arc<Event>,

    shutting_down: AtomicBool,

    /// Set once the event waiter gave up after a wait failure.
    waiter_stopped: AtomicBool,

    pub(crate) workers: Mutex<Vec<thread::JoinHandle<()>>>,

    event_waiter: Mutex<Option<thread::JoinHandle<Result<(), SchedulerError>>>>,

    #[cfg(test)]
    pub(crate) tracker: Tracker,
}

impl Scheduler {
    pub(crate) fn try_new(cfg: RuntimeConfig) -> Result<Self> {
        let queues = (0..cfg.worker_threads)
            .map(|index| WorkerQueue::new(index, cfg.priority_levels))
            .collect();

        let wake = Event::new(ResetMode::Auto).context("failed to create the wake event")?;

        Ok(Self {
            cfg,
            queues,
            placement: Placement::new(),
            pending: SegQueue::new(),
            wake: Arc::new(wake),
            shutting_down: AtomicBool::new(false),
            waiter_stopped: AtomicBool::new(false),
            workers: Mutex::new(Vec::new()),
            event_waiter: Mutex::new(None),
            #[cfg(test)]
            tracker: Tracker::new(),
        })
    }

    pub(crate) fn into_handle(self) -> Handle {
        Handle(Arc::new(self))
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("workers", &self.queues.len())
            .field("queued", &self.queues.iter().map(WorkerQueue::len).sum::<usize>())
            .field("pending", &self.pending.len())
            .field("shutting_down", &self.shutting_down.load(Ordering::Relaxed))
            .field("waiter_stopped", &self.waiter_stopped.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Cheaply cloneable handle to a runtime's scheduler.
///
/// Suspension points hold a handle, so they keep working (by returning
/// [`SchedulerError::ShuttingDown`]) after the runtime was dropped.
#[derive(Debug, Clone)]
pub struct Handle(pub(crate) Arc<Scheduler>);

impl Handle {
    /// Handle of the runtime owning the current thread, or of the
    /// [global](Runtime::global) runtime.
    pub fn current() -> Handle {
        Self::try_current().unwrap_or_else(|| Runtime::global().handle().clone())
    }

    /// Handle of the runtime owning the current thread, if any.
    pub fn try_current() -> Option<Handle> {
        context::current_handle()
    }

    pub fn num_workers(&self) -> usize {
        self.0.queues.len()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.0.shutting_down.load(Ordering::Acquire)
    }

    pub(crate) fn is_waiter_stopped(&self) -> bool {
        self.0.waiter_stopped.load(Ordering::Acquire)
    }

    /// Enqueues `continuation` on a worker queue allowed by `mask` (every
    /// queue when `None`).
    ///
    /// On error, the continuation has already been resumed with
    /// [`WakeReason::Rejected`](crate::task::WakeReason::Rejected).
    pub fn schedule(
        &self,
        continuation: Continuation,
        mask: Option<CpuMask>,
        priority: Priority,
    ) -> Result<(), SchedulerError> {
        if self.is_shutting_down() {
            self.reject(continuation);
            return Err(SchedulerError::ShuttingDown);
        }

        let index = self.select_queue(mask);
        let queue = &self.0.queues[index];

        #[cfg(test)]
        self.0
            .tracker
            .record(Method::Schedule, Call::Schedule { queue: index, priority });

        tracing::trace!(queue = index, ?priority, "scheduling continuation");
        queue.push(continuation, priority);

        // Lost the race against shutdown: the worker will not pop anymore.
        if queue.is_shutdown() {
            queue.drain().into_iter().for_each(|c| self.reject(c));
        }

        Ok(())
    }

    /// Enqueues `continuation` once `signal` fires, on a worker queue allowed
    /// by `mask`.
    ///
    /// The registration is adopted asynchronously by the event waiter thread.
    /// If the signal hangs up or becomes invalid before firing, the
    /// continuation is resumed with
    /// [`WakeReason::Abandoned`](crate::task::WakeReason::Abandoned).
    ///
    /// A registration holds its wait set slot until the signal fires or
    /// hangs up. The only exception is a dropped [`WaitFor`], whose
    /// registration is released on the event waiter's next pass.
    pub fn schedule_on_signal(
        &self,
        continuation: Continuation,
        signal: Arc<dyn Signal>,
        mask: Option<CpuMask>,
        priority: Priority,
    ) -> Result<(), SchedulerError> {
        if self.is_shutting_down() {
            self.reject(continuation);
            return Err(SchedulerError::ShuttingDown);
        }

        if self.is_waiter_stopped() {
            self.reject(continuation);
            return Err(SchedulerError::EventWaiterStopped);
        }

        #[cfg(test)]
        self.0
            .tracker
            .record(Method::ScheduleOnSignal, Call::ScheduleOnSignal { priority });

        self.0.pending.push(Registration {
            continuation,
            signal,
            mask,
            priority,
        });

        // The event waiter drains pending registrations once when it stops,
        // anything pushed after that is ours to reject.
        if self.is_shutting_down() || self.is_waiter_stopped() {
            self.reject_pending();
        } else if let Err(err) = self.0.wake.set() {
            // Adopted on the next wait timeout instead.
            tracing::warn!(error = %err, "failed to wake the event waiter");
        }

        Ok(())
    }

    /// Starts a task whose body first hops onto a worker of this runtime.
    ///
    /// If the runtime is shutting down, the body runs on the calling thread
    /// instead.
    pub fn spawn<F>(&self, future: F) -> Task<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let handle = self.clone();

        task::spawn(async move {
            if let Err(err) = handle.yield_now().await {
                tracing::debug!(error = %err, "spawned task runs off the runtime");
            }
            future.await
        })
    }

    /// Suspends the current task and resumes it on any worker.
    pub fn yield_now(&self) -> ResumeOn {
        ResumeOn::new(self.clone(), None, Priority::NORMAL)
    }

    /// Suspends the current task and resumes it on a worker allowed by
    /// `mask`, with the given priority.
    pub fn resume_on(&self, mask: Option<CpuMask>, priority: Priority) -> ResumeOn {
        ResumeOn::new(self.clone(), mask, priority)
    }

    /// Suspends the current task until `signal` fires, then resumes it on a
    /// worker allowed by `mask`.
    pub fn wait_for(
        &self,
        signal: Arc<dyn Signal>,
        mask: Option<CpuMask>,
        priority: Priority,
    ) -> WaitFor {
        WaitFor::new(self.clone(), signal, mask, priority)
    }

    /// Picks the worker queue for a new item: the first idle queue allowed by
    /// `mask`, otherwise one spread by the placement sequence.
    pub(crate) fn select_queue(&self, mask: Option<CpuMask>) -> usize {
        let resolved = self.resolve_mask(mask);

        if mask.is_some_and(|m| (m & resolved).is_empty()) {
            tracing::warn!(?mask, "affinity mask selects no worker, using all workers");
        }

        if let Some(idle) = resolved.iter().find(|&i| self.0.queues[i].is_idle()) {
            return idle;
        }

        let nth = self.0.placement.next(resolved.count());
        resolved.iter().nth(nth).unwrap_or_default()
    }

    /// Workers `mask` selects, or every worker when it selects none of them.
    fn resolve_mask(&self, mask: Option<CpuMask>) -> CpuMask {
        let available = CpuMask::first(self.num_workers());

        match mask.map(|m| m & available) {
            Some(m) if !m.is_empty() => m,
            _ => available,
        }
    }

    /// Whether the current thread is one `mask` allows a resumed task to run
    /// on. Threads outside of this runtime drive tasks as a foreign executor
    /// and always qualify.
    pub(crate) fn is_current_thread_allowed(&self, mask: Option<CpuMask>) -> bool {
        match context::current_handle() {
            Some(current) if Arc::ptr_eq(&current.0, &self.0) => context::current_worker()
                .is_some_and(|worker| self.resolve_mask(mask).contains(worker)),
            _ => true,
        }
    }

    pub(crate) fn queue(&self, index: usize) -> &WorkerQueue {
        &self.0.queues[index]
    }

    pub(crate) fn pop_pending(&self) -> Option<Registration> {
        self.0.pending.pop()
    }

    pub(crate) fn mark_waiter_stopped(&self) {
        self.0.waiter_stopped.store(true, Ordering::Release);
    }

    pub(crate) fn reject(&self, continuation: Continuation) {
        #[cfg(test)]
        self.0.tracker.record(Method::Reject, Call::Reject);

        continuation.reject();
    }

    pub(crate) fn reject_pending(&self) {
        while let Some(registration) = self.pop_pending() {
            self.reject(registration.continuation);
        }
    }

    /// Starts the worker threads, then the event waiter.
    pub(crate) fn start(&self) -> Result<()> {
        self.start_workers()?;
        self.start_event_waiter()
    }

    pub(crate) fn start_workers(&self) -> Result<()> {
        pool::spawn_workers(self)
    }

    pub(crate) fn start_event_waiter(&self) -> Result<()> {
        let waiter = EventWaiter::new(self.clone());

        let join = thread::Builder::new()
            .name(event_waiter::THREAD_NAME.to_string())
            .spawn(move || waiter.run())
            .context("failed to spawn the event waiter thread")?;

        *self.0.event_waiter.lock() = Some(join);
        Ok(())
    }

    /// Stops the event waiter, then every worker. Idempotent.
    pub(crate) fn shutdown(&self) -> Result<()> {
        if self.0.shutting_down.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        tracing::debug!(workers = self.num_workers(), "runtime shutting down");
        let mut errors = Vec::new();

        // The event waiter also checks the flag on every wait timeout, a
        // failed wake only delays it.
        if let Err(err) = self.0.wake.set() {
            tracing::warn!(error = %err, "failed to wake the event waiter");
        }

        let event_waiter = self.0.event_waiter.lock().take();
        if let Some(join) = event_waiter {
            match join.join() {
                Ok(Ok(())) => {}
                Ok(Err(err)) => errors.push(anyhow::Error::from(err)),
                Err(_) => errors.push(anyhow!("event waiter thread panicked")),
            }
        }

        self.reject_pending();

        for queue in self.0.queues.iter() {
            queue.shutdown();
        }

        let workers = std::mem::take(&mut *self.0.workers.lock());
        if let Err(err) = pool::join_all(workers) {
            errors.push(err);
        }

        for queue in self.0.queues.iter() {
            queue.drain().into_iter().for_each(|c| self.reject(c));
        }

        tracing::debug!("runtime shut down");

        if errors.is_empty() {
            Ok(())
        } else {
            let msgs = errors.iter().map(|e| format!("{e:#}")).collect::<Vec<_>>();
            Err(anyhow!("{} error(s) during shutdown: {}", msgs.len(), msgs.join("; ")))
        }
    }
}
