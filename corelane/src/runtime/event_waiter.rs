use crate::context;
use crate::runtime::signal::poll_timeout;
use crate::runtime::{CpuMask, Handle, Priority, SchedulerError, Signal};
use crate::task::{Continuation, WakeReason};
use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use smallvec::SmallVec;
use std::io;
use std::os::fd::AsFd;
use std::sync::Arc;

pub(crate) const THREAD_NAME: &str = "corelane-events";

/// Slot of the wait set reserved for the scheduler's wake event.
const WAKE_SLOT: usize = 0;

type PollFds<'fd> = SmallVec<[PollFd<'fd>; CpuMask::MAX_CPUS]>;

/// A continuation adopted into the wait set.
struct Waiting {
    continuation: Continuation,
    mask: Option<CpuMask>,
    priority: Priority,
}

enum Wakeup {
    /// Nothing fired, or the wait was interrupted.
    Timeout,

    /// Lowest slot with a non-empty `revents`.
    Ready { slot: usize, revents: PollFlags },
}

/// Multiplexes waits over a bounded set of signals on a dedicated thread.
///
/// The wait set is two parallel vectors, always modified together. Slot 0
/// holds the scheduler's wake event. Fired slots are removed by swapping with
/// the last one, so a slot index is only meaningful for a single wait.
pub(crate) struct EventWaiter {
    handle: Handle,
    signals: Vec<Arc<dyn Signal>>,
    waiting: Vec<Option<Waiting>>,
    capacity: usize,
    timeout: PollTimeout,
}

impl EventWaiter {
    pub(crate) fn new(handle: Handle) -> Self {
        let capacity = handle.0.cfg.wait_set_capacity;
        let timeout = poll_timeout(handle.0.cfg.event_wait_timeout);

        let mut signals: Vec<Arc<dyn Signal>> = Vec::with_capacity(capacity);
        signals.push(handle.0.wake.clone());

        let mut waiting = Vec::with_capacity(capacity);
        waiting.push(None);

        Self {
            handle,
            signals,
            waiting,
            capacity,
            timeout,
        }
    }

    /// Number of adopted registrations.
    fn len(&self) -> usize {
        self.signals.len() - 1
    }

    fn is_full(&self) -> bool {
        self.signals.len() >= self.capacity
    }

    /// Event loop, runs until shutdown or until the OS wait fails.
    pub(crate) fn run(mut self) -> Result<(), SchedulerError> {
        context::init_runtime_context(self.handle.clone(), None);
        tracing::debug!(capacity = self.capacity, "event waiter started");

        // Registrations made before the thread started.
        self.adopt();

        while !self.handle.is_shutting_down() {
            self.step()?;
        }

        self.reject_all();
        tracing::debug!("event waiter stopped");
        Ok(())
    }

    /// Waits once, handles the lowest fired slot, then adopts pending
    /// registrations.
    fn step(&mut self) -> Result<(), SchedulerError> {
        match self.wait() {
            Ok(Wakeup::Timeout) => {}
            Ok(Wakeup::Ready { slot: WAKE_SLOT, .. }) => self.acknowledge(WAKE_SLOT),
            Ok(Wakeup::Ready { slot, revents }) if revents.contains(PollFlags::POLLIN) => {
                self.fire(slot)
            }
            Ok(Wakeup::Ready { slot, revents }) => self.abandon(slot, revents),
            Err(errno) => return Err(self.fail(errno)),
        }

        self.adopt();
        Ok(())
    }

    fn wait(&self) -> nix::Result<Wakeup> {
        let mut fds: PollFds<'_> = self
            .signals
            .iter()
            .map(|signal| PollFd::new(signal.as_fd(), PollFlags::POLLIN))
            .collect();

        match poll(&mut fds, self.timeout) {
            Ok(0) | Err(Errno::EINTR) => Ok(Wakeup::Timeout),
            Ok(_) => Ok(fds
                .iter()
                .enumerate()
                .find_map(|(slot, fd)| {
                    fd.revents()
                        .filter(|revents| !revents.is_empty())
                        .map(|revents| Wakeup::Ready { slot, revents })
                })
                .unwrap_or(Wakeup::Timeout)),
            Err(errno) => Err(errno),
        }
    }

    fn acknowledge(&self, slot: usize) {
        if let Err(err) = self.signals[slot].acknowledge() {
            tracing::warn!(slot, error = %err, "failed to acknowledge signal");
        }
    }

    /// Swap-removes `slot` from both vectors.
    fn remove(&mut self, slot: usize) -> Option<Waiting> {
        debug_assert_ne!(slot, WAKE_SLOT);

        self.signals.swap_remove(slot);
        self.waiting.swap_remove(slot)
    }

    fn fire(&mut self, slot: usize) {
        self.acknowledge(slot);
        tracing::trace!(slot, "signal fired");

        if let Some(waiting) = self.remove(slot) {
            let _ = self
                .handle
                .schedule(waiting.continuation, waiting.mask, waiting.priority);
        }
    }

    /// The handle hung up or is invalid, it will never fire. The
    /// continuation still goes through a worker queue.
    fn abandon(&mut self, slot: usize, revents: PollFlags) {
        tracing::debug!(slot, ?revents, "signal abandoned");

        if let Some(waiting) = self.remove(slot) {
            waiting.continuation.resolve(WakeReason::Abandoned);
            let _ = self
                .handle
                .schedule(waiting.continuation, waiting.mask, waiting.priority);
        }
    }

    /// Drops registrations whose waiting future went away.
    fn prune(&mut self) {
        let before = self.len();

        // Descending, a swapped-in slot was already checked.
        for slot in (WAKE_SLOT + 1..self.signals.len()).rev() {
            if self.waiting[slot]
                .as_ref()
                .is_some_and(|w| w.continuation.is_retracted())
            {
                self.remove(slot);
            }
        }

        if self.len() < before {
            tracing::trace!(pruned = before - self.len(), "pruned dropped registrations");
        }
    }

    /// Moves pending registrations into the wait set, up to its capacity.
    fn adopt(&mut self) {
        self.prune();
        let mut adopted = 0;

        while !self.is_full() {
            let Some(registration) = self.handle.pop_pending() else {
                break;
            };

            if registration.continuation.is_retracted() {
                continue;
            }

            self.signals.push(registration.signal);
            self.waiting.push(Some(Waiting {
                continuation: registration.continuation,
                mask: registration.mask,
                priority: registration.priority,
            }));
            adopted += 1;
        }

        if adopted > 0 {
            tracing::trace!(adopted, waiting = self.len(), "adopted registrations");
        }
    }

    /// The OS wait failed: every registration is abandoned and later ones
    /// are rejected.
    fn fail(&mut self, errno: Errno) -> SchedulerError {
        let err = SchedulerError::WaitFailure(io::Error::from(errno));
        tracing::error!(
            error = %err,
            errno = ?err.raw_os_error(),
            waiting = self.len(),
            "event waiter failed, abandoning all registrations"
        );

        self.handle.mark_waiter_stopped();

        while self.len() > 0 {
            let last = self.signals.len() - 1;
            self.abandon(last, PollFlags::empty());
        }

        self.handle.reject_pending();
        err
    }

    fn reject_all(&mut self) {
        while self.len() > 0 {
            let last = self.signals.len() - 1;
            if let Some(waiting) = self.remove(last) {
                self.handle.reject(waiting.continuation);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{Event, ResetMode, RuntimeConfig, WaitFor};
    use crate::task::WakeOutcome;
    use crate::test_utils::{CountingWaker, PipeSignal, RecordingWaker, test_config, unstarted_scheduler};
    use crate::utils::scheduler::{Call, Method};
    use anyhow::Result;
    use std::future::Future;
    use std::pin::Pin;
    use std::task::Context;

    const MAX_STEPS: usize = 100;

    fn scheduler(wait_set_capacity: usize) -> Result<Handle> {
        unstarted_scheduler(RuntimeConfig {
            wait_set_capacity,
            ..test_config(2)
        })
    }

    fn queued(handle: &Handle) -> Vec<Continuation> {
        (0..handle.num_workers())
            .flat_map(|i| handle.queue(i).drain())
            .collect()
    }

    /// Steps until something lands on a worker queue.
    fn step_until_queued(waiter: &mut EventWaiter) -> Result<Vec<Continuation>> {
        for _ in 0..MAX_STEPS {
            waiter.step()?;

            let queued = queued(&waiter.handle);
            if !queued.is_empty() {
                return Ok(queued);
            }
        }

        panic!("no continuation was scheduled after {MAX_STEPS} steps");
    }

    fn register(handle: &Handle, signal: Arc<dyn Signal>) -> Result<Arc<WakeOutcome>> {
        let outcome = WakeOutcome::new();
        let (waker, _) = CountingWaker::new();

        handle.schedule_on_signal(
            Continuation::with_outcome(waker, Arc::clone(&outcome)),
            signal,
            None,
            Priority::NORMAL,
        )?;

        Ok(outcome)
    }

    #[test]
    fn test_fired_signal_is_scheduled_on_masked_queue() -> Result<()> {
        let handle = scheduler(4)?;
        let (signal, mut writer) = PipeSignal::new()?;
        let log = RecordingWaker::log();

        handle.schedule_on_signal(
            Continuation::new(RecordingWaker::waker(&log, 1)),
            signal,
            Some(CpuMask::single(1)),
            Priority::HIGH,
        )?;

        let mut waiter = EventWaiter::new(handle.clone());
        waiter.adopt();
        assert_eq!(waiter.len(), 1);

        PipeSignal::fire(&mut writer)?;

        for _ in 0..MAX_STEPS {
            if waiter.len() == 0 {
                break;
            }
            waiter.step()?;
        }

        assert_eq!(waiter.len(), 0);
        assert!(handle.queue(0).is_idle());
        assert_eq!(
            handle.0.tracker.get_calls(&Method::Schedule),
            vec![Call::Schedule {
                queue: 1,
                priority: Priority::HIGH
            }]
        );

        handle.queue(1).drain().into_iter().for_each(Continuation::resume);
        assert_eq!(RecordingWaker::entries(&log), vec![1]);
        Ok(())
    }

    #[test]
    fn test_hung_up_signal_is_abandoned() -> Result<()> {
        let handle = scheduler(4)?;
        let (signal, writer) = PipeSignal::new()?;
        let outcome = register(&handle, signal)?;

        let mut waiter = EventWaiter::new(handle.clone());
        waiter.adopt();
        drop(writer);

        let queued = step_until_queued(&mut waiter)?;
        assert_eq!(queued.len(), 1);
        assert_eq!(waiter.len(), 0);

        // Abandoned continuations still go through a worker queue, the reason
        // sticks when the worker resumes them.
        assert_eq!(outcome.get(), WakeReason::Abandoned);
        queued.into_iter().for_each(Continuation::resume);
        assert_eq!(outcome.get(), WakeReason::Abandoned);
        Ok(())
    }

    #[test]
    fn test_adoption_is_bounded_by_capacity() -> Result<()> {
        let handle = scheduler(4)?;

        let events = (0..5)
            .map(|_| Event::new(ResetMode::Manual).map(Arc::new))
            .collect::<io::Result<Vec<_>>>()?;

        for event in &events {
            register(&handle, Arc::clone(event) as Arc<dyn Signal>)?;
        }

        let mut waiter = EventWaiter::new(handle.clone());
        waiter.adopt();

        // Slot 0 is the wake event.
        assert_eq!(waiter.len(), 3);
        assert!(waiter.is_full());

        events[0].set()?;
        assert_eq!(step_until_queued(&mut waiter)?.len(), 1);

        // The freed slot was handed to the next pending registration.
        assert_eq!(waiter.len(), 3);
        assert_eq!(std::iter::from_fn(|| handle.pop_pending()).count(), 1);
        Ok(())
    }

    /// Polls a fresh `wait_for` once, outside of any task, so its
    /// registration is pushed right away.
    fn start_wait(handle: &Handle, signal: Arc<dyn Signal>) -> WaitFor {
        let mut wait = handle.wait_for(signal, None, Priority::NORMAL);
        let mut cx = Context::from_waker(futures::task::noop_waker_ref());

        assert!(Pin::new(&mut wait).poll(&mut cx).is_pending());
        wait
    }

    #[test]
    fn test_dropped_wait_frees_its_slot() -> Result<()> {
        let handle = scheduler(2)?;
        let first = Arc::new(Event::new(ResetMode::Manual)?);
        let second = Arc::new(Event::new(ResetMode::Manual)?);

        let wait = start_wait(&handle, first);
        let outcome = register(&handle, Arc::clone(&second) as Arc<dyn Signal>)?;

        let mut waiter = EventWaiter::new(handle.clone());
        waiter.adopt();
        assert_eq!(waiter.len(), 1);
        assert!(waiter.is_full());

        drop(wait);
        waiter.adopt();

        // The second registration took over the only slot.
        assert_eq!(waiter.len(), 1);
        assert!(handle.pop_pending().is_none());

        second.set()?;
        let queued = step_until_queued(&mut waiter)?;
        assert_eq!(queued.len(), 1);

        queued.into_iter().for_each(Continuation::resume);
        assert_eq!(outcome.get(), WakeReason::Resumed);
        Ok(())
    }

    #[test]
    fn test_dropped_wait_is_never_adopted() -> Result<()> {
        let handle = scheduler(4)?;
        let event = Arc::new(Event::new(ResetMode::Manual)?);

        drop(start_wait(&handle, Arc::clone(&event) as Arc<dyn Signal>));

        let mut waiter = EventWaiter::new(handle.clone());
        waiter.adopt();
        assert_eq!(waiter.len(), 0);
        assert!(handle.pop_pending().is_none());
        Ok(())
    }

    #[test]
    fn test_swap_remove_keeps_other_registrations() -> Result<()> {
        let handle = scheduler(8)?;
        let log = RecordingWaker::log();

        let events = (0..3)
            .map(|_| Event::new(ResetMode::Auto).map(Arc::new))
            .collect::<io::Result<Vec<_>>>()?;

        for (tag, event) in events.iter().enumerate() {
            handle.schedule_on_signal(
                Continuation::new(RecordingWaker::waker(&log, tag)),
                Arc::clone(event) as Arc<dyn Signal>,
                None,
                Priority::NORMAL,
            )?;
        }

        let mut waiter = EventWaiter::new(handle.clone());
        waiter.adopt();

        for tag in [1, 0, 2] {
            events[tag].set()?;
            step_until_queued(&mut waiter)?
                .into_iter()
                .for_each(Continuation::resume);
        }

        assert_eq!(RecordingWaker::entries(&log), vec![1, 0, 2]);
        assert_eq!(waiter.len(), 0);
        Ok(())
    }

    #[test]
    fn test_wait_failure_abandons_and_rejects() -> Result<()> {
        let handle = scheduler(2)?;

        let first = register(&handle, Arc::new(Event::new(ResetMode::Manual)?))?;
        let second = register(&handle, Arc::new(Event::new(ResetMode::Manual)?))?;

        let mut waiter = EventWaiter::new(handle.clone());
        waiter.adopt();
        assert_eq!(waiter.len(), 1);

        let err = waiter.fail(Errno::ENOMEM);
        assert_eq!(err.raw_os_error(), Some(libc::ENOMEM));
        assert!(err.is_fatal());
        assert!(handle.is_waiter_stopped());

        // Adopted one is abandoned through a worker queue, the pending one is
        // rejected outright.
        assert_eq!(first.get(), WakeReason::Abandoned);
        assert_eq!(queued(&handle).len(), 1);
        assert_eq!(second.get(), WakeReason::Rejected);

        let err = register(&handle, Arc::new(Event::new(ResetMode::Manual)?)).unwrap_err();
        assert_eq!(
            err.downcast_ref::<SchedulerError>(),
            Some(&SchedulerError::EventWaiterStopped)
        );

        // Plain scheduling keeps working.
        let (waker, counter) = CountingWaker::new();
        handle.schedule(Continuation::new(waker), None, Priority::NORMAL)?;
        queued(&handle).into_iter().for_each(Continuation::resume);
        assert_eq!(counter.count(), 1);
        Ok(())
    }

    #[test]
    fn test_shutdown_rejects_waiting_registrations() -> Result<()> {
        let handle = scheduler(4)?;
        handle.start_event_waiter()?;

        let outcomes = (0..3)
            .map(|_| register(&handle, Arc::new(Event::new(ResetMode::Manual)?)))
            .collect::<Result<Vec<_>>>()?;

        handle.shutdown()?;

        for outcome in outcomes {
            assert_eq!(outcome.get(), WakeReason::Rejected);
        }
        assert_eq!(handle.0.tracker.num_calls(&Method::Reject), 3);
        Ok(())
    }
}
