use crate::runtime::Priority;
use crate::sync::Semaphore;
use crate::task::Continuation;
use crossbeam_queue::SegQueue;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};

/// Work queue serviced by a single worker thread.
///
/// Holds one FIFO per priority level. The semaphore counts items across all
/// FIFOs: every push releases exactly one permit and the worker takes one
/// permit per item it pops, so a continuation which re-enqueues itself on its
/// own queue always finds a permit waiting on the next iteration.
#[derive(Debug)]
pub(crate) struct WorkerQueue {
    index: usize,
    fifos: Box<[SegQueue<Continuation>]>,
    signal: Semaphore,
    shutdown: AtomicBool,
}

impl WorkerQueue {
    pub(crate) fn new(index: usize, priority_levels: usize) -> Self {
        Self {
            index,
            fifos: (0..priority_levels).map(|_| SegQueue::new()).collect(),
            signal: Semaphore::new(0),
            shutdown: AtomicBool::new(false),
        }
    }

    pub(crate) fn push(&self, continuation: Continuation, priority: Priority) {
        let level = priority.level(self.fifos.len());

        // The item must be visible before its permit.
        self.fifos[level].push(continuation);
        self.signal.release(1);
    }

    /// Approximate number of queued items.
    pub(crate) fn len(&self) -> usize {
        self.fifos.iter().map(SegQueue::len).sum()
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.fifos.iter().all(SegQueue::is_empty)
    }

    /// Pops from the highest non-empty priority level.
    fn pop(&self) -> Option<Continuation> {
        self.fifos.iter().rev().find_map(SegQueue::pop)
    }

    /// Removes everything still queued, highest priority first.
    pub(crate) fn drain(&self) -> Vec<Continuation> {
        std::iter::from_fn(|| self.pop()).collect()
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Asks the worker to exit. Items still queued are left in place.
    pub(crate) fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.signal.release(1);
    }

    /// Worker loop, runs until [`shutdown`](Self::shutdown) is called.
    pub(crate) fn run(&self) {
        loop {
            self.signal.acquire();

            if self.is_shutdown() {
                break;
            }

            let Some(continuation) = self.pop() else {
                // Items can be stolen back by a shutdown drain.
                tracing::trace!(queue = self.index, "woke up to an empty queue");
                continue;
            };

            tracing::trace!(queue = self.index, ?continuation, "resuming continuation");

            // Task bodies catch their own panics, this only trips on foreign
            // wakers.
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| continuation.resume())) {
                let msg = crate::task::panic_payload_as_str(&payload);
                tracing::error!(queue = self.index, panic = msg, "continuation panicked on resume");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::RecordingWaker;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_higher_priority_first_then_fifo() {
        let queue = WorkerQueue::new(0, 3);
        let log = RecordingWaker::log();

        for (tag, priority) in [
            (1, Priority::LOW),
            (2, Priority::NORMAL),
            (3, Priority::HIGH),
            (4, Priority::NORMAL),
            (5, Priority::new(9)),
        ] {
            queue.push(Continuation::new(RecordingWaker::waker(&log, tag)), priority);
        }

        assert_eq!(queue.len(), 5);
        queue.drain().into_iter().for_each(Continuation::resume);

        assert_eq!(RecordingWaker::entries(&log), vec![3, 5, 2, 4, 1]);
        assert!(queue.is_idle());
    }

    #[test]
    fn test_worker_runs_until_shutdown() {
        let queue = Arc::new(WorkerQueue::new(0, 2));
        let log = RecordingWaker::log();

        let worker = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.run())
        };

        for tag in 0..16 {
            queue.push(Continuation::new(RecordingWaker::waker(&log, tag)), Priority::LOW);
        }

        crate::test_utils::spin_until(|| RecordingWaker::entries(&log).len() == 16);
        queue.shutdown();
        worker.join().unwrap();

        assert!(queue.is_shutdown());
        assert_eq!(RecordingWaker::entries(&log), (0..16).collect::<Vec<_>>());
    }

    #[test]
    fn test_items_left_after_shutdown_are_drained() {
        let queue = WorkerQueue::new(0, 1);
        let log = RecordingWaker::log();

        queue.shutdown();
        queue.push(Continuation::new(RecordingWaker::waker(&log, 7)), Priority::NORMAL);

        // The worker exits on the shutdown permit without touching the item.
        queue.run();

        let left = queue.drain();
        assert_eq!(left.len(), 1);
        assert!(RecordingWaker::entries(&log).is_empty());
    }
}
