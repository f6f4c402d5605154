use crate::context;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Wake, Waker};

/// Waker counting how many times it was woken.
#[derive(Debug, Default)]
pub(crate) struct CountingWaker {
    count: AtomicUsize,
}

impl CountingWaker {
    pub(crate) fn new() -> (Waker, Arc<CountingWaker>) {
        let data = Arc::new(CountingWaker::default());
        (Waker::from(Arc::clone(&data)), data)
    }

    pub(crate) fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }
}

impl Wake for CountingWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.count.fetch_add(1, Ordering::AcqRel);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Entry {
    pub(crate) tag: usize,
    pub(crate) worker: Option<usize>,
}

pub(crate) type Log = Arc<Mutex<Vec<Entry>>>;

/// Waker appending its tag, and the worker queue it was woken on, to a shared
/// log.
#[derive(Debug)]
pub(crate) struct RecordingWaker {
    tag: usize,
    log: Log,
}

impl RecordingWaker {
    pub(crate) fn log() -> Log {
        Arc::new(Mutex::new(Vec::new()))
    }

    pub(crate) fn waker(log: &Log, tag: usize) -> Waker {
        Waker::from(Arc::new(RecordingWaker {
            tag,
            log: Arc::clone(log),
        }))
    }

    pub(crate) fn entries(log: &Log) -> Vec<usize> {
        log.lock().iter().map(|entry| entry.tag).collect()
    }

    pub(crate) fn workers(log: &Log) -> Vec<Option<usize>> {
        log.lock().iter().map(|entry| entry.worker).collect()
    }
}

impl Wake for RecordingWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.log.lock().push(Entry {
            tag: self.tag,
            worker: context::current_worker(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counting_waker() {
        let (waker, counter) = CountingWaker::new();
        waker.wake_by_ref();

        let cloned = waker.clone();
        cloned.wake();
        assert_eq!(counter.count(), 2);

        drop(waker);
        assert_eq!(counter.count(), 2);
    }

    #[test]
    fn test_recording_waker() {
        let log = RecordingWaker::log();

        RecordingWaker::waker(&log, 2).wake();
        RecordingWaker::waker(&log, 1).wake_by_ref();

        assert_eq!(RecordingWaker::entries(&log), vec![2, 1]);
        assert_eq!(RecordingWaker::workers(&log), vec![None, None]);
    }
}
