use crate::runtime::{CpuMask, Handle, Scheduler, SchedulerError};
use crate::task::{self, Task};
use anyhow::Result;
use std::convert::TryFrom;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::Duration;

/// Default number of priority levels: `LOW`, `NORMAL` and `HIGH`.
const PRIORITY_LEVELS: usize = 3;

/// Upper bound on priority levels, each level is one FIFO per worker.
const MAX_PRIORITY_LEVELS: usize = 16;

/// Wait set size of the event waiter, slot 0 included. Matches the width of
/// the affinity mask.
const WAIT_SET_CAPACITY: usize = 64;

/// How long the event waiter blocks in a single `poll(2)` call.
const EVENT_WAIT_TIMEOUT: Duration = Duration::from_millis(500);

/// `poll(2)` timeouts are passed in milliseconds as a `u16`.
const MAX_EVENT_WAIT_TIMEOUT: Duration = Duration::from_millis(u16::MAX as u64);

#[derive(Clone)]
pub(crate) struct ThreadNameFn(pub(crate) Arc<dyn Fn() -> String + Send + Sync + 'static>);

fn default_thread_name_fn() -> ThreadNameFn {
    let worker_count = Arc::new(AtomicUsize::new(0));

    ThreadNameFn(Arc::new(move || {
        let id = worker_count.fetch_add(1, Ordering::Relaxed);
        format!("corelane-{}", id)
    }))
}

impl fmt::Debug for ThreadNameFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ThreadNameFn").field(&"<function>").finish()
    }
}

/// Configures and starts a [`Runtime`].
///
/// ```
/// use corelane::runtime::Builder;
///
/// let rt = Builder::new().worker_threads(2).try_build()?;
/// assert_eq!(rt.block_on(async { 1 + 1 }), 2);
/// # Ok::<(), anyhow::Error>(())
/// ```
#[derive(Debug)]
pub struct Builder {
    /// Number of worker queues, one thread each. Defaults to one per logical
    /// CPU the process may run on, capped at [`CpuMask::MAX_CPUS`].
    worker_threads: Option<usize>,

    /// Name fn used for worker threads.
    thread_name: ThreadNameFn,

    /// Stack size used for worker threads.
    thread_stack_size: Option<usize>,

    /// Number of priority FIFOs per worker queue.
    priority_levels: usize,

    /// Maximum number of handles the event waiter waits on at once, its
    /// internal wake event included.
    wait_set_capacity: usize,

    /// Upper bound on a single blocking wait of the event waiter. Registrations
    /// and shutdown requests are also checked on every timeout.
    event_wait_timeout: Duration,

    /// Pin each worker thread to one logical CPU.
    pin_workers: bool,
}

impl Builder {
    pub fn new() -> Self {
        Self {
            worker_threads: None,
            thread_name: default_thread_name_fn(),
            thread_stack_size: None,
            priority_levels: PRIORITY_LEVELS,
            wait_set_capacity: WAIT_SET_CAPACITY,
            event_wait_timeout: EVENT_WAIT_TIMEOUT,
            pin_workers: true,
        }
    }

    /// The number of worker threads, each servicing its own queue.
    ///
    /// Defaults to 1 worker per logical CPU.
    #[track_caller]
    pub fn worker_threads(mut self, val: usize) -> Self {
        assert!(val > 0, "worker_threads must be greater than 0");
        self.worker_threads = Some(val);
        self
    }

    /// Sets name of threads spawned by the `Runtime`'s thread pool.
    ///
    /// The default name is "corelane-{id}", where id is the worker queue
    /// index.
    ///
    /// Thread names are truncated beyond 15 bytes according to pthread
    /// limitations.
    pub fn thread_name(mut self, val: impl Into<String>) -> Self {
        let val = val.into();
        self.thread_name = ThreadNameFn(Arc::new(move || val.clone()));
        self
    }

    /// Sets a function used to generate the name of threads spawned by the
    /// `Runtime`'s thread pool.
    pub fn thread_name_fn<F>(mut self, f: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.thread_name = ThreadNameFn(Arc::new(f));
        self
    }

    /// Sets the stack size (in bytes) for worker threads.
    ///
    /// The actual stack size may be greater than this value if the platform
    /// specifies minimal stack size.
    #[track_caller]
    pub fn thread_stack_size(mut self, val: usize) -> Self {
        assert!(
            val.is_power_of_two(),
            "thread_stack_size must be a power of two"
        );
        self.thread_stack_size = Some(val);
        self
    }

    #[track_caller]
    pub fn priority_levels(mut self, val: usize) -> Self {
        assert!(val > 0, "priority_levels must be greater than 0");
        self.priority_levels = val;
        self
    }

    /// Slot 0 of the wait set is reserved, so at least 2 are needed to wait
    /// on anything.
    #[track_caller]
    pub fn wait_set_capacity(mut self, val: usize) -> Self {
        assert!(val > 1, "wait_set_capacity must be greater than 1");
        self.wait_set_capacity = val;
        self
    }

    #[track_caller]
    pub fn event_wait_timeout(mut self, val: Duration) -> Self {
        assert!(!val.is_zero(), "event_wait_timeout must be greater than 0");
        self.event_wait_timeout = val;
        self
    }

    /// Whether worker threads are pinned to a logical CPU. Enabled by default.
    /// A worker that fails to pin logs a warning and keeps running unpinned.
    pub fn pin_workers(mut self, val: bool) -> Self {
        self.pin_workers = val;
        self
    }

    /// Creates the configured `Runtime`, with all its threads started.
    pub fn try_build(self) -> Result<Runtime> {
        let cfg = RuntimeConfig::try_from(self)?;
        let handle = Scheduler::try_new(cfg)?.into_handle();

        if let Err(err) = handle.start() {
            // Tear down whatever was started before the failure.
            if let Err(shutdown_err) = handle.shutdown() {
                tracing::error!(error = %shutdown_err, "failed to tear down partially started runtime");
            }
            return Err(err);
        }

        tracing::debug!(workers = handle.num_workers(), "runtime started");
        Ok(Runtime { handle })
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

/// Multi-threaded runtime: a pool of worker threads, one per queue, plus an
/// event waiter thread.
///
/// Dropping the runtime shuts it down and blocks until all of its threads
/// exited.
#[derive(Debug)]
pub struct Runtime {
    handle: Handle,
}

static GLOBAL: OnceLock<Runtime> = OnceLock::new();

impl Runtime {
    /// Starts a runtime with the default configuration.
    pub fn new() -> Result<Runtime> {
        Builder::new().try_build()
    }

    /// Process-wide default runtime, started on first use and never shut
    /// down.
    ///
    /// # Panics
    ///
    /// Panics if the default runtime fails to start.
    pub fn global() -> &'static Runtime {
        GLOBAL.get_or_init(|| {
            Runtime::new()
                .unwrap_or_else(|err| panic!("failed to start the default runtime: {err:#}"))
        })
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Starts a task whose body runs on one of this runtime's workers.
    pub fn spawn<F>(&self, future: F) -> Task<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }

    /// Runs `future` to completion on this runtime's workers, blocking the
    /// calling thread until it is done.
    ///
    /// # Panics
    ///
    /// Panics with the same message if `future` panicked. Also panics (in
    /// debug builds) when called from a worker thread.
    #[track_caller]
    pub fn block_on<F>(&self, future: F) -> F::Output
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let handle = self.handle.clone();

        let root = task::spawn_joinable(async move {
            if let Err(err) = handle.yield_now().await {
                tracing::debug!(error = %err, "root future runs off the runtime");
            }
            future.await
        });

        match root.join() {
            Ok(output) => output,
            Err(err) => panic!("{}", err.panic_message().unwrap_or("root future failed")),
        }
    }

    /// Shuts the runtime down.
    ///
    /// The event waiter stops first: pending and waiting signal registrations
    /// are rejected. Then each worker finishes the continuation it is running
    /// and exits. Continuations still queued are rejected, their suspension
    /// points return [`SchedulerError::ShuttingDown`].
    pub fn shutdown(self) {
        // Drop does the work.
    }

    fn shutdown_inner(&self) {
        if let Err(e) = self.handle.shutdown() {
            tracing::error!(error = %e, "error during runtime shutdown");
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.shutdown_inner();
    }
}

// Export runtime builder as a RuntimeConfig object consumed by the scheduler.
#[derive(Debug, Clone)]
pub(crate) struct RuntimeConfig {
    pub(crate) worker_threads: usize,
    pub(crate) thread_name: ThreadNameFn,
    pub(crate) thread_stack_size: Option<usize>,
    pub(crate) priority_levels: usize,
    pub(crate) wait_set_capacity: usize,
    pub(crate) event_wait_timeout: Duration,
    pub(crate) pin_workers: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            worker_threads: 1,
            thread_name: default_thread_name_fn(),
            thread_stack_size: None,
            priority_levels: PRIORITY_LEVELS,
            wait_set_capacity: WAIT_SET_CAPACITY,
            event_wait_timeout: EVENT_WAIT_TIMEOUT,
            pin_workers: false,
        }
    }
}

impl RuntimeConfig {
    fn validate(&self) -> Result<(), SchedulerError> {
        let invalid = |msg: String| Err(SchedulerError::InvalidConfig(msg));

        if self.worker_threads == 0 || self.worker_threads > CpuMask::MAX_CPUS {
            return invalid(format!(
                "worker_threads must be in 1..={}, got {}",
                CpuMask::MAX_CPUS,
                self.worker_threads
            ));
        }

        if self.priority_levels == 0 || self.priority_levels > MAX_PRIORITY_LEVELS {
            return invalid(format!(
                "priority_levels must be in 1..={MAX_PRIORITY_LEVELS}, got {}",
                self.priority_levels
            ));
        }

        if !(2..=WAIT_SET_CAPACITY).contains(&self.wait_set_capacity) {
            return invalid(format!(
                "wait_set_capacity must be in 2..={WAIT_SET_CAPACITY}, got {}",
                self.wait_set_capacity
            ));
        }

        if self.event_wait_timeout.is_zero() || self.event_wait_timeout > MAX_EVENT_WAIT_TIMEOUT {
            return invalid(format!(
                "event_wait_timeout must be in (0, {MAX_EVENT_WAIT_TIMEOUT:?}], got {:?}",
                self.event_wait_timeout
            ));
        }

        Ok(())
    }
}

impl TryFrom<Builder> for RuntimeConfig {
    type Error = anyhow::Error;

    fn try_from(builder: Builder) -> Result<Self, Self::Error> {
        let worker_threads = match builder.worker_threads {
            Some(n) => n,
            None => thread::available_parallelism()?
                .get()
                .min(CpuMask::MAX_CPUS),
        };

        let cfg = RuntimeConfig {
            worker_threads,
            thread_name: builder.thread_name,
            thread_stack_size: builder.thread_stack_size,
            priority_levels: builder.priority_levels,
            wait_set_capacity: builder.wait_set_capacity,
            event_wait_timeout: builder.event_wait_timeout,
            pin_workers: builder.pin_workers,
        };

        cfg.validate()?;

        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use static_assertions::assert_impl_all;

    assert_impl_all!(RuntimeConfig: Send, Sync, Clone);
    assert_impl_all!(Runtime: Send, Sync);

    #[rstest]
    #[case::too_many_workers(Builder::new().worker_threads(65), "worker_threads")]
    #[case::too_many_levels(Builder::new().priority_levels(17), "priority_levels")]
    #[case::wait_set_too_large(Builder::new().wait_set_capacity(65), "wait_set_capacity")]
    #[case::timeout_too_long(
        Builder::new().event_wait_timeout(Duration::from_secs(120)),
        "event_wait_timeout"
    )]
    fn test_invalid_config(#[case] builder: Builder, #[case] field: &str) {
        let err = RuntimeConfig::try_from(builder).unwrap_err();
        let err = err.downcast_ref::<SchedulerError>().unwrap();

        assert!(matches!(err, SchedulerError::InvalidConfig(msg) if msg.starts_with(field)));
    }

    #[test]
    fn test_default_config() {
        let cfg = RuntimeConfig::try_from(Builder::new()).unwrap();

        assert!(cfg.worker_threads >= 1 && cfg.worker_threads <= CpuMask::MAX_CPUS);
        assert_eq!(cfg.priority_levels, PRIORITY_LEVELS);
        assert_eq!(cfg.wait_set_capacity, WAIT_SET_CAPACITY);
        assert!(cfg.pin_workers);
    }

    #[test]
    fn test_default_thread_names() {
        let cfg = RuntimeConfig::default();
        let names = (0..3).map(|_| cfg.thread_name.0()).collect::<Vec<_>>();

        assert_eq!(names, vec!["corelane-0", "corelane-1", "corelane-2"]);
    }

    #[test]
    #[should_panic(expected = "worker_threads must be greater than 0")]
    fn test_zero_workers_panics() {
        let _ = Builder::new().worker_threads(0);
    }
}
