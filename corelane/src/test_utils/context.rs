use crate::runtime::{Builder, Handle, Runtime, RuntimeConfig, Scheduler};
use anyhow::Result;
use std::time::Duration;

/// Short event waiter timeout so shutdown and wait-failure paths stay fast.
const TEST_EVENT_WAIT_TIMEOUT: Duration = Duration::from_millis(20);

/// Unpinned runtime, CI machines often restrict the affinity mask.
pub(crate) fn test_runtime(worker_threads: usize) -> Result<Runtime> {
    Builder::new()
        .worker_threads(worker_threads)
        .pin_workers(false)
        .event_wait_timeout(TEST_EVENT_WAIT_TIMEOUT)
        .try_build()
}

pub(crate) fn test_config(worker_threads: usize) -> RuntimeConfig {
    RuntimeConfig {
        worker_threads,
        event_wait_timeout: TEST_EVENT_WAIT_TIMEOUT,
        ..RuntimeConfig::default()
    }
}

/// Scheduler with no thread started, callers start workers and the event
/// waiter when they need them.
pub(crate) fn unstarted_scheduler(cfg: RuntimeConfig) -> Result<Handle> {
    Ok(Scheduler::try_new(cfg)?.into_handle())
}
