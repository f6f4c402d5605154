use std::time::{Duration, Instant};

// Exports
mod context;
pub(crate) use context::{test_config, test_runtime, unstarted_scheduler};

pub(crate) mod future;
pub(crate) use future::{Gate, PipeSignal};

pub(crate) mod mocks;
pub(crate) use mocks::{CountingWaker, RecordingWaker};

/// Generous upper bound for conditions reached asynchronously by runtime
/// threads.
pub(crate) const SPIN_DEADLINE: Duration = Duration::from_secs(10);

/// Spins until `cond` holds, panicking after [`SPIN_DEADLINE`].
#[track_caller]
pub(crate) fn spin_until(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + SPIN_DEADLINE;

    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        std::thread::sleep(Duration::from_millis(1));
    }
}
