//! Waitable OS signal handles.
//!
//! The event waiter thread multiplexes [`Signal`]s with `poll(2)`: a signal is
//! "fired" when its descriptor becomes readable.

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use nix::sys::eventfd::{EfdFlags, EventFd};
use std::fmt;
use std::io;
use std::os::fd::{AsFd, BorrowedFd};
use std::time::{Duration, Instant};

/// An OS handle which becomes readable once signalled.
pub trait Signal: AsFd + Send + Sync + 'static {
    /// Called by the event waiter right after it observed the handle as
    /// readable, before the waiting continuation is resumed. Auto-reset
    /// handles consume their readiness here.
    fn acknowledge(&self) -> io::Result<()> {
        Ok(())
    }
}

/// What happens to an [`Event`] once a waiter observed it set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetMode {
    /// Stays set until [`Event::reset`] is called.
    Manual,

    /// Reset by the single wait that observes it.
    Auto,
}

/// Event object backed by an `eventfd`.
///
/// ```
/// use corelane::runtime::{Event, ResetMode};
/// use std::time::Duration;
///
/// let event = Event::new(ResetMode::Auto)?;
/// event.set()?;
///
/// assert!(event.wait_timeout(Duration::ZERO)?);
/// assert!(!event.is_set()?);
/// # Ok::<(), std::io::Error>(())
/// ```
pub struct Event {
    fd: EventFd,
    mode: ResetMode,
}

impl Event {
    pub fn new(mode: ResetMode) -> io::Result<Self> {
        let fd = EventFd::from_value_and_flags(0, EfdFlags::EFD_CLOEXEC | EfdFlags::EFD_NONBLOCK)?;
        Ok(Self { fd, mode })
    }

    pub fn mode(&self) -> ResetMode {
        self.mode
    }

    /// Sets the event. Setting an already set event has no further effect.
    pub fn set(&self) -> io::Result<()> {
        match self.fd.write(1) {
            Ok(_) => Ok(()),
            // Counter saturated, the event is set anyway.
            Err(Errno::EAGAIN) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Clears the event. Returns whether it was set.
    pub fn reset(&self) -> io::Result<bool> {
        match self.fd.read() {
            Ok(_) => Ok(true),
            Err(Errno::EAGAIN) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub fn is_set(&self) -> io::Result<bool> {
        readable_until(self.fd.as_fd(), Some(Instant::now()), MAX_POLL_SLICE)
    }

    /// Blocks the calling thread until the event is set or `timeout` elapsed.
    /// Returns whether the event was observed set. An auto-reset event is
    /// consumed by the wait that observes it.
    pub fn wait_timeout(&self, timeout: Duration) -> io::Result<bool> {
        self.wait_sliced(timeout, MAX_POLL_SLICE)
    }

    fn wait_sliced(&self, timeout: Duration, slice: Duration) -> io::Result<bool> {
        // Too far out to be represented, wait until set.
        let deadline = Instant::now().checked_add(timeout);

        loop {
            if !readable_until(self.fd.as_fd(), deadline, slice)? {
                return Ok(false);
            }

            match self.mode {
                ResetMode::Manual => return Ok(true),
                ResetMode::Auto if self.reset()? => return Ok(true),
                // Another waiter consumed it between the poll and the read.
                ResetMode::Auto => {}
            }
        }
    }
}

impl AsFd for Event {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl Signal for Event {
    fn acknowledge(&self) -> io::Result<()> {
        if self.mode == ResetMode::Auto {
            self.reset()?;
        }
        Ok(())
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("fd", &self.fd.as_fd())
            .field("mode", &self.mode)
            .finish()
    }
}

/// Longest wait a single `poll(2)` call can express.
const MAX_POLL_SLICE: Duration = Duration::from_millis(u16::MAX as u64);

/// Converts a wait duration into a `poll(2)` timeout, saturating at the
/// largest representable value.
pub(crate) fn poll_timeout(timeout: Duration) -> PollTimeout {
    // Round up so a sub-millisecond wait does not turn into a busy poll.
    let millis = timeout.as_micros().div_ceil(1000);
    PollTimeout::from(u16::try_from(millis).unwrap_or(u16::MAX))
}

/// Waits for `fd` to become readable until `deadline` (forever if `None`),
/// in `poll(2)` calls of at most `slice` each. Interrupted or expired slices
/// are retried with the time left.
fn readable_until(fd: BorrowedFd<'_>, deadline: Option<Instant>, slice: Duration) -> io::Result<bool> {
    let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];

    loop {
        let remaining = match deadline {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()),
            None => slice,
        };
        let last = deadline.is_some() && remaining <= slice;

        match poll(&mut fds, poll_timeout(remaining.min(slice))) {
            Ok(0) if last => return Ok(false),
            Ok(0) => continue,
            Ok(_) => {
                let revents = fds[0].revents().unwrap_or(PollFlags::empty());
                return Ok(revents.contains(PollFlags::POLLIN));
            }
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;
    use std::sync::Arc;
    use std::thread;

    assert_impl_all!(Event: Send, Sync, Signal);

    #[test]
    fn test_manual_reset_stays_set() -> io::Result<()> {
        let event = Event::new(ResetMode::Manual)?;
        assert!(!event.is_set()?);

        event.set()?;
        event.set()?;
        assert!(event.wait_timeout(Duration::ZERO)?);
        assert!(event.wait_timeout(Duration::ZERO)?);
        event.acknowledge()?;
        assert!(event.is_set()?);

        assert!(event.reset()?);
        assert!(!event.is_set()?);
        assert!(!event.reset()?);
        Ok(())
    }

    #[test]
    fn test_auto_reset_consumed_once() -> io::Result<()> {
        let event = Event::new(ResetMode::Auto)?;

        event.set()?;
        event.set()?;
        assert!(event.wait_timeout(Duration::ZERO)?);
        assert!(!event.wait_timeout(Duration::ZERO)?);

        event.set()?;
        event.acknowledge()?;
        assert!(!event.is_set()?);
        Ok(())
    }

    #[test]
    fn test_wait_timeout_elapses() -> io::Result<()> {
        let event = Event::new(ResetMode::Auto)?;
        let timeout = Duration::from_millis(30);

        let start = Instant::now();
        assert!(!event.wait_timeout(timeout)?);
        assert!(start.elapsed() >= timeout);
        Ok(())
    }

    #[test]
    fn test_set_from_other_thread() -> io::Result<()> {
        let event = Arc::new(Event::new(ResetMode::Auto)?);

        let setter = {
            let event = Arc::clone(&event);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                event.set()
            })
        };

        assert!(event.wait_timeout(Duration::from_secs(5))?);
        setter.join().unwrap()?;
        Ok(())
    }

    #[test]
    fn test_wait_longer_than_one_slice() -> io::Result<()> {
        const SLICE: Duration = Duration::from_millis(10);

        let event = Event::new(ResetMode::Manual)?;
        let timeout = Duration::from_millis(60);

        let start = Instant::now();
        assert!(!event.wait_sliced(timeout, SLICE)?);
        assert!(start.elapsed() >= timeout, "{:?}", start.elapsed());
        Ok(())
    }

    #[test]
    fn test_set_after_several_slices() -> io::Result<()> {
        const SLICE: Duration = Duration::from_millis(5);

        let event = Arc::new(Event::new(ResetMode::Auto)?);

        let setter = {
            let event = Arc::clone(&event);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(40));
                event.set()
            })
        };

        let start = Instant::now();
        assert!(event.wait_sliced(Duration::from_secs(5), SLICE)?);
        assert!(start.elapsed() >= Duration::from_millis(40));
        assert!(!event.is_set()?);

        setter.join().unwrap()?;
        Ok(())
    }

    #[test]
    fn test_unrepresentable_timeout_waits_until_set() -> io::Result<()> {
        let event = Event::new(ResetMode::Manual)?;
        event.set()?;

        assert!(event.wait_timeout(Duration::MAX)?);
        Ok(())
    }

    #[test]
    fn test_poll_timeout_rounds_up() {
        assert_eq!(poll_timeout(Duration::ZERO), PollTimeout::ZERO);
        assert_eq!(poll_timeout(Duration::from_micros(10)), PollTimeout::from(1u16));
        assert_eq!(poll_timeout(Duration::from_secs(3600)), PollTimeout::from(u16::MAX));
    }
}
