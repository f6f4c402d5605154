use crate::cancel::{CancellationState, OperationCancelled};
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Write side of a cancellation state.
///
/// Cloning a source shares the same state. A source built with
/// [`CancellationSource::none`] has no state at all: it can never be
/// cancelled and linking to it is a no-op. [`Default`] builds a regular
/// source, like [`CancellationSource::new`].
#[derive(Clone)]
pub struct CancellationSource {
    state: Option<Arc<CancellationState>>,
}

impl CancellationSource {
    /// Creates a source with a fresh, not cancelled state.
    pub fn new() -> Self {
        Self {
            state: Some(CancellationState::new()),
        }
    }

    /// The "null" source. It cannot be cancelled.
    pub fn none() -> Self {
        Self { state: None }
    }

    /// Creates a source which is cancelled whenever any of `sources` is
    /// cancelled. Cancelling the returned source does not affect `sources`.
    ///
    /// Null sources are skipped. If one of the sources is already cancelled,
    /// the new source starts cancelled.
    ///
    /// ```
    /// use corelane::cancel::CancellationSource;
    ///
    /// let parent = CancellationSource::new();
    /// let child = CancellationSource::linked(&[&parent, &CancellationSource::none()]);
    ///
    /// parent.cancel();
    /// assert!(child.is_cancel_requested());
    /// ```
    pub fn linked(sources: &[&CancellationSource]) -> Self {
        let upstream = sources.iter().filter_map(|source| source.state.as_ref());

        Self {
            state: Some(CancellationState::new_linked(upstream)),
        }
    }

    /// Returns a read-only handle to this source's state.
    pub fn token(&self) -> CancellationToken {
        CancellationToken {
            state: self.state.clone(),
        }
    }

    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        if let Some(state) = &self.state {
            state.cancel();
        }
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.state.as_ref().is_some_and(|s| s.is_cancelled())
    }

    /// False for the null source.
    pub fn can_be_cancelled(&self) -> bool {
        self.state.is_some()
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> Option<&Arc<CancellationState>> {
        self.state.as_ref()
    }
}

impl Default for CancellationSource {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancellationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationSource")
            .field("can_be_cancelled", &self.can_be_cancelled())
            .field("is_cancel_requested", &self.is_cancel_requested())
            .finish()
    }
}

/// Read side of a cancellation state. Task bodies poll it, the runtime never
/// injects cancellation into running or queued work.
#[derive(Clone, Default)]
pub struct CancellationToken {
    state: Option<Arc<CancellationState>>,
}

impl CancellationToken {
    /// A token which is never cancelled.
    pub fn none() -> Self {
        Self { state: None }
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.state.as_ref().is_some_and(|s| s.is_cancelled())
    }

    /// Fails with [`OperationCancelled`] if cancellation was requested.
    ///
    /// ```
    /// use corelane::cancel::CancellationSource;
    ///
    /// let source = CancellationSource::new();
    /// let token = source.token();
    /// assert!(token.throw_if_cancel_requested().is_ok());
    ///
    /// source.cancel();
    /// assert!(token.throw_if_cancel_requested().is_err());
    /// ```
    pub fn throw_if_cancel_requested(&self) -> Result<(), OperationCancelled> {
        if self.is_cancel_requested() {
            Err(OperationCancelled)
        } else {
            Ok(())
        }
    }

    /// Blocks the calling thread until cancellation is requested.
    ///
    /// Waiting on a token that cannot be cancelled blocks forever.
    pub fn wait(&self) {
        match &self.state {
            Some(state) => state.wait(),
            None => {
                tracing::warn!("waiting on a token which can never be cancelled");
                loop {
                    thread::park();
                }
            }
        }
    }

    /// Blocks until cancellation is requested or `timeout` elapsed. Returns
    /// whether cancellation occurred.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        match &self.state {
            Some(state) => state.wait_timeout(timeout),
            None => {
                thread::sleep(timeout);
                false
            }
        }
    }

    /// False for tokens of the null source.
    pub fn can_be_cancelled(&self) -> bool {
        self.state.is_some()
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("can_be_cancelled", &self.can_be_cancelled())
            .field("is_cancel_requested", &self.is_cancel_requested())
            .finish()
    }
}
