use crate::runtime::Signal;
use crate::task::Continuation;
use parking_lot::Mutex;
use std::future::Future;
use std::io::{self, PipeReader, PipeWriter, Write};
use std::os::fd::{AsFd, BorrowedFd};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

/// Manual suspension point: a future that stays pending until the test opens
/// it, handing out the continuation of whoever awaits it.
#[derive(Debug, Clone, Default)]
pub(crate) struct Gate {
    inner: Arc<GateInner>,
}

#[derive(Debug, Default)]
struct GateInner {
    open: AtomicBool,
    continuation: Mutex<Option<Continuation>>,
}

impl Gate {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn is_waiting(&self) -> bool {
        self.inner.continuation.lock().is_some()
    }

    /// Opens the gate and hands back the stored continuation, if any.
    pub(crate) fn open(&self) -> Option<Continuation> {
        self.inner.open.store(true, Ordering::Release);
        self.inner.continuation.lock().take()
    }

    pub(crate) fn wait(&self) -> GateWait {
        GateWait {
            inner: Arc::clone(&self.inner),
        }
    }
}

pub(crate) struct GateWait {
    inner: Arc<GateInner>,
}

impl Future for GateWait {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let mut continuation = self.inner.continuation.lock();

        if self.inner.open.load(Ordering::Acquire) {
            return Poll::Ready(());
        }

        *continuation = Some(Continuation::new(cx.waker().clone()));
        Poll::Pending
    }
}

/// Signal backed by the read end of a pipe. Fires when a byte is written,
/// hangs up when the write end is dropped.
#[derive(Debug)]
pub(crate) struct PipeSignal {
    reader: PipeReader,
}

impl PipeSignal {
    pub(crate) fn new() -> io::Result<(Arc<PipeSignal>, PipeWriter)> {
        let (reader, writer) = io::pipe()?;
        Ok((Arc::new(PipeSignal { reader }), writer))
    }

    pub(crate) fn fire(writer: &mut PipeWriter) -> io::Result<()> {
        writer.write_all(&[1])
    }
}

impl AsFd for PipeSignal {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.reader.as_fd()
    }
}

impl Signal for PipeSignal {}
