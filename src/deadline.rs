use std::future::Future;
use std::io;
use std::io::IoSlice;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::{Instant, Sleep};

/// Turns the deadlines of one accepted connection off.
///
/// Cloned into every request served on the connection so a CONNECT handler
/// can hand the socket over to a tunnel without a deadline.
#[derive(Debug, Clone)]
pub struct DeadlineSwitch(Arc<AtomicBool>);

impl DeadlineSwitch {
    fn new() -> Self {
        DeadlineSwitch(Arc::new(AtomicBool::new(true)))
    }

    pub fn disarm(&self) {
        self.0.store(false, Ordering::Release);
    }

    pub fn is_armed(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Client-side stream with an idle and a write deadline.
///
/// The idle deadline fails a pending read once no byte has moved in either
/// direction for `idle_timeout`. The write deadline fails a write that has
/// been blocked on the peer for `write_timeout`. Both stop applying once the
/// [`DeadlineSwitch`] is disarmed.
pub struct DeadlineStream<S> {
    inner: S,
    idle_timeout: Duration,
    write_timeout: Duration,
    last_activity: Instant,
    write_blocked_since: Option<Instant>,
    idle_delay: Pin<Box<Sleep>>,
    write_delay: Pin<Box<Sleep>>,
    switch: DeadlineSwitch,
}

impl<S> DeadlineStream<S> {
    pub fn new(inner: S, idle_timeout: Duration, write_timeout: Duration) -> Self {
        DeadlineStream {
            inner,
            idle_timeout,
            write_timeout,
            last_activity: Instant::now(),
            write_blocked_since: None,
            idle_delay: Box::pin(tokio::time::sleep(Duration::from_millis(0))),
            write_delay: Box::pin(tokio::time::sleep(Duration::from_millis(0))),
            switch: DeadlineSwitch::new(),
        }
    }

    pub fn switch(&self) -> DeadlineSwitch {
        self.switch.clone()
    }

    fn poll_idle(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if !self.switch.is_armed() {
            return Poll::Pending;
        }

        self.idle_delay
            .as_mut()
            .reset(self.last_activity + self.idle_timeout);
        match self.idle_delay.as_mut().poll(cx) {
            Poll::Ready(()) => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "client connection idle timeout",
            ))),
            Poll::Pending => Poll::Pending,
        }
    }

    fn on_write<T>(&mut self, cx: &mut Context<'_>, poll: Poll<io::Result<T>>) -> Poll<io::Result<T>> {
        if poll.is_ready() {
            self.last_activity = Instant::now();
            self.write_blocked_since = None;
            return poll;
        }
        if !self.switch.is_armed() {
            return Poll::Pending;
        }

        let since = *self.write_blocked_since.get_or_insert_with(Instant::now);
        self.write_delay.as_mut().reset(since + self.write_timeout);
        match self.write_delay.as_mut().poll(cx) {
            Poll::Ready(()) => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "client connection write timeout",
            ))),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for DeadlineStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(result) => {
                this.last_activity = Instant::now();
                Poll::Ready(result)
            }
            Poll::Pending => this.poll_idle(cx),
        }
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for DeadlineStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_write(cx, buf);
        this.on_write(cx, poll)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_flush(cx);
        this.on_write(cx, poll)
    }

    #[inline]
    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_write_vectored(cx, bufs);
        this.on_write(cx, poll)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }
}
