use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Offsets from the trace start at which each request phase happened.
/// `None` means the phase never occurred for this request.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Phases {
    pub dns_start: Option<Duration>,
    pub dns_done: Option<Duration>,
    pub request_written: Option<Duration>,
    pub first_byte: Option<Duration>,
}

/// Per-request timing hooks.
///
/// The connector records DNS resolution on it while dialing, and the
/// [`TracedStream`] of whichever connection carries the request records the
/// last request write and the first response byte.
#[derive(Debug)]
pub struct PhaseTrace {
    start: Instant,
    phases: Mutex<Phases>,
}

impl PhaseTrace {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            start: Instant::now(),
            phases: Mutex::new(Phases::default()),
        })
    }

    pub fn start(&self) -> Instant {
        self.start
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn phases(&self) -> Phases {
        *self.lock()
    }

    pub(crate) fn dns_start(&self) {
        let at = self.elapsed();
        self.lock().dns_start.get_or_insert(at);
    }

    pub(crate) fn dns_done(&self) {
        let at = self.elapsed();
        self.lock().dns_done.get_or_insert(at);
    }

    /// Every successful write moves this forward; the last one marks the request as written.
    pub(crate) fn wrote_request(&self) {
        let at = self.elapsed();
        self.lock().request_written = Some(at);
    }

    pub(crate) fn first_byte(&self) {
        let at = self.elapsed();
        self.lock().first_byte.get_or_insert(at);
    }

    fn lock(&self) -> MutexGuard<'_, Phases> {
        self.phases.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The trace currently attached to a pooled connection, if a request is in flight on it.
#[derive(Debug, Clone, Default)]
pub(crate) struct TraceSlot(Arc<Mutex<Option<Arc<PhaseTrace>>>>);

impl TraceSlot {
    pub(crate) fn attach(&self, trace: Arc<PhaseTrace>) {
        *self.lock() = Some(trace);
    }

    pub(crate) fn detach(&self) {
        self.lock().take();
    }

    fn with<F: FnOnce(&PhaseTrace)>(&self, f: F) {
        if let Some(trace) = self.lock().as_deref() {
            f(trace);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Arc<PhaseTrace>>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Stream wrapper reporting writes and the first read byte to the attached trace.
pub(crate) struct TracedStream<S> {
    inner: S,
    slot: TraceSlot,
}

impl<S> TracedStream<S> {
    pub(crate) fn new(inner: S, slot: TraceSlot) -> Self {
        Self { inner, slot }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for TracedStream<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let polled = Pin::new(&mut self.inner).poll_read(cx, buf);
        if matches!(polled, Poll::Ready(Ok(()))) && buf.filled().len() > before {
            self.slot.with(PhaseTrace::first_byte);
        }
        polled
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for TracedStream<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let polled = Pin::new(&mut self.inner).poll_write(cx, buf);
        if matches!(polled, Poll::Ready(Ok(n)) if n > 0) {
            self.slot.with(PhaseTrace::wrote_request);
        }
        polled
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    #[test]
    fn test_once_phases_keep_first_value() {
        let trace = PhaseTrace::new();
        trace.dns_start();
        let first = trace.phases().dns_start;
        std::thread::sleep(Duration::from_millis(2));
        trace.dns_start();
        assert_eq!(trace.phases().dns_start, first);
        assert!(trace.phases().dns_done.is_none());
    }

    #[test]
    fn test_request_written_tracks_latest_write() {
        let trace = PhaseTrace::new();
        trace.wrote_request();
        let first = trace.phases().request_written.expect("written");
        std::thread::sleep(Duration::from_millis(2));
        trace.wrote_request();
        let last = trace.phases().request_written.expect("written");
        assert!(last > first);
    }

    #[tokio::test]
    async fn test_traced_stream_reports_to_attached_trace_only() {
        let (client, mut server) = tokio::io::duplex(64);
        let slot = TraceSlot::default();
        let mut stream = TracedStream::new(client, slot.clone());

        // nothing attached, nothing recorded anywhere
        stream.write_all(b"idle").await.expect("write");
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).await.expect("read");

        let trace = PhaseTrace::new();
        slot.attach(trace.clone());
        stream.write_all(b"GET / HTTP/1.1\r\n\r\n").await.expect("write");
        assert!(trace.phases().request_written.is_some());
        assert!(trace.phases().first_byte.is_none());

        server.write_all(b"HTTP/1.1 200 OK\r\n").await.expect("write");
        let mut buf = [0u8; 8];
        stream.read_exact(&mut buf).await.expect("read");
        let phases = trace.phases();
        assert!(phases.first_byte >= phases.request_written);

        slot.detach();
        server.write_all(b"late").await.expect("write");
        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).await.expect("read");
        assert_eq!(trace.phases().first_byte, phases.first_byte);
    }
}
