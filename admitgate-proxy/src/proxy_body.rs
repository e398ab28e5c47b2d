//! Streaming body wrapper with cancellation.
//!
//! Frames are moved through untouched. The wrapper ends the stream with an
//! error as soon as its cancellation token fires, and can own the
//! [`DropGuard`] of a per-request token so that dropping the body (client
//! went away) cancels everything tied to that request.

use bytes::Bytes;
use http_body::{Body, Frame, SizeHint};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio_util::sync::{CancellationToken, DropGuard, WaitForCancellationFutureOwned};
use tracing::debug;

/// Boxed error used by every streaming body in the gateway.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Counters for a single stream.
#[derive(Debug, Clone, Default)]
pub struct StreamMetrics {
    bytes_transferred: u64,
    chunks_count: u64,
    has_trailers: bool,
}

impl StreamMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_bytes(&mut self, count: usize) {
        self.bytes_transferred += count as u64;
        self.chunks_count += 1;
    }

    pub fn record_trailers(&mut self) {
        self.has_trailers = true;
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred
    }

    pub fn chunks_count(&self) -> u64 {
        self.chunks_count
    }

    pub fn has_trailers(&self) -> bool {
        self.has_trailers
    }
}

/// Zero-copy body wrapper that tracks metrics and honours cancellation.
pub struct ProxyBody<B> {
    inner: B,
    metrics: StreamMetrics,
    cancel_token: CancellationToken,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
    _guard: Option<DropGuard>,
    label: &'static str,
    finished: bool,
}

impl<B> ProxyBody<B> {
    /// Wrap `inner`; the stream is aborted once `cancel_token` fires.
    pub fn new(inner: B, cancel_token: CancellationToken, label: &'static str) -> Self {
        Self {
            inner,
            metrics: StreamMetrics::new(),
            cancelled: Box::pin(cancel_token.clone().cancelled_owned()),
            cancel_token,
            _guard: None,
            label,
            finished: false,
        }
    }

    /// Hold `guard` for the lifetime of the body. Dropping the body cancels
    /// the guarded token.
    pub fn with_drop_guard(mut self, guard: DropGuard) -> Self {
        self._guard = Some(guard);
        self
    }

    pub fn metrics(&self) -> &StreamMetrics {
        &self.metrics
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    fn finish(&mut self) {
        if !self.finished {
            self.finished = true;
            debug!(
                body = self.label,
                bytes = self.metrics.bytes_transferred(),
                chunks = self.metrics.chunks_count(),
                trailers = self.metrics.has_trailers(),
                "Stream complete"
            );
        }
    }
}

/// Returned as the final frame error when a stream is cancelled.
#[derive(Debug, thiserror::Error)]
#[error("stream cancelled")]
pub struct StreamCancelled;

impl<B> Body for ProxyBody<B>
where
    B: Body<Data = Bytes> + Unpin,
    B::Error: Into<BoxError>,
{
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();

        if this.finished {
            return Poll::Ready(None);
        }

        // Registers the waker so a later cancel interrupts a pending read.
        if this.cancelled.as_mut().poll(cx).is_ready() {
            this.finished = true;
            debug!(
                body = this.label,
                bytes = this.metrics.bytes_transferred(),
                "Stream cancelled"
            );
            return Poll::Ready(Some(Err(Box::new(StreamCancelled))));
        }

        match Pin::new(&mut this.inner).poll_frame(cx) {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    this.metrics.record_bytes(data.len());
                } else if frame.is_trailers() {
                    this.metrics.record_trailers();
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Poll::Ready(Some(Err(e))) => {
                this.finished = true;
                Poll::Ready(Some(Err(e.into())))
            }
            Poll::Ready(None) => {
                this.finish();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn is_end_stream(&self) -> bool {
        self.finished || self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
