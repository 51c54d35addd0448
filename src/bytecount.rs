//! Byte accounting for send streams

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;

use crate::endpoint::ByteStream;
use crate::error::Result;

/// Stream adapter that counts every byte flowing through it.
///
/// The counter is an `Arc<AtomicU64>` so the report surface can observe
/// progress while the receive call drives the stream; observed values are
/// monotone.
pub struct CountingStream {
    inner: ByteStream,
    count: Arc<AtomicU64>,
}

impl CountingStream {
    /// Wrap a send stream
    pub fn new(inner: ByteStream) -> Self {
        Self {
            inner,
            count: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Handle to the running byte count, shareable with concurrent readers
    pub fn counter(&self) -> Arc<AtomicU64> {
        self.count.clone()
    }
}

impl Stream for CountingStream {
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let poll = this.inner.as_mut().poll_next(cx);
        if let Poll::Ready(Some(Ok(chunk))) = &poll {
            this.count.fetch_add(chunk.len() as u64, Ordering::AcqRel);
        }
        poll
    }
}
