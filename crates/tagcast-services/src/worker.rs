//! Send workers: one task per accepted candidate.
//!
//! A worker owns everything it touches: a pooled transmit buffer, a share of
//! the frame, and a barrier permit. It releases them in that order, so the
//! frame share is gone before the barrier can count the send as finished.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use tokio::sync::mpsc;

use tagcast_core::{extract_window, BinaryFrame, DetectionCandidate, TransmitBuffer, WireError};

use crate::barrier::DispatchPermit;
use crate::stats::PipelineStats;
use crate::transport::{send_with_retry, RetryPolicy, SendFailure, Transport};

// ── Buffer pool ───────────────────────────────────────────────────────────────

/// Fixed set of transmit buffers, allocated lazily up to `size`.
///
/// The pool size is the in-flight limit: when every buffer is checked out,
/// no further send can be scheduled.
#[derive(Debug)]
pub struct BufferPool {
    home: mpsc::Sender<TransmitBuffer>,
    free: mpsc::Receiver<TransmitBuffer>,
    allocated: usize,
    size: usize,
    max_window: u16,
}

impl BufferPool {
    pub fn new(size: usize, max_window: u16) -> Self {
        let size = size.max(1);
        let (home, free) = mpsc::channel(size);
        Self {
            home,
            free,
            allocated: 0,
            size,
            max_window,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Take a free buffer, or `None` if all are in flight.
    pub fn try_checkout(&mut self) -> Option<PooledBuffer> {
        let buffer = match self.free.try_recv() {
            Ok(buffer) => buffer,
            Err(_) if self.allocated < self.size => {
                self.allocated += 1;
                TransmitBuffer::new(self.max_window)
            }
            Err(_) => return None,
        };
        Some(PooledBuffer {
            buffer: Some(buffer),
            home: self.home.clone(),
        })
    }
}

/// A checked-out buffer. Goes back to its pool on drop.
#[derive(Debug)]
pub struct PooledBuffer {
    buffer: Option<TransmitBuffer>,
    home: mpsc::Sender<TransmitBuffer>,
}

impl Deref for PooledBuffer {
    type Target = TransmitBuffer;

    fn deref(&self) -> &TransmitBuffer {
        // Only `drop` takes the buffer out.
        self.buffer.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut TransmitBuffer {
        self.buffer.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(mut buffer) = self.buffer.take() {
            buffer.clear();
            // Channel capacity equals pool size, so this never fills up.
            // A dropped pool is also fine: the buffer is just freed.
            let _ = self.home.try_send(buffer);
        }
    }
}

// ── Worker ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("window extraction failed: {0}")]
    Encode(#[from] WireError),
    #[error(transparent)]
    Send(#[from] SendFailure),
}

pub struct SendWorker<T> {
    pub candidate: DetectionCandidate,
    pub frame: Arc<BinaryFrame>,
    pub sequence: u32,
    pub buffer: PooledBuffer,
    pub transport: Arc<T>,
    pub retry: RetryPolicy,
    pub stats: PipelineStats,
    pub permit: DispatchPermit,
}

impl<T: Transport> SendWorker<T> {
    /// Extract, send, and release. Returns the datagram length on success.
    pub async fn run(self) -> Result<usize, WorkerError> {
        let SendWorker {
            candidate,
            frame,
            sequence,
            mut buffer,
            transport,
            retry,
            stats,
            permit,
        } = self;

        let result = transmit(
            &candidate,
            frame,
            sequence,
            &mut buffer,
            transport.as_ref(),
            &retry,
            &stats,
        )
        .await;

        drop(buffer);
        drop(permit);
        result
    }
}

async fn transmit<T: Transport>(
    candidate: &DetectionCandidate,
    frame: Arc<BinaryFrame>,
    sequence: u32,
    buffer: &mut TransmitBuffer,
    transport: &T,
    retry: &RetryPolicy,
    stats: &PipelineStats,
) -> Result<usize, WorkerError> {
    let extracted = extract_window(&frame, candidate, sequence, buffer);
    drop(frame);
    let len = match extracted {
        Ok(len) => len,
        Err(e) => {
            stats.record_encode_failure();
            tracing::warn!(?candidate, error = %e, "window extraction failed");
            return Err(e.into());
        }
    };

    match send_with_retry(transport, buffer.as_slice(), retry).await {
        Ok(attempts) => {
            stats.record_sent(len, attempts);
            tracing::trace!(
                sequence,
                cx = candidate.center_x,
                cy = candidate.center_y,
                len,
                attempts,
                "window sent"
            );
            Ok(len)
        }
        Err(failure) => {
            stats.record_send_failure(failure.attempts);
            tracing::warn!(
                sequence,
                cx = candidate.center_x,
                cy = candidate.center_y,
                error = %failure,
                "window dropped"
            );
            Err(failure.into())
        }
    }
}
