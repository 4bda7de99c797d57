//! Frame pipeline: acquire, scan, fan out sends, drain, release.
//!
//! One frame at a time. The scan runs to completion on the calling task and
//! spawns a send task per accepted candidate as it goes. The frame is only
//! handed back to its provider once the dispatch barrier has drained, and the
//! next frame is not acquired before that.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::broadcast;

use tagcast_core::config::{DetectionConfig, TagcastConfig, TransportConfig};
use tagcast_core::{BinaryFrame, ScanReport, Scanner};

use crate::barrier::{BarrierError, DispatchBarrier};
use crate::provider::{FrameProvider, ProviderError};
use crate::stats::PipelineStats;
use crate::transport::{RetryPolicy, Transport};
use crate::worker::{BufferPool, SendWorker};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Barrier(#[from] BarrierError),
    #[error("frame still referenced after the barrier drained")]
    FrameStillShared,
}

/// What happened to one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FrameReport {
    pub sequence: u32,
    pub scan: ScanReport,
    pub scheduled: u32,
    pub schedule_failures: u32,
    pub peak_outstanding: u32,
    pub scan_time: Duration,
    pub total_time: Duration,
}

pub struct Pipeline<P, T> {
    scanner: Scanner,
    provider: P,
    transport: Arc<T>,
    pool: BufferPool,
    barrier: DispatchBarrier,
    retry: RetryPolicy,
    stats: PipelineStats,
    sequence: u32,
}

impl<P: FrameProvider, T: Transport> Pipeline<P, T> {
    pub fn new(
        detection: &DetectionConfig,
        transport_config: &TransportConfig,
        provider: P,
        transport: T,
    ) -> Self {
        Self {
            scanner: Scanner::from_config(detection),
            provider,
            transport: Arc::new(transport),
            pool: BufferPool::new(transport_config.max_in_flight, detection.max_window),
            barrier: DispatchBarrier::new(),
            retry: RetryPolicy::from_config(&transport_config.retry),
            stats: PipelineStats::new(),
            sequence: 0,
        }
    }

    pub fn from_config(config: &TagcastConfig, provider: P, transport: T) -> Self {
        Self::new(&config.detection, &config.transport, provider, transport)
    }

    pub fn barrier(&self) -> &DispatchBarrier {
        &self.barrier
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Sequence number the next frame will carry.
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Scan one frame, wait for all of its sends, then release it.
    pub async fn process(&mut self, frame: BinaryFrame) -> Result<FrameReport, PipelineError> {
        let started = Instant::now();
        let sequence = self.sequence;
        let frame = Arc::new(frame);

        let mut scheduled = 0u32;
        let mut schedule_failures = 0u32;
        let Self {
            scanner,
            transport,
            pool,
            barrier,
            retry,
            stats,
            ..
        } = &mut *self;

        let scan = scanner.scan_with(&frame, |candidate| {
            let Some(buffer) = pool.try_checkout() else {
                schedule_failures += 1;
                stats.record_schedule_failure();
                tracing::warn!(
                    sequence,
                    cx = candidate.center_x,
                    cy = candidate.center_y,
                    in_flight = pool.size(),
                    "no free transmit buffer, candidate dropped"
                );
                return;
            };
            let permit = match barrier.register() {
                Ok(permit) => permit,
                Err(e) => {
                    schedule_failures += 1;
                    stats.record_schedule_failure();
                    tracing::warn!(sequence, error = %e, "candidate dropped");
                    return;
                }
            };
            scheduled += 1;
            stats.record_scheduled();
            let worker = SendWorker {
                candidate,
                frame: Arc::clone(&frame),
                sequence,
                buffer,
                transport: Arc::clone(transport),
                retry: *retry,
                stats: stats.clone(),
                permit,
            };
            tokio::spawn(async move {
                // The worker logs its own failures.
                let _ = worker.run().await;
            });
        });
        let scan_time = started.elapsed();
        stats.record_scan(&scan);

        barrier.seal();
        let drained = barrier.drained().await?;
        stats.record_outstanding(drained.peak);

        let frame = Arc::try_unwrap(frame).map_err(|_| PipelineError::FrameStillShared)?;
        self.provider.release(frame);
        self.barrier.reset()?;
        self.sequence = self.sequence.wrapping_add(1);

        let report = FrameReport {
            sequence,
            scan,
            scheduled,
            schedule_failures,
            peak_outstanding: drained.peak,
            scan_time,
            total_time: started.elapsed(),
        };
        tracing::debug!(
            sequence,
            candidates = scan.accepted,
            scheduled,
            peak_outstanding = drained.peak,
            scan_us = scan_time.as_micros() as u64,
            scan_fps = 1.0 / scan_time.as_secs_f64().max(1e-9),
            "frame done"
        );
        Ok(report)
    }

    /// Acquire and process the next frame. `None` at end of stream.
    pub async fn step(&mut self) -> Result<Option<FrameReport>, PipelineError> {
        match self.provider.acquire().await? {
            Some(frame) => self.process(frame).await.map(Some),
            None => Ok(None),
        }
    }

    /// Process frames until the source runs dry or `shutdown` fires.
    ///
    /// Shutdown is only observed while waiting for a frame, so a frame that
    /// has been acquired is always drained and released. Returns the number
    /// of frames processed.
    pub async fn run(&mut self, mut shutdown: broadcast::Receiver<()>) -> Result<u64, PipelineError> {
        let mut frames = 0u64;
        loop {
            let acquired = tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!(frames, "pipeline shutting down");
                    None
                }
                acquired = self.provider.acquire() => Some(acquired?),
            };
            let frame = match acquired {
                Some(Some(frame)) => frame,
                Some(None) => {
                    tracing::info!(frames, "frame source exhausted");
                    break;
                }
                None => break,
            };
            self.process(frame).await?;
            frames += 1;
        }
        Ok(frames)
    }
}
