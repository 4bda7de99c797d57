//! Pipeline counters, shared by the frame loop and its send tasks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

use tagcast_core::ScanReport;

#[derive(Debug, Default)]
struct Counters {
    frames: AtomicU64,
    candidates: AtomicU64,
    too_narrow: AtomicU64,
    cropped: AtomicU64,
    suppressed: AtomicU64,
    scheduled: AtomicU64,
    schedule_failures: AtomicU64,
    datagrams_sent: AtomicU64,
    bytes_sent: AtomicU64,
    send_retries: AtomicU64,
    send_failures: AtomicU64,
    encode_failures: AtomicU64,
    peak_outstanding: AtomicU64,
}

/// Cheap to clone; every clone updates the same counters.
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    inner: Arc<Counters>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StatsSnapshot {
    pub frames: u64,
    pub candidates: u64,
    pub too_narrow: u64,
    pub cropped: u64,
    pub suppressed: u64,
    pub scheduled: u64,
    pub schedule_failures: u64,
    pub datagrams_sent: u64,
    pub bytes_sent: u64,
    pub send_retries: u64,
    pub send_failures: u64,
    pub encode_failures: u64,
    pub peak_outstanding: u64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_scan(&self, report: &ScanReport) {
        let c = &self.inner;
        c.frames.fetch_add(1, Ordering::Relaxed);
        c.candidates
            .fetch_add(report.accepted as u64, Ordering::Relaxed);
        c.too_narrow
            .fetch_add(report.too_narrow as u64, Ordering::Relaxed);
        c.cropped.fetch_add(report.cropped as u64, Ordering::Relaxed);
        c.suppressed
            .fetch_add(report.suppressed as u64, Ordering::Relaxed);
    }

    pub fn record_scheduled(&self) {
        self.inner.scheduled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_schedule_failure(&self) {
        self.inner.schedule_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// One datagram delivered to the socket after `attempts` tries.
    pub fn record_sent(&self, bytes: usize, attempts: u32) {
        let c = &self.inner;
        c.datagrams_sent.fetch_add(1, Ordering::Relaxed);
        c.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
        c.send_retries
            .fetch_add(attempts.saturating_sub(1) as u64, Ordering::Relaxed);
    }

    pub fn record_send_failure(&self, attempts: u32) {
        let c = &self.inner;
        c.send_failures.fetch_add(1, Ordering::Relaxed);
        c.send_retries
            .fetch_add(attempts.saturating_sub(1) as u64, Ordering::Relaxed);
    }

    pub fn record_encode_failure(&self) {
        self.inner.encode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_outstanding(&self, outstanding: u32) {
        self.inner
            .peak_outstanding
            .fetch_max(outstanding as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let c = &self.inner;
        StatsSnapshot {
            frames: c.frames.load(Ordering::Relaxed),
            candidates: c.candidates.load(Ordering::Relaxed),
            too_narrow: c.too_narrow.load(Ordering::Relaxed),
            cropped: c.cropped.load(Ordering::Relaxed),
            suppressed: c.suppressed.load(Ordering::Relaxed),
            scheduled: c.scheduled.load(Ordering::Relaxed),
            schedule_failures: c.schedule_failures.load(Ordering::Relaxed),
            datagrams_sent: c.datagrams_sent.load(Ordering::Relaxed),
            bytes_sent: c.bytes_sent.load(Ordering::Relaxed),
            send_retries: c.send_retries.load(Ordering::Relaxed),
            send_failures: c.send_failures.load(Ordering::Relaxed),
            encode_failures: c.encode_failures.load(Ordering::Relaxed),
            peak_outstanding: c.peak_outstanding.load(Ordering::Relaxed),
        }
    }
}
