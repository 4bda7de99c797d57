//! tagcast integration test harness.
//!
//! Every test runs a real pipeline against a real collector over the
//! loopback interface. Collectors bind OS-assigned ports, so tests can run in
//! parallel without stepping on each other.
//!
//!   cargo test --test integration

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use tagcast_core::config::{CollectorConfig, TagcastConfig};
use tagcast_core::{BinaryFrame, WindowPolicy};
use tagcast_services::{
    CameraTable, Collector, FrameProvider, Pipeline, ProviderError, TagWindow, UdpTransport,
};

mod faults;
mod replay;
mod streaming;

// ── Harness ───────────────────────────────────────────────────────────────────

/// A collector listening on loopback, with its windows on a channel.
pub struct CollectorHarness {
    pub addrs: Vec<SocketAddr>,
    pub stats: CameraTable,
    windows: mpsc::Receiver<TagWindow>,
    shutdown: broadcast::Sender<()>,
    handles: Vec<JoinHandle<()>>,
}

impl CollectorHarness {
    pub fn start(cameras: u16) -> Result<Self> {
        let config = CollectorConfig {
            bind_address: "127.0.0.1".to_string(),
            start_port: 0,
            cameras,
            mtu: 65_536,
            channel_capacity: 4096,
            ..CollectorConfig::default()
        };
        let collector = Collector::bind(&config).context("collector bind")?;
        let addrs = collector.local_addrs();
        let stats = collector.stats();
        let (shutdown, _) = broadcast::channel(1);
        let (tx, windows) = mpsc::channel(config.channel_capacity);
        let handles = collector.spawn(tx, &shutdown);
        Ok(Self {
            addrs,
            stats,
            windows,
            shutdown,
            handles,
        })
    }

    /// Receive exactly `n` windows, failing if they do not arrive in time.
    pub async fn collect(&mut self, n: usize) -> Result<Vec<TagWindow>> {
        let mut out = Vec::with_capacity(n);
        while out.len() < n {
            let window = tokio::time::timeout(Duration::from_secs(5), self.windows.recv())
                .await
                .with_context(|| format!("timed out after {} of {n} windows", out.len()))?
                .context("collector channel closed")?;
            out.push(window);
        }
        Ok(out)
    }

    /// Assert nothing more shows up within `wait`.
    pub async fn expect_silence(&mut self, wait: Duration) -> Result<()> {
        match tokio::time::timeout(wait, self.windows.recv()).await {
            Err(_) => Ok(()),
            Ok(w) => anyhow::bail!("unexpected window: {:?}", w.map(|w| w.header)),
        }
    }

    pub async fn stop(self) -> Result<()> {
        let _ = self.shutdown.send(());
        drop(self.windows);
        for h in self.handles {
            h.await.context("camera receiver panicked")?;
        }
        Ok(())
    }
}

/// Pipeline settings aimed at `peer` from an ephemeral loopback port.
pub fn pipeline_config(peer: SocketAddr) -> TagcastConfig {
    let mut config = TagcastConfig::default();
    config.transport.peer = peer;
    config.transport.bind = "127.0.0.1:0".parse().expect("literal address");
    config.detection.window = WindowPolicy::Fixed { width: 32 };
    config.detection.max_window = 32;
    config
}

pub fn udp_pipeline<P: FrameProvider>(
    config: &TagcastConfig,
    provider: P,
) -> Result<Pipeline<P, UdpTransport>> {
    let transport = UdpTransport::bind(&config.transport)?;
    Ok(Pipeline::from_config(config, provider, transport))
}

/// 320x240 frame with a 20x20 marker at each center.
pub fn frame_with_markers(centers: &[(i32, i32)]) -> BinaryFrame {
    let mut frame = BinaryFrame::blank(320, 240).expect("non-empty frame");
    for &(x, y) in centers {
        frame.fill_square(x, y, 20, 255);
    }
    frame
}

/// Hands out a fixed list of frames, then ends the stream.
pub struct FrameQueue {
    frames: VecDeque<BinaryFrame>,
    pub released: usize,
}

impl FrameQueue {
    pub fn new(frames: Vec<BinaryFrame>) -> Self {
        Self {
            frames: frames.into(),
            released: 0,
        }
    }
}

impl FrameProvider for FrameQueue {
    async fn acquire(&mut self) -> Result<Option<BinaryFrame>, ProviderError> {
        Ok(self.frames.pop_front())
    }

    fn release(&mut self, _frame: BinaryFrame) {
        self.released += 1;
    }
}

/// Run `pipeline` to the end of its source.
pub async fn run_to_end<P: FrameProvider>(pipeline: &mut Pipeline<P, UdpTransport>) -> Result<u64> {
    let (_tx, rx) = broadcast::channel(1);
    let frames = tokio::time::timeout(Duration::from_secs(10), pipeline.run(rx))
        .await
        .context("pipeline did not finish")??;
    Ok(frames)
}

#[tokio::test]
async fn harness_collector_binds_requested_cameras() -> Result<()> {
    let harness = CollectorHarness::start(3)?;
    assert_eq!(harness.addrs.len(), 3);
    let mut ports: Vec<u16> = harness.addrs.iter().map(|a| a.port()).collect();
    ports.sort();
    ports.dedup();
    assert_eq!(ports.len(), 3);
    harness.stop().await
}
