//! Collector: the receiving end of the window stream.
//!
//! One UDP socket per camera on consecutive ports. Each datagram is decoded
//! into a [`TagWindow`] and forwarded on a bounded channel; malformed ones
//! are counted and skipped. Per-camera counters live in a shared table.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use dashmap::DashMap;
use serde::Serialize;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::io::AsyncWriteExt;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use tagcast_core::config::CollectorConfig;
use tagcast_core::{decode_packet, PacketHeader, WireError, HEADER_LEN, MARKER_VALUE};

/// Pause after a failed `recv_from` before polling the socket again.
const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// One decoded window, as received.
#[derive(Debug, Clone)]
pub struct TagWindow {
    pub camera: u16,
    pub source: SocketAddr,
    pub header: PacketHeader,
    /// `window_width²` row-major samples.
    pub pixels: Bytes,
}

impl TagWindow {
    pub fn decode(camera: u16, source: SocketAddr, datagram: Bytes) -> Result<Self, WireError> {
        let (header, _) = decode_packet(&datagram)?;
        Ok(Self {
            camera,
            source,
            header,
            pixels: datagram.slice(HEADER_LEN..),
        })
    }

    pub fn window_width(&self) -> u16 {
        self.header.window_width()
    }

    /// Top-left corner of the window in frame coordinates.
    pub fn origin(&self) -> (u16, u16) {
        let half = self.window_width() / 2;
        (
            self.header.center_x().saturating_sub(half),
            self.header.center_y().saturating_sub(half),
        )
    }

    /// Pixels equal to `marker_value`.
    pub fn foreground(&self, marker_value: u8) -> usize {
        self.pixels.iter().filter(|&&p| p == marker_value).count()
    }
}

// ── Per-camera state ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CameraStats {
    pub packets: u64,
    pub bytes: u64,
    pub malformed: u64,
    /// Distinct frame sequences seen.
    pub frames_seen: u64,
    /// Frames skipped between consecutive sequences.
    pub sequence_gaps: u64,
    pub last_sequence: Option<u32>,
}

impl CameraStats {
    pub fn observe(&mut self, sequence: u32, len: usize) {
        self.packets += 1;
        self.bytes += len as u64;
        match self.last_sequence {
            None => {
                self.frames_seen = 1;
                self.last_sequence = Some(sequence);
            }
            Some(prev) if prev == sequence => {}
            Some(prev) => {
                let ahead = sequence.wrapping_sub(prev);
                // Anything "ahead" by more than half the space is a late
                // window from an older frame.
                if ahead < u32::MAX / 2 {
                    self.frames_seen += 1;
                    self.sequence_gaps += (ahead - 1) as u64;
                    self.last_sequence = Some(sequence);
                }
            }
        }
    }
}

pub type CameraTable = Arc<DashMap<u16, CameraStats>>;

// ── Collector ─────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct Collector {
    sockets: Vec<(u16, UdpSocket)>,
    stats: CameraTable,
    mtu: usize,
}

impl Collector {
    /// Bind one socket per camera. `start_port = 0` lets the OS pick every
    /// port. Must be called from within a tokio runtime.
    pub fn bind(config: &CollectorConfig) -> Result<Self> {
        let ip: IpAddr = config
            .bind_address
            .parse()
            .with_context(|| format!("invalid bind address {:?}", config.bind_address))?;

        let mut sockets = Vec::with_capacity(config.cameras as usize);
        for camera in 0..config.cameras {
            let port = if config.start_port == 0 {
                0
            } else {
                config
                    .start_port
                    .checked_add(camera)
                    .context("camera port range overflows u16")?
            };
            let addr = SocketAddr::new(ip, port);
            let socket = make_recv_socket(addr)
                .with_context(|| format!("failed to bind camera {camera} on {addr}"))?;
            let socket =
                UdpSocket::from_std(socket).context("failed to convert to tokio UdpSocket")?;
            tracing::info!(camera, addr = %socket.local_addr()?, "camera socket bound");
            sockets.push((camera, socket));
        }

        Ok(Self {
            sockets,
            stats: Arc::new(DashMap::new()),
            mtu: config.mtu,
        })
    }

    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.sockets
            .iter()
            .filter_map(|(_, s)| s.local_addr().ok())
            .collect()
    }

    pub fn stats(&self) -> CameraTable {
        self.stats.clone()
    }

    /// Start one receive task per camera. Decoded windows go to `tx`.
    pub fn spawn(
        self,
        tx: mpsc::Sender<TagWindow>,
        shutdown: &broadcast::Sender<()>,
    ) -> Vec<JoinHandle<()>> {
        self.sockets
            .into_iter()
            .map(|(camera, socket)| {
                tokio::spawn(receive_loop(
                    camera,
                    socket,
                    self.mtu,
                    self.stats.clone(),
                    tx.clone(),
                    shutdown.subscribe(),
                ))
            })
            .collect()
    }
}

async fn receive_loop(
    camera: u16,
    socket: UdpSocket,
    mtu: usize,
    stats: CameraTable,
    tx: mpsc::Sender<TagWindow>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut buf = vec![0u8; mtu.max(HEADER_LEN)];
    loop {
        let (len, source) = tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!(camera, "camera receiver shutting down");
                return;
            }
            received = socket.recv_from(&mut buf) => match received {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(camera, error = %e, "recv_from failed");
                    if !pause_after_error(&mut shutdown).await {
                        return;
                    }
                    continue;
                }
            },
        };

        let datagram = Bytes::copy_from_slice(&buf[..len]);
        let window = match TagWindow::decode(camera, source, datagram) {
            Ok(w) => w,
            Err(e) => {
                stats.entry(camera).or_default().malformed += 1;
                tracing::debug!(camera, %source, len, error = %e, "malformed datagram skipped");
                continue;
            }
        };

        stats
            .entry(camera)
            .or_default()
            .observe(window.header.sequence(), len);
        tracing::trace!(
            camera,
            sequence = window.header.sequence(),
            cx = window.header.center_x(),
            cy = window.header.center_y(),
            "window received"
        );

        if tx.send(window).await.is_err() {
            tracing::info!(camera, "window consumer gone, receiver exiting");
            return;
        }
    }
}

/// Sleep off a socket error. Returns `false` if shutdown arrived first.
async fn pause_after_error(shutdown: &mut broadcast::Receiver<()>) -> bool {
    tokio::select! {
        _ = shutdown.recv() => false,
        _ = tokio::time::sleep(RECV_ERROR_BACKOFF) => true,
    }
}

fn make_recv_socket(addr: SocketAddr) -> Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))
        .context("socket()")?;
    socket.set_reuse_address(true).context("SO_REUSEADDR")?;
    socket.set_nonblocking(true).context("O_NONBLOCK")?;
    socket.bind(&addr.into()).context("bind()")?;
    Ok(socket.into())
}

// ── Persistence ───────────────────────────────────────────────────────────────

/// Index line written for every persisted window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WindowRecord {
    pub camera: u16,
    pub sequence: u32,
    pub center_x: u16,
    pub center_y: u16,
    pub window_width: u16,
    pub source: SocketAddr,
    pub foreground: usize,
    pub file: Option<PathBuf>,
}

pub fn pgm_file_name(window: &TagWindow) -> String {
    format!(
        "cam{}_seq{}_{}_{}.pgm",
        window.camera,
        window.header.sequence(),
        window.header.center_x(),
        window.header.center_y()
    )
}

/// Binary PGM (P5) image of the window.
pub fn encode_pgm(window: &TagWindow) -> Vec<u8> {
    let w = window.window_width();
    let mut out = format!("P5\n{w} {w}\n255\n").into_bytes();
    out.extend_from_slice(&window.pixels);
    out
}

/// Writes windows to disk and keeps the JSON-lines index.
#[derive(Debug)]
pub struct WindowSink {
    output_dir: Option<PathBuf>,
    index: Option<tokio::fs::File>,
    marker_value: u8,
}

impl WindowSink {
    pub async fn open(config: &CollectorConfig) -> Result<Self> {
        let output_dir = match &config.output_dir {
            Some(dir) => {
                tokio::fs::create_dir_all(dir)
                    .await
                    .with_context(|| format!("failed to create {}", dir.display()))?;
                Some(dir.clone())
            }
            None => None,
        };
        let index = match &config.index_file {
            Some(path) => Some(open_append(path).await?),
            None => None,
        };
        Ok(Self {
            output_dir,
            index,
            marker_value: MARKER_VALUE,
        })
    }

    /// Count foreground against a marker value other than the default.
    pub fn with_marker_value(mut self, marker_value: u8) -> Self {
        self.marker_value = marker_value;
        self
    }

    pub async fn record(&mut self, window: &TagWindow) -> Result<WindowRecord> {
        let file = match &self.output_dir {
            Some(dir) => {
                let path = dir.join(pgm_file_name(window));
                tokio::fs::write(&path, encode_pgm(window))
                    .await
                    .with_context(|| format!("failed to write {}", path.display()))?;
                Some(path)
            }
            None => None,
        };

        let record = WindowRecord {
            camera: window.camera,
            sequence: window.header.sequence(),
            center_x: window.header.center_x(),
            center_y: window.header.center_y(),
            window_width: window.window_width(),
            source: window.source,
            foreground: window.foreground(self.marker_value),
            file,
        };

        if let Some(index) = &mut self.index {
            let mut line = serde_json::to_vec(&record)?;
            line.push(b'\n');
            index
                .write_all(&line)
                .await
                .context("failed to append window index")?;
        }
        Ok(record)
    }

    pub async fn flush(&mut self) -> Result<()> {
        if let Some(index) = &mut self.index {
            index.flush().await.context("failed to flush window index")?;
        }
        Ok(())
    }
}

async fn open_append(path: &Path) -> Result<tokio::fs::File> {
    tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .with_context(|| format!("failed to open {}", path.display()))
}
