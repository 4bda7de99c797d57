//! Frame providers: where binary frames come from and go back to.
//!
//! `acquire` waits for the next frame and yields `None` at end of stream.
//! Every acquired frame is handed back through `release` exactly once, after
//! all sends reading it have finished.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::time::{Interval, MissedTickBehavior};

use tagcast_core::config::{SourceConfig, SourceKind, TagcastConfig};
use tagcast_core::{BinaryFrame, FrameError, MARKER_VALUE};

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("failed to read frames from {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("raw_file source needs a path")]
    MissingPath,
}

pub trait FrameProvider: Send + 'static {
    fn acquire(
        &mut self,
    ) -> impl Future<Output = Result<Option<BinaryFrame>, ProviderError>> + Send;

    fn release(&mut self, frame: BinaryFrame);
}

// ── Pacing ────────────────────────────────────────────────────────────────────

/// Optional fixed frame rate. The interval is created on first use so that
/// providers can be built outside a runtime.
#[derive(Debug)]
struct Pacer {
    period: Option<Duration>,
    interval: Option<Interval>,
}

impl Pacer {
    fn new(fps: u32) -> Self {
        Self {
            period: (fps > 0).then(|| Duration::from_secs(1) / fps),
            interval: None,
        }
    }

    async fn tick(&mut self) {
        let Some(period) = self.period else {
            return;
        };
        let interval = self.interval.get_or_insert_with(|| {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });
        interval.tick().await;
    }
}

// ── Synthetic ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct Marker {
    x: f32,
    y: f32,
    vx: f32,
    vy: f32,
}

const MAX_SPEED: f32 = 3.0;
const JITTER: f32 = 0.5;

/// Square markers wandering over a blank frame.
///
/// Each marker does a random walk on its velocity and bounces off the frame
/// edges, so it never leaves the area where its square fits whole.
#[derive(Debug)]
pub struct SyntheticProvider {
    width: u16,
    height: u16,
    marker_size: u16,
    marker_value: u8,
    markers: Vec<Marker>,
    rng: StdRng,
    spare: Vec<Vec<u8>>,
    produced: u64,
    limit: u64,
    pacer: Pacer,
}

impl SyntheticProvider {
    pub fn new(config: &SourceConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let (lo_x, hi_x) = span(config.width, config.marker_size);
        let (lo_y, hi_y) = span(config.height, config.marker_size);
        let markers = (0..config.markers)
            .map(|_| Marker {
                x: rng.gen_range(lo_x..hi_x),
                y: rng.gen_range(lo_y..hi_y),
                vx: rng.gen_range(-1.0..1.0),
                vy: rng.gen_range(-1.0..1.0),
            })
            .collect();
        Self {
            width: config.width,
            height: config.height,
            marker_size: config.marker_size,
            marker_value: MARKER_VALUE,
            markers,
            rng,
            spare: Vec::new(),
            produced: 0,
            limit: config.frames,
            pacer: Pacer::new(config.fps),
        }
    }

    pub fn with_marker_value(mut self, marker_value: u8) -> Self {
        self.marker_value = marker_value;
        self
    }

    /// Centers of the markers in the most recently rendered frame.
    pub fn positions(&self) -> Vec<(i32, i32)> {
        self.markers
            .iter()
            .map(|m| (m.x.round() as i32, m.y.round() as i32))
            .collect()
    }

    pub fn produced(&self) -> u64 {
        self.produced
    }

    fn advance(&mut self) {
        let (lo_x, hi_x) = span(self.width, self.marker_size);
        let (lo_y, hi_y) = span(self.height, self.marker_size);
        for m in &mut self.markers {
            m.vx = (m.vx + self.rng.gen_range(-JITTER..JITTER)).clamp(-MAX_SPEED, MAX_SPEED);
            m.vy = (m.vy + self.rng.gen_range(-JITTER..JITTER)).clamp(-MAX_SPEED, MAX_SPEED);
            (m.x, m.vx) = bounce(m.x + m.vx, m.vx, lo_x, hi_x);
            (m.y, m.vy) = bounce(m.y + m.vy, m.vy, lo_y, hi_y);
        }
    }

    fn render(&mut self) -> Result<BinaryFrame, FrameError> {
        let len = self.width as usize * self.height as usize;
        let mut samples = self.spare.pop().unwrap_or_default();
        samples.clear();
        samples.resize(len, 0);
        let mut frame = BinaryFrame::new(self.width, self.height, samples)?;
        for (x, y) in self.positions() {
            frame.fill_square(x, y, self.marker_size as u32, self.marker_value);
        }
        Ok(frame)
    }
}

/// Range of centers for which a square of `size` fits inside `extent`.
fn span(extent: u16, size: u16) -> (f32, f32) {
    let lo = (size / 2) as f32;
    let hi = extent.saturating_sub(size - size / 2) as f32;
    if hi > lo {
        (lo, hi)
    } else {
        (lo, lo + 1.0)
    }
}

fn bounce(pos: f32, vel: f32, lo: f32, hi: f32) -> (f32, f32) {
    if pos < lo {
        ((2.0 * lo - pos).min(hi), -vel)
    } else if pos > hi {
        ((2.0 * hi - pos).max(lo), -vel)
    } else {
        (pos, vel)
    }
}

impl FrameProvider for SyntheticProvider {
    async fn acquire(&mut self) -> Result<Option<BinaryFrame>, ProviderError> {
        if self.limit != 0 && self.produced >= self.limit {
            return Ok(None);
        }
        self.pacer.tick().await;
        if self.produced > 0 {
            self.advance();
        }
        let frame = self.render()?;
        self.produced += 1;
        Ok(Some(frame))
    }

    fn release(&mut self, frame: BinaryFrame) {
        self.spare.push(frame.into_samples());
    }
}

// ── Raw file replay ───────────────────────────────────────────────────────────

/// Replays a file of back-to-back `width * height` binary frames.
#[derive(Debug)]
pub struct RawFileProvider {
    path: PathBuf,
    file: tokio::fs::File,
    width: u16,
    height: u16,
    loop_playback: bool,
    spare: Vec<Vec<u8>>,
    produced: u64,
    limit: u64,
    pacer: Pacer,
}

impl RawFileProvider {
    pub async fn open(path: &Path, config: &SourceConfig) -> Result<Self, ProviderError> {
        let io_err = |source| ProviderError::Io {
            path: path.to_path_buf(),
            source,
        };
        let file = tokio::fs::File::open(path).await.map_err(io_err)?;
        let size = file.metadata().await.map_err(io_err)?.len();
        let frame_len = config.width as u64 * config.height as u64;
        if frame_len == 0 {
            return Err(FrameError::Empty {
                width: config.width,
                height: config.height,
            }
            .into());
        }
        if size % frame_len != 0 {
            tracing::warn!(
                path = %path.display(),
                size,
                frame_len,
                "file is not a whole number of frames, trailing bytes ignored"
            );
        }
        tracing::info!(
            path = %path.display(),
            frames = size / frame_len,
            "raw frame replay opened"
        );
        Ok(Self {
            path: path.to_path_buf(),
            file,
            width: config.width,
            height: config.height,
            loop_playback: config.loop_playback,
            spare: Vec::new(),
            produced: 0,
            limit: config.frames,
            pacer: Pacer::new(config.fps),
        })
    }

    pub fn produced(&self) -> u64 {
        self.produced
    }

    /// Read one frame into `samples`. `Ok(false)` at end of file.
    async fn read_frame(&mut self, samples: &mut [u8]) -> io::Result<bool> {
        match self.file.read_exact(samples).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
            Err(e) => Err(e),
        }
    }
}

impl FrameProvider for RawFileProvider {
    async fn acquire(&mut self) -> Result<Option<BinaryFrame>, ProviderError> {
        if self.limit != 0 && self.produced >= self.limit {
            return Ok(None);
        }
        self.pacer.tick().await;

        let len = self.width as usize * self.height as usize;
        let mut samples = self.spare.pop().unwrap_or_default();
        samples.resize(len, 0);

        let io_err = |path: &Path, source| ProviderError::Io {
            path: path.to_path_buf(),
            source,
        };
        let mut got = self
            .read_frame(&mut samples)
            .await
            .map_err(|e| io_err(&self.path, e))?;
        if !got && self.loop_playback && self.produced > 0 {
            tracing::debug!(path = %self.path.display(), "replay looping");
            self.file
                .seek(io::SeekFrom::Start(0))
                .await
                .map_err(|e| io_err(&self.path, e))?;
            got = self
                .read_frame(&mut samples)
                .await
                .map_err(|e| io_err(&self.path, e))?;
        }
        if !got {
            self.spare.push(samples);
            return Ok(None);
        }

        self.produced += 1;
        Ok(Some(BinaryFrame::new(self.width, self.height, samples)?))
    }

    fn release(&mut self, frame: BinaryFrame) {
        self.spare.push(frame.into_samples());
    }
}

// ── Selection ─────────────────────────────────────────────────────────────────

/// The provider named by `[source]`.
#[derive(Debug)]
pub enum ConfiguredProvider {
    Synthetic(SyntheticProvider),
    RawFile(RawFileProvider),
}

impl ConfiguredProvider {
    /// Open the `[source]` section. Synthetic markers are drawn with the
    /// detection marker value so the scanner can see them.
    pub async fn from_config(config: &TagcastConfig) -> Result<Self, ProviderError> {
        let source = &config.source;
        match source.kind {
            SourceKind::Synthetic => Ok(Self::Synthetic(
                SyntheticProvider::new(source).with_marker_value(config.detection.marker_value),
            )),
            SourceKind::RawFile => {
                let path = source.path.as_deref().ok_or(ProviderError::MissingPath)?;
                Ok(Self::RawFile(RawFileProvider::open(path, source).await?))
            }
        }
    }
}

impl FrameProvider for ConfiguredProvider {
    async fn acquire(&mut self) -> Result<Option<BinaryFrame>, ProviderError> {
        match self {
            Self::Synthetic(p) => p.acquire().await,
            Self::RawFile(p) => p.acquire().await,
        }
    }

    fn release(&mut self, frame: BinaryFrame) {
        match self {
            Self::Synthetic(p) => p.release(frame),
            Self::RawFile(p) => p.release(frame),
        }
    }
}
