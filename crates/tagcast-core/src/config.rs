//! Configuration system for tagcast.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $TAGCAST_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/tagcast/config.toml
//!   3. ~/.config/tagcast/config.toml

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::frame::MARKER_VALUE;
use crate::region::WindowPolicy;
use crate::wire::MAX_WINDOW;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TagcastConfig {
    pub detection: DetectionConfig,
    pub transport: TransportConfig,
    pub source: SourceConfig,
    pub collector: CollectorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Horizontal decimation stride in samples.
    pub dec_rate: u16,
    /// Rows skipped between scanned rows.
    pub row_skip: u16,
    /// Runs narrower than this are noise.
    pub min_valid_width: u16,
    /// Sample value of foreground pixels.
    pub marker_value: u8,
    /// Upper bound on the window side; also sizes every transmit buffer.
    pub max_window: u16,
    /// Drop candidates centered inside an already accepted window.
    pub suppress_overlap: bool,
    pub window: WindowPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Collector address. Every datagram goes here.
    pub peer: SocketAddr,
    /// Local bind address for the send socket.
    pub bind: SocketAddr,
    /// SO_SNDBUF in bytes. 0 = OS default.
    pub send_buffer_bytes: usize,
    /// Max concurrent sends per frame. Also the transmit buffer pool size.
    pub max_in_flight: usize,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per datagram on transient errors. 0 = retry forever.
    pub max_attempts: u32,
    pub initial_backoff_us: u64,
    pub max_backoff_us: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Synthetic,
    RawFile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub kind: SourceKind,
    pub width: u16,
    pub height: u16,
    /// Frames per second. 0 = as fast as the pipeline drains.
    pub fps: u32,
    /// Stop after this many frames. 0 = unbounded.
    pub frames: u64,
    /// Synthetic: marker count and side length.
    pub markers: usize,
    pub marker_size: u16,
    pub seed: u64,
    /// Raw replay: file of concatenated width*height frames.
    pub path: Option<PathBuf>,
    /// Raw replay: start over at end of file.
    pub loop_playback: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    pub bind_address: String,
    /// Cameras listen on start_port .. start_port + cameras.
    pub start_port: u16,
    pub cameras: u16,
    /// Receive buffer per datagram, and decoded-window channel capacity.
    pub mtu: usize,
    pub channel_capacity: usize,
    /// Write every received window as PGM here. None = do not persist.
    pub output_dir: Option<PathBuf>,
    /// Append one JSON line of metadata per window. None = no index.
    pub index_file: Option<PathBuf>,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            dec_rate: 4,
            row_skip: 3,
            min_valid_width: 4,
            marker_value: MARKER_VALUE,
            max_window: 96,
            suppress_overlap: true,
            window: WindowPolicy::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            peer: SocketAddr::from(([127, 0, 0, 1], 3310)),
            bind: SocketAddr::from(([0, 0, 0, 0], 0)),
            send_buffer_bytes: 0,
            max_in_flight: 8,
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 16,
            initial_backoff_us: 50,
            max_backoff_us: 5_000,
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::Synthetic,
            width: 320,
            height: 240,
            fps: 0,
            frames: 0,
            markers: 2,
            marker_size: 20,
            seed: 452,
            path: None,
            loop_playback: false,
        }
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            start_port: 3310,
            cameras: 3,
            mtu: 100_000,
            channel_capacity: 1024,
            output_dir: None,
            index_file: None,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("tagcast")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: String,
    },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl TagcastConfig {
    /// Load config: env vars → file → defaults. The result is validated.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::file_path())
    }

    /// Like [`load`](Self::load), but for an explicit file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
            Self::from_toml(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?
        } else {
            TagcastConfig::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load config, using defaults (plus env overrides) when the file cannot
    /// be read. A file that parses to bad settings is still an error.
    pub fn load_or_default() -> Result<Self, ConfigError> {
        Self::load_or_default_from(&Self::file_path())
    }

    pub fn load_or_default_from(path: &Path) -> Result<Self, ConfigError> {
        match Self::load_from(path) {
            Err(ConfigError::ReadFailed(path, e)) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to read config, using defaults");
                let mut config = TagcastConfig::default();
                config.apply_env_overrides();
                config.validate()?;
                Ok(config)
            }
            other => other,
        }
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("TAGCAST_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&TagcastConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let d = &self.detection;
        if d.dec_rate == 0 {
            return Err(invalid("detection.dec_rate", "must be at least 1"));
        }
        if d.min_valid_width == 0 {
            return Err(invalid("detection.min_valid_width", "must be at least 1"));
        }
        if d.max_window == 0 || d.max_window > MAX_WINDOW {
            return Err(invalid(
                "detection.max_window",
                format!("must be in 1..={MAX_WINDOW} to fit one datagram"),
            ));
        }
        match d.window {
            WindowPolicy::Fixed { width: 0 } => {
                return Err(invalid("detection.window.width", "must be at least 1"))
            }
            WindowPolicy::Proportional { factor: 0 } => {
                return Err(invalid("detection.window.factor", "must be at least 1"))
            }
            _ => {}
        }
        if self.transport.max_in_flight == 0 {
            return Err(invalid("transport.max_in_flight", "must be at least 1"));
        }
        let r = &self.transport.retry;
        if r.initial_backoff_us > r.max_backoff_us {
            return Err(invalid(
                "transport.retry.initial_backoff_us",
                "must not exceed max_backoff_us",
            ));
        }
        let s = &self.source;
        if s.width == 0 || s.height == 0 {
            return Err(invalid("source.width/height", "must be non-zero"));
        }
        if s.kind == SourceKind::RawFile && s.path.is_none() {
            return Err(invalid("source.path", "required for raw_file sources"));
        }
        if self.collector.cameras == 0 {
            return Err(invalid("collector.cameras", "must be at least 1"));
        }
        if self
            .collector
            .start_port
            .checked_add(self.collector.cameras - 1)
            .is_none()
        {
            return Err(invalid("collector.start_port", "camera port range overflows"));
        }
        Ok(())
    }

    /// Apply TAGCAST_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("TAGCAST_TRANSPORT__PEER") {
            if let Ok(addr) = v.parse() {
                self.transport.peer = addr;
            }
        }
        if let Ok(v) = std::env::var("TAGCAST_DETECTION__DEC_RATE") {
            if let Ok(n) = v.parse() {
                self.detection.dec_rate = n;
            }
        }
        if let Ok(v) = std::env::var("TAGCAST_DETECTION__MIN_VALID_WIDTH") {
            if let Ok(n) = v.parse() {
                self.detection.min_valid_width = n;
            }
        }
        if let Ok(v) = std::env::var("TAGCAST_DETECTION__MAX_WINDOW") {
            if let Ok(n) = v.parse() {
                self.detection.max_window = n;
            }
        }
        if let Ok(v) = std::env::var("TAGCAST_SOURCE__KIND") {
            match v.as_str() {
                "synthetic" => self.source.kind = SourceKind::Synthetic,
                "raw_file" => self.source.kind = SourceKind::RawFile,
                _ => {}
            }
        }
        if let Ok(v) = std::env::var("TAGCAST_SOURCE__PATH") {
            self.source.path = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("TAGCAST_COLLECTOR__START_PORT") {
            if let Ok(p) = v.parse() {
                self.collector.start_port = p;
            }
        }
        if let Ok(v) = std::env::var("TAGCAST_COLLECTOR__OUTPUT_DIR") {
            self.collector.output_dir = Some(PathBuf::from(v));
        }
    }
}
