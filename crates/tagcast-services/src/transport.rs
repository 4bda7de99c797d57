//! Datagram transport: fire-and-forget sends to one fixed collector.
//!
//! The only delivery policy is retry-on-backpressure: a transient error
//! (socket buffer full, stack out of memory) is retried with exponential
//! backoff up to a bounded number of attempts. Everything else drops the
//! datagram.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

use tagcast_core::config::{RetryConfig, TransportConfig};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Try again shortly.
    #[error("transient send failure: {0}")]
    Transient(io::Error),
    /// Retrying will not help.
    #[error("send failed: {0}")]
    Fatal(io::Error),
}

impl TransportError {
    /// Sort an OS error into transient or fatal.
    pub fn classify(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::WouldBlock {
            return TransportError::Transient(err);
        }
        match err.raw_os_error() {
            Some(libc::ENOMEM) | Some(libc::ENOBUFS) | Some(libc::EAGAIN) => {
                TransportError::Transient(err)
            }
            _ => TransportError::Fatal(err),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Transient(_))
    }
}

/// Connectionless send to a destination fixed at construction.
pub trait Transport: Send + Sync + 'static {
    fn send(&self, datagram: &[u8]) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// UDP transport over a tokio socket.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    peer: SocketAddr,
}

impl UdpTransport {
    /// Bind the local socket. Must be called from within a tokio runtime.
    pub fn bind(config: &TransportConfig) -> Result<Self> {
        let socket = make_send_socket(config.bind, config.send_buffer_bytes)
            .context("failed to create send socket")?;
        let socket =
            UdpSocket::from_std(socket).context("failed to convert to tokio UdpSocket")?;
        tracing::info!(
            local = %socket.local_addr()?,
            peer = %config.peer,
            "udp transport ready"
        );
        Ok(Self {
            socket,
            peer: config.peer,
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl Transport for UdpTransport {
    async fn send(&self, datagram: &[u8]) -> Result<(), TransportError> {
        self.socket
            .send_to(datagram, self.peer)
            .await
            .map(|_| ())
            .map_err(TransportError::classify)
    }
}

/// Create a non-blocking UDP socket bound to `bind`.
fn make_send_socket(bind: SocketAddr, send_buffer_bytes: usize) -> Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::for_address(bind), Type::DGRAM, Some(Protocol::UDP))
        .context("socket()")?;
    if send_buffer_bytes > 0 {
        socket
            .set_send_buffer_size(send_buffer_bytes)
            .context("SO_SNDBUF")?;
    }
    socket.set_nonblocking(true).context("O_NONBLOCK")?;
    socket.bind(&bind.into()).context("bind()")?;
    Ok(socket.into())
}

// ── Retry ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 0 = unbounded.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_backoff: Duration::from_micros(config.initial_backoff_us),
            max_backoff: Duration::from_micros(config.max_backoff_us),
        }
    }

    /// Delay before retry number `attempt` (1-based), doubling each time.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(20);
        self.initial_backoff
            .saturating_mul(1u32 << shift)
            .min(self.max_backoff)
    }

    fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts != 0 && attempts >= self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("datagram dropped after {attempts} attempt(s): {error}")]
pub struct SendFailure {
    pub attempts: u32,
    pub error: TransportError,
}

/// Send one datagram, retrying transient failures per `policy`.
///
/// Returns the number of attempts it took.
pub async fn send_with_retry<T: Transport + ?Sized>(
    transport: &T,
    datagram: &[u8],
    policy: &RetryPolicy,
) -> Result<u32, SendFailure> {
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        match transport.send(datagram).await {
            Ok(()) => return Ok(attempts),
            Err(error) if error.is_transient() && !policy.exhausted(attempts) => {
                let delay = policy.backoff(attempts);
                tracing::trace!(attempts, ?delay, error = %error, "transient send failure, retrying");
                if delay.is_zero() {
                    tokio::task::yield_now().await;
                } else {
                    tokio::time::sleep(delay).await;
                }
            }
            Err(error) => return Err(SendFailure { attempts, error }),
        }
    }
}
