//! tagcast wire format: one datagram per detection.
//!
//! A datagram is a fixed 12-byte header followed by `window_width²` raw
//! pixel bytes, row-major. There is no length prefix: the receiver derives
//! the payload size from `window_width`.
//!
//! All multi-byte fields are little-endian. The two reserved bytes at offset
//! 6 keep the 32-bit sequence field where a natural C layout of the same
//! header puts it, so the layout matches firmware that memcpy'd its struct.

use static_assertions::assert_eq_size;
use zerocopy::byteorder::{LittleEndian, U16, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

// ── Packet Header ───────────────────────────────────────────────────────────

/// Header preceding every window payload.
///
/// Wire size: 12 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct PacketHeader {
    /// Side length of the square window in pixels.
    pub window_width: U16<LittleEndian>,

    /// Frame column of the detection center.
    pub center_x: U16<LittleEndian>,

    /// Frame row of the detection center.
    pub center_y: U16<LittleEndian>,

    /// Must be zero on send. Ignored on receive.
    pub reserved: U16<LittleEndian>,

    /// Frame sequence number, for correlating windows from the same frame.
    pub sequence: U32<LittleEndian>,
}

// Compile-time size guard. If this fails, the wire format has silently changed.
assert_eq_size!(PacketHeader, [u8; 12]);

impl PacketHeader {
    pub fn new(window_width: u16, center_x: u16, center_y: u16, sequence: u32) -> Self {
        Self {
            window_width: U16::new(window_width),
            center_x: U16::new(center_x),
            center_y: U16::new(center_y),
            reserved: U16::new(0),
            sequence: U32::new(sequence),
        }
    }

    pub fn window_width(&self) -> u16 {
        self.window_width.get()
    }

    pub fn center_x(&self) -> u16 {
        self.center_x.get()
    }

    pub fn center_y(&self) -> u16 {
        self.center_y.get()
    }

    pub fn sequence(&self) -> u32 {
        self.sequence.get()
    }

    /// Number of payload bytes this header announces.
    pub fn payload_len(&self) -> usize {
        let w = self.window_width() as usize;
        w * w
    }
}

// ── Constants ─────────────────────────────────────────────────────────────────

/// Header size in bytes.
pub const HEADER_LEN: usize = std::mem::size_of::<PacketHeader>();

/// Largest UDP payload over IPv4.
pub const MAX_DATAGRAM: usize = 65_507;

/// Largest window side whose datagram still fits in `MAX_DATAGRAM`.
pub const MAX_WINDOW: u16 = 255;

const _: () = assert!(HEADER_LEN + (MAX_WINDOW as usize) * (MAX_WINDOW as usize) <= MAX_DATAGRAM);

/// Total datagram length for a window of side `window_width`.
pub fn datagram_len(window_width: u16) -> usize {
    let w = window_width as usize;
    HEADER_LEN + w * w
}

// ── Decoding ──────────────────────────────────────────────────────────────────

/// Split a received datagram into its header and pixel payload.
///
/// The payload length must match the header exactly; trailing bytes are an
/// error rather than being silently ignored.
pub fn decode_packet(datagram: &[u8]) -> Result<(PacketHeader, &[u8]), WireError> {
    let header = PacketHeader::read_from_prefix(datagram).ok_or(WireError::Truncated {
        len: datagram.len(),
    })?;
    if header.window_width() == 0 {
        return Err(WireError::EmptyWindow);
    }
    let payload = &datagram[HEADER_LEN..];
    let expected = header.payload_len();
    if payload.len() != expected {
        return Err(WireError::LengthMismatch {
            expected,
            actual: payload.len(),
        });
    }
    Ok((header, payload))
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when producing or interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("datagram of {len} bytes is shorter than the {}-byte header", HEADER_LEN)]
    Truncated { len: usize },

    #[error("header announces a zero-width window")]
    EmptyWindow,

    #[error("payload is {actual} bytes, header announces {expected}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("window width {window} exceeds transmit buffer capacity {max}")]
    WindowTooLarge { window: u16, max: u16 },
}

// ── Tests ─────────────────────────────────────────────────────────────────────
