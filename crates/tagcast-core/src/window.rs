//! Window extraction: cut a square around a candidate and packetize it.

use zerocopy::AsBytes;

use crate::frame::BinaryFrame;
use crate::region::DetectionCandidate;
use crate::wire::{datagram_len, PacketHeader, WireError};

/// Scratch space for one outgoing datagram.
///
/// Sized once for the largest window it will ever carry, so filling it never
/// reallocates. Each in-flight send owns its buffer exclusively.
#[derive(Debug)]
pub struct TransmitBuffer {
    data: Vec<u8>,
    max_window: u16,
}

impl TransmitBuffer {
    pub fn new(max_window: u16) -> Self {
        Self {
            data: Vec::with_capacity(datagram_len(max_window)),
            max_window,
        }
    }

    pub fn max_window(&self) -> u16 {
        self.max_window
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }
}

/// Write the header and window pixels for `candidate` into `out`.
///
/// The candidate must already have been proven in-bounds by the region
/// validator. Returns the datagram length.
pub fn extract_window(
    frame: &BinaryFrame,
    candidate: &DetectionCandidate,
    sequence: u32,
    out: &mut TransmitBuffer,
) -> Result<usize, WireError> {
    let w = candidate.window_width;
    if w > out.max_window {
        return Err(WireError::WindowTooLarge {
            window: w,
            max: out.max_window,
        });
    }

    let (ox, oy) = candidate.origin();
    let (w, ox, oy) = (w as usize, ox as usize, oy as usize);
    let stride = frame.width() as usize;
    debug_assert!(ox + w <= stride && oy + w <= frame.height() as usize);

    let header = PacketHeader::new(
        candidate.window_width,
        candidate.center_x,
        candidate.center_y,
        sequence,
    );

    out.data.clear();
    out.data.extend_from_slice(header.as_bytes());
    let samples = frame.samples();
    let mut start = oy * stride + ox;
    for _ in 0..w {
        out.data.extend_from_slice(&samples[start..start + w]);
        start += stride;
    }

    Ok(out.data.len())
}
