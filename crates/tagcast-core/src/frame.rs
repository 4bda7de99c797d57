//! Binary frames: the thresholded camera buffer the scanner reads.
//!
//! Frames arrive already reduced to two intensities: background (0) and the
//! marker value (255 by default). Nothing in this crate thresholds.

/// Sample value of a foreground (marker) pixel.
pub const MARKER_VALUE: u8 = 255;

/// A width×height buffer of single-byte samples, row-major.
///
/// Owned by the frame provider between cycles and by the pipeline during one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryFrame {
    width: u16,
    height: u16,
    samples: Vec<u8>,
}

impl BinaryFrame {
    /// Wrap an existing sample buffer. `samples.len()` must equal `width * height`.
    pub fn new(width: u16, height: u16, samples: Vec<u8>) -> Result<Self, FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::Empty { width, height });
        }
        let expected = width as usize * height as usize;
        if samples.len() != expected {
            return Err(FrameError::SizeMismatch {
                expected,
                actual: samples.len(),
            });
        }
        Ok(Self {
            width,
            height,
            samples,
        })
    }

    /// An all-background frame.
    pub fn blank(width: u16, height: u16) -> Result<Self, FrameError> {
        Self::new(width, height, vec![0u8; width as usize * height as usize])
    }

    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn height(&self) -> u16 {
        self.height
    }

    pub fn samples(&self) -> &[u8] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// One row of samples. Panics if `y >= height`.
    pub fn row(&self, y: u16) -> &[u8] {
        let start = y as usize * self.width as usize;
        &self.samples[start..start + self.width as usize]
    }

    /// Mutable access for providers refilling a recycled buffer.
    pub fn samples_mut(&mut self) -> &mut [u8] {
        &mut self.samples
    }

    /// Reset every sample to background.
    pub fn clear(&mut self) {
        self.samples.fill(0);
    }

    /// Fill an axis-aligned rectangle, clipped to the frame.
    ///
    /// `x0`/`y0` may be negative or past the edge; only the overlap is written.
    pub fn fill_rect(&mut self, x0: i32, y0: i32, w: u32, h: u32, value: u8) {
        let width = self.width as i64;
        let height = self.height as i64;
        let x_start = (x0 as i64).clamp(0, width);
        let x_end = (x0 as i64 + w as i64).clamp(0, width);
        let y_start = (y0 as i64).clamp(0, height);
        let y_end = (y0 as i64 + h as i64).clamp(0, height);
        if x_start >= x_end || y_start >= y_end {
            return;
        }
        for y in y_start..y_end {
            let row = (y * width) as usize;
            self.samples[row + x_start as usize..row + x_end as usize].fill(value);
        }
    }

    /// Fill a `side`×`side` square whose center pixel is `(cx, cy)`.
    ///
    /// The square spans `[cx - side/2, cx - side/2 + side)` on both axes.
    pub fn fill_square(&mut self, cx: i32, cy: i32, side: u32, value: u8) {
        let half = (side / 2) as i32;
        self.fill_rect(cx - half, cy - half, side, side, value);
    }

    pub fn into_samples(self) -> Vec<u8> {
        self.samples
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("frame has no samples ({width}x{height})")]
    Empty { width: u16, height: u16 },

    #[error("sample buffer holds {actual} bytes, expected {expected}")]
    SizeMismatch { expected: usize, actual: usize },
}
