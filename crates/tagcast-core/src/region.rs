//! Run-width region validation.
//!
//! Given a foreground sample found by the scan cursor, measure the
//! horizontal run it belongs to and decide whether it is a marker candidate
//! whose window fits entirely inside the frame. Rejections are ordinary
//! filtering outcomes, not errors.

use serde::{Deserialize, Serialize};

use crate::config::DetectionConfig;
use crate::frame::{BinaryFrame, MARKER_VALUE};
use crate::scan::ScanCursor;

/// How the window side is derived from the measured run width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum WindowPolicy {
    /// Every window has the same side.
    Fixed { width: u16 },
    /// Window side is `factor × run_width`.
    Proportional { factor: u16 },
}

impl WindowPolicy {
    /// Window side for a run of `run_width` pixels, never above `max_window`
    /// and never zero.
    pub fn window_width(&self, run_width: u16, max_window: u16) -> u16 {
        let raw = match *self {
            WindowPolicy::Fixed { width } => width as u32,
            WindowPolicy::Proportional { factor } => run_width as u32 * factor as u32,
        };
        raw.min(max_window as u32).max(1) as u16
    }
}

impl Default for WindowPolicy {
    fn default() -> Self {
        WindowPolicy::Fixed { width: 96 }
    }
}

/// A validated detection: the window to cut and where to center it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectionCandidate {
    pub center_x: u16,
    pub center_y: u16,
    pub window_width: u16,
}

impl DetectionCandidate {
    pub fn half_width(&self) -> u16 {
        self.window_width / 2
    }

    /// Top-left corner of the window in frame coordinates.
    pub fn origin(&self) -> (u16, u16) {
        let half = self.half_width();
        (self.center_x - half, self.center_y - half)
    }

    /// Whether frame pixel `(x, y)` falls inside this candidate's window.
    pub fn contains(&self, x: u16, y: u16) -> bool {
        let (ox, oy) = self.origin();
        let w = self.window_width as u32;
        let (x, y, ox, oy) = (x as u32, y as u32, ox as u32, oy as u32);
        x >= ox && x < ox + w && y >= oy && y < oy + w
    }

    /// Whether either window contains the other's center.
    pub fn overlaps(&self, other: &DetectionCandidate) -> bool {
        self.contains(other.center_x, other.center_y)
            || other.contains(self.center_x, self.center_y)
    }
}

/// Inclusive horizontal extent of a foreground run, in frame columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Run {
    pub left: u16,
    pub right: u16,
}

impl Run {
    pub fn width(&self) -> u16 {
        self.right - self.left + 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Run narrower than the minimum valid width.
    TooNarrow { run_width: u16 },
    /// The window would extend past a frame edge.
    Cropped { window_width: u16 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accepted(DetectionCandidate),
    Rejected(Rejection),
}

#[derive(Debug, Clone)]
pub struct RegionValidator {
    dec_rate: u16,
    min_valid_width: u16,
    marker_value: u8,
    window: WindowPolicy,
    max_window: u16,
}

impl RegionValidator {
    pub fn new(dec_rate: u16, min_valid_width: u16, window: WindowPolicy, max_window: u16) -> Self {
        Self {
            dec_rate: dec_rate.max(1),
            min_valid_width,
            marker_value: MARKER_VALUE,
            window,
            max_window,
        }
    }

    pub fn from_config(config: &DetectionConfig) -> Self {
        Self::new(
            config.dec_rate,
            config.min_valid_width,
            config.window,
            config.max_window,
        )
        .with_marker_value(config.marker_value)
    }

    pub fn with_marker_value(mut self, marker_value: u8) -> Self {
        self.marker_value = marker_value;
        self
    }

    pub fn dec_rate(&self) -> u16 {
        self.dec_rate
    }

    pub fn marker_value(&self) -> u8 {
        self.marker_value
    }

    pub fn max_window(&self) -> u16 {
        self.max_window
    }

    /// Measure the foreground run through flat offset `index`.
    ///
    /// Returns `None` when the sample at `index` is background.
    pub fn measure_run(&self, frame: &BinaryFrame, index: usize) -> Option<Run> {
        let width = frame.width() as usize;
        let px = index % width;
        let row = frame.row((index / width) as u16);
        if row[px] != self.marker_value {
            return None;
        }

        let mut right = px;
        while right + 1 < width && row[right + 1] == self.marker_value {
            right += 1;
        }
        let mut left = px;
        while left > 0 && row[left - 1] == self.marker_value {
            left -= 1;
        }
        Some(Run {
            left: left as u16,
            right: right as u16,
        })
    }

    /// Validate the sample under the cursor.
    ///
    /// On acceptance the cursor is fast-forwarded past the run so the same
    /// region is not detected again on the next step of this row.
    pub fn validate(&self, frame: &BinaryFrame, cursor: &mut ScanCursor) -> Verdict {
        let index = cursor.state().index as usize;
        let width = frame.width() as usize;
        let px = (index % width) as u16;
        let py = (index / width) as u16;

        let run = match self.measure_run(frame, index) {
            Some(run) if run.width() >= self.min_valid_width => run,
            other => {
                let run_width = other.map_or(0, |r| r.width());
                tracing::trace!(px, py, run_width, "region rejected: too narrow");
                return Verdict::Rejected(Rejection::TooNarrow { run_width });
            }
        };

        let window_width = self.window.window_width(run.width(), self.max_window);
        if !window_fits(frame, px, py, window_width) {
            tracing::trace!(px, py, window_width, "region rejected: window cropped");
            return Verdict::Rejected(Rejection::Cropped { window_width });
        }

        let ahead = run.right - px;
        if ahead >= self.dec_rate {
            cursor.skip_steps(ahead / self.dec_rate);
        }

        Verdict::Accepted(DetectionCandidate {
            center_x: px,
            center_y: py,
            window_width,
        })
    }
}

/// Whether a `window_width` square centered on `(px, py)` lies inside the frame.
pub fn window_fits(frame: &BinaryFrame, px: u16, py: u16, window_width: u16) -> bool {
    let half = (window_width / 2) as u32;
    let w = window_width as u32;
    let (px, py) = (px as u32, py as u32);
    if half > px || half > py {
        return false;
    }
    px - half + w <= frame.width() as u32 && py - half + w <= frame.height() as u32
}
