//! Decimated frame traversal and the per-frame scan phase.
//!
//! The cursor inspects every `dec_rate`-th column of every
//! `(row_skip + 1)`-th row. With the default stride of 4 and skip of 3 that
//! is one sample in sixteen, which is what keeps the scan inside a frame's
//! time budget on a small device.
//!
//! Scanning is single-threaded. Candidates are produced strictly in scan
//! order and handed to the caller as they are accepted.

use serde::Serialize;

use crate::config::DetectionConfig;
use crate::frame::BinaryFrame;
use crate::region::{DetectionCandidate, RegionValidator, Rejection, Verdict};

/// Position of the cursor: flat sample offset plus decimated column counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScanState {
    pub index: u32,
    pub column: u16,
}

/// Lazy, restartable traversal of one frame's sample offsets.
#[derive(Debug, Clone)]
pub struct ScanCursor {
    width: u32,
    len: u32,
    dec_rate: u32,
    row_skip: u32,
    columns: u16,
    state: ScanState,
    started: bool,
}

impl ScanCursor {
    pub fn new(width: u16, height: u16, dec_rate: u16, row_skip: u16) -> Self {
        let dec_rate = dec_rate.max(1);
        Self {
            width: width as u32,
            len: width as u32 * height as u32,
            dec_rate: dec_rate as u32,
            row_skip: row_skip as u32,
            columns: (width / dec_rate).max(1),
            state: ScanState::default(),
            started: false,
        }
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    /// Rewind to the first sample of the frame.
    pub fn reset(&mut self) {
        self.state = ScanState::default();
        self.started = false;
    }

    /// Place the cursor on `index` as if it had just been yielded.
    #[cfg(test)]
    pub(crate) fn seek(&mut self, index: u32) {
        let column = (index % self.width.max(1)) / self.dec_rate;
        self.state = ScanState {
            index,
            column: column as u16,
        };
        self.started = true;
    }

    /// Skip `steps` decimation strides along the current row.
    pub fn skip_steps(&mut self, steps: u16) {
        self.state.column = self.state.column.saturating_add(steps);
        self.state.index = self
            .state
            .index
            .saturating_add(self.dec_rate * steps as u32);
    }

    fn step(&mut self) {
        self.state.column += 1;
        if self.state.column >= self.columns {
            // Row done: jump to the start of the next scanned row.
            let row = (self.state.index / self.width) as u64;
            let next = (row + 1 + self.row_skip as u64) * self.width as u64;
            self.state.column = 0;
            self.state.index = next.min(self.len as u64) as u32;
        } else {
            self.state.index = self.state.index.saturating_add(self.dec_rate);
        }
    }
}

impl Iterator for ScanCursor {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        if self.started {
            if self.state.index >= self.len {
                return None;
            }
            self.step();
        } else {
            self.started = true;
        }
        (self.state.index < self.len).then_some(self.state.index)
    }
}

/// Outcome counts for one scan of one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ScanReport {
    /// Offsets the cursor visited.
    pub visited: u32,
    /// Visited offsets holding a foreground sample.
    pub foreground: u32,
    pub accepted: u32,
    pub too_narrow: u32,
    pub cropped: u32,
    /// Validated, but centered inside an already accepted window.
    pub suppressed: u32,
}

/// Cursor, validator, and overlap suppression bundled into the scan phase.
#[derive(Debug, Clone)]
pub struct Scanner {
    validator: RegionValidator,
    row_skip: u16,
    suppress_overlap: bool,
}

impl Scanner {
    pub fn new(validator: RegionValidator, row_skip: u16, suppress_overlap: bool) -> Self {
        Self {
            validator,
            row_skip,
            suppress_overlap,
        }
    }

    pub fn from_config(config: &DetectionConfig) -> Self {
        Self::new(
            RegionValidator::from_config(config),
            config.row_skip,
            config.suppress_overlap,
        )
    }

    pub fn validator(&self) -> &RegionValidator {
        &self.validator
    }

    /// Walk `frame`, calling `on_candidate` for every accepted candidate in
    /// scan order.
    pub fn scan_with<F>(&self, frame: &BinaryFrame, mut on_candidate: F) -> ScanReport
    where
        F: FnMut(DetectionCandidate),
    {
        let mut report = ScanReport::default();
        let mut accepted: Vec<DetectionCandidate> = Vec::new();
        let marker = self.validator.marker_value();
        let samples = frame.samples();
        let mut cursor = ScanCursor::new(
            frame.width(),
            frame.height(),
            self.validator.dec_rate(),
            self.row_skip,
        );

        while let Some(index) = cursor.next() {
            report.visited += 1;
            if samples[index as usize] != marker {
                continue;
            }
            report.foreground += 1;

            match self.validator.validate(frame, &mut cursor) {
                Verdict::Accepted(candidate) => {
                    if self.suppress_overlap
                        && accepted.iter().any(|a| a.overlaps(&candidate))
                    {
                        report.suppressed += 1;
                        tracing::trace!(
                            px = candidate.center_x,
                            py = candidate.center_y,
                            "candidate suppressed: overlaps accepted window"
                        );
                        continue;
                    }
                    report.accepted += 1;
                    accepted.push(candidate);
                    on_candidate(candidate);
                }
                Verdict::Rejected(Rejection::TooNarrow { .. }) => report.too_narrow += 1,
                Verdict::Rejected(Rejection::Cropped { .. }) => report.cropped += 1,
            }
        }

        report
    }

    /// Collect every accepted candidate of `frame`.
    pub fn scan(&self, frame: &BinaryFrame) -> (Vec<DetectionCandidate>, ScanReport) {
        let mut candidates = Vec::new();
        let report = self.scan_with(frame, |c| candidates.push(c));
        (candidates, report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::MARKER_VALUE;
    use crate::region::{window_fits, WindowPolicy};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn scanner(window: WindowPolicy, suppress_overlap: bool) -> Scanner {
        Scanner::new(RegionValidator::new(4, 4, window, 96), 3, suppress_overlap)
    }

    #[test]
    fn cursor_visits_every_fourth_column_of_every_fourth_row() {
        let offsets: Vec<u32> = ScanCursor::new(16, 16, 4, 3).collect();
        let expected: Vec<u32> = [0u32, 4, 8, 12]
            .iter()
            .flat_map(|row| [0u32, 4, 8, 12].map(|col| row * 16 + col))
            .collect();
        assert_eq!(offsets, expected);
    }

    #[test]
    fn cursor_realigns_when_width_is_not_a_stride_multiple() {
        let offsets: Vec<u32> = ScanCursor::new(10, 8, 4, 3).collect();
        assert_eq!(offsets, vec![0, 4, 40, 44]);
    }

    #[test]
    fn cursor_is_fused_and_restartable() {
        let mut cursor = ScanCursor::new(8, 8, 4, 3);
        let first: Vec<u32> = cursor.by_ref().collect();
        assert_eq!(cursor.next(), None);
        assert_eq!(cursor.next(), None);

        cursor.reset();
        let second: Vec<u32> = cursor.collect();
        assert_eq!(first, second);
    }

    #[test]
    fn blank_frame_yields_nothing() {
        let frame = BinaryFrame::blank(320, 240).unwrap();
        let (candidates, report) = scanner(WindowPolicy::Fixed { width: 96 }, true).scan(&frame);
        assert!(candidates.is_empty());
        assert_eq!(report.foreground, 0);
        assert_eq!(report.visited, 80 * 60);
    }

    #[test]
    fn single_block_is_detected_once() {
        let mut frame = BinaryFrame::blank(320, 240).unwrap();
        frame.fill_square(100, 100, 20, MARKER_VALUE);

        let (candidates, report) = scanner(WindowPolicy::Fixed { width: 96 }, true).scan(&frame);
        assert_eq!(candidates.len(), 1, "{report:?}");
        let c = candidates[0];
        assert!(c.center_x.abs_diff(100) <= 10 && c.center_y.abs_diff(100) <= 10);
        assert!(window_fits(&frame, c.center_x, c.center_y, c.window_width));
        // The whole block sits inside the window.
        assert!(c.contains(90, 90) && c.contains(109, 109));
        // The remaining scanned rows through the block were suppressed.
        assert_eq!(report.suppressed, 4);
    }

    #[test]
    fn small_window_still_reports_a_block_once() {
        let mut frame = BinaryFrame::blank(320, 240).unwrap();
        frame.fill_square(60, 60, 20, MARKER_VALUE);

        // Rows 52 and 68 both cross the block; 68 falls just outside a
        // 32-pixel window centered on row 52.
        let (candidates, report) = scanner(WindowPolicy::Fixed { width: 32 }, true).scan(&frame);
        assert_eq!(candidates.len(), 1, "{report:?}");
        assert_eq!((candidates[0].center_x, candidates[0].center_y), (52, 52));
        assert_eq!(report.suppressed, 4);
    }

    #[test]
    fn without_suppression_every_scanned_row_reports() {
        let mut frame = BinaryFrame::blank(320, 240).unwrap();
        frame.fill_square(100, 100, 20, MARKER_VALUE);

        let (candidates, _) = scanner(WindowPolicy::Fixed { width: 96 }, false).scan(&frame);
        let rows: Vec<u16> = candidates.iter().map(|c| c.center_y).collect();
        assert_eq!(rows, vec![92, 96, 100, 104, 108]);
        // Fast-forward keeps each row to a single report.
        assert!(candidates.iter().all(|c| c.center_x == 92));
    }

    #[test]
    fn block_near_corner_is_rejected_as_cropped() {
        let mut frame = BinaryFrame::blank(320, 240).unwrap();
        frame.fill_square(5, 5, 20, MARKER_VALUE);

        let (candidates, report) = scanner(WindowPolicy::Fixed { width: 96 }, true).scan(&frame);
        assert!(candidates.is_empty());
        assert!(report.cropped > 0);
        assert_eq!(report.too_narrow, 0);
    }

    #[test]
    fn two_disjoint_blocks_give_two_candidates_in_scan_order() {
        let mut frame = BinaryFrame::blank(320, 240).unwrap();
        frame.fill_square(80, 120, 20, MARKER_VALUE);
        frame.fill_square(240, 120, 20, MARKER_VALUE);

        let (candidates, _) = scanner(WindowPolicy::Fixed { width: 96 }, true).scan(&frame);
        assert_eq!(candidates.len(), 2);
        assert!(candidates[0].center_x < candidates[1].center_x);
        assert_eq!(candidates[0].center_y, candidates[1].center_y);
    }

    #[test]
    fn thin_lines_are_rejected_as_narrow() {
        let mut frame = BinaryFrame::blank(64, 64).unwrap();
        // Vertical line, 2 px wide: every scanned row hits a too-narrow run.
        frame.fill_rect(32, 0, 2, 64, MARKER_VALUE);
        let (candidates, report) = scanner(WindowPolicy::Fixed { width: 8 }, true).scan(&frame);
        assert!(candidates.is_empty());
        assert_eq!(report.too_narrow, 16);
        assert_eq!(report.cropped, 0);
    }

    #[test]
    fn rescanning_an_unchanged_frame_is_deterministic() {
        let frame = noisy_frame(160, 120, 0x5eed);
        let s = scanner(WindowPolicy::Proportional { factor: 3 }, true);
        let (a, ra) = s.scan(&frame);
        let (b, rb) = s.scan(&frame);
        assert_eq!(a, b);
        assert_eq!(ra, rb);
    }

    #[test]
    fn every_outcome_is_accounted_for_and_windows_stay_in_bounds() {
        for seed in 1..20u64 {
            let frame = noisy_frame(160, 120, seed);
            for policy in [
                WindowPolicy::Fixed { width: 24 },
                WindowPolicy::Proportional { factor: 4 },
            ] {
                let (candidates, report) = scanner(policy, seed % 2 == 0).scan(&frame);
                assert_eq!(
                    report.foreground,
                    report.accepted + report.too_narrow + report.cropped + report.suppressed
                );
                for c in &candidates {
                    let (ox, oy) = c.origin();
                    assert!(ox as u32 + c.window_width as u32 <= 160);
                    assert!(oy as u32 + c.window_width as u32 <= 120);
                }
            }
        }
    }

    /// Pseudo-random rectangles of foreground.
    fn noisy_frame(width: u16, height: u16, seed: u64) -> BinaryFrame {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut frame = BinaryFrame::blank(width, height).unwrap();
        for _ in 0..12 {
            let x = rng.gen_range(0..width as i32);
            let y = rng.gen_range(0..height as i32);
            let w = rng.gen_range(1..=24);
            let h = rng.gen_range(1..=24);
            frame.fill_rect(x, y, w, h, MARKER_VALUE);
        }
        frame
    }
}
