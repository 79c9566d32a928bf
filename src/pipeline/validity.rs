//! Warm-up gating for freshly negotiated streams.
//!
//! The compositor tends to hand out a few zeroed buffers right after a
//! format change. [`WarmupGate`] drops a fixed number of frames per
//! negotiation, and [`NonBlackFilter`] rejects anything that still looks
//! uninitialised.

use super::acquire::FrameView;
use super::format::SourceFormat;

/// Frames skipped unconditionally after every format negotiation.
pub const WARMUP_FRAMES: u32 = 5;

/// Upper bound on sampled pixels per frame.
pub const MAX_SAMPLES: usize = 1000;

/// Decides whether a frame is worth writing.
pub trait FrameFilter {
    fn is_valid(&self, view: &FrameView<'_>, format: &SourceFormat) -> bool;
}

/// Grid-sampling heuristic: a frame passes when more than 1% of sampled
/// pixels have any non-zero colour byte.
#[derive(Debug, Default, Clone, Copy)]
pub struct NonBlackFilter;

impl FrameFilter for NonBlackFilter {
    fn is_valid(&self, view: &FrameView<'_>, format: &SourceFormat) -> bool {
        let stats = sample_grid(view.data, view.stride, format);
        stats.total > 0 && stats.non_black * 100 > stats.total
    }
}

/// Passes every frame.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

impl FrameFilter for AcceptAll {
    fn is_valid(&self, _view: &FrameView<'_>, _format: &SourceFormat) -> bool {
        true
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SampleStats {
    pub total: usize,
    pub non_black: usize,
}

pub fn sample_grid(data: &[u8], stride: usize, format: &SourceFormat) -> SampleStats {
    let width = format.width() as usize;
    let height = format.height() as usize;
    let bpp = format.bytes_per_pixel();
    let color_bytes = bpp.min(3);

    let row_step = if height > 100 { height / 100 } else { 1 };
    let col_step = if width > 10 { width / 10 } else { 1 };

    let mut stats = SampleStats::default();
    'rows: for y in (0..height).step_by(row_step) {
        for x in (0..width).step_by(col_step) {
            if stats.total >= MAX_SAMPLES {
                break 'rows;
            }
            let offset = y * stride + x * bpp;
            let Some(pixel) = data.get(offset..offset + color_bytes) else {
                continue;
            };
            stats.total += 1;
            if pixel.iter().any(|&b| b != 0) {
                stats.non_black += 1;
            }
        }
    }
    stats
}

/// Counts the unconditional skips after each negotiation.
#[derive(Debug, Clone)]
pub struct WarmupGate {
    remaining: u32,
    frames: u32,
}

impl WarmupGate {
    pub fn new(frames: u32) -> Self {
        Self {
            remaining: frames,
            frames,
        }
    }

    pub fn reset(&mut self) {
        self.remaining = self.frames;
    }

    /// Returns true while the frame should be skipped, consuming one slot.
    pub fn should_skip(&mut self) -> bool {
        if self.remaining > 0 {
            self.remaining -= 1;
            true
        } else {
            false
        }
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }
}

impl Default for WarmupGate {
    fn default() -> Self {
        Self::new(WARMUP_FRAMES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::format::SourceLayout;

    fn view(data: &[u8], stride: usize) -> FrameView<'_> {
        FrameView {
            data,
            stride,
            len: data.len(),
        }
    }

    #[test]
    fn test_all_black_frame_is_rejected() {
        let format = SourceFormat::new(64, 64, SourceLayout::Bgrx);
        let data = vec![0u8; 64 * 64 * 4];
        assert!(!NonBlackFilter.is_valid(&view(&data, 256), &format));
    }

    #[test]
    fn test_alpha_only_pixels_count_as_black() {
        let format = SourceFormat::new(16, 16, SourceLayout::Rgba);
        let data = [0u8, 0, 0, 0xFF].repeat(16 * 16);
        assert!(!NonBlackFilter.is_valid(&view(&data, 64), &format));
    }

    #[test]
    fn test_mostly_colored_frame_is_accepted() {
        let format = SourceFormat::new(32, 32, SourceLayout::Rgb);
        let data = vec![0x40u8; 32 * 32 * 3];
        assert!(NonBlackFilter.is_valid(&view(&data, 96), &format));
    }

    #[test]
    fn test_sampling_is_bounded() {
        let format = SourceFormat::new(1920, 1080, SourceLayout::Bgrx);
        let data = vec![1u8; 1920 * 1080 * 4];
        let stats = sample_grid(&data, 1920 * 4, &format);
        assert!(stats.total <= MAX_SAMPLES);
        assert_eq!(stats.non_black, stats.total);
    }

    #[test]
    fn test_accept_all_passes_black() {
        let format = SourceFormat::new(8, 8, SourceLayout::Bgrx);
        assert!(AcceptAll.is_valid(&view(&[0u8; 256], 32), &format));
    }

    #[test]
    fn test_warmup_gate_skips_five_then_resets() {
        let mut gate = WarmupGate::default();
        let skipped = (0..7).filter(|_| gate.should_skip()).count();
        assert_eq!(skipped, 5);
        assert_eq!(gate.remaining(), 0);

        gate.reset();
        assert!(gate.should_skip());
        assert_eq!(gate.remaining(), 4);
    }
}
