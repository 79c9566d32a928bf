//! Debug-level pixel inspection for troubleshooting format mismatches.

use std::fmt::Write as _;
use std::time::{Duration, Instant};

use tracing::Level;

use super::acquire::FrameView;
use super::format::SourceFormat;

const DUMPED_FRAMES: u32 = 3;
const DUMP_BYTES: usize = 32;
const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Default)]
pub struct FrameDiagnostics {
    dumped: u32,
    last_sample: Option<Instant>,
}

impl FrameDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Logs a byte dump for the first few frames and a colour sample once a second.
    pub fn observe(&mut self, view: &FrameView<'_>, format: &SourceFormat) {
        if !tracing::enabled!(target: "bridge", Level::DEBUG) {
            return;
        }

        if self.dumped < DUMPED_FRAMES {
            self.dumped += 1;
            dump_frame(view, format);
        }

        let due = self
            .last_sample
            .map_or(true, |at| at.elapsed() >= SAMPLE_INTERVAL);
        if due {
            self.last_sample = Some(Instant::now());
            sample_colors(view, format);
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{:02X}", b);
    }
    out
}

fn pixel_at<'a>(view: &FrameView<'a>, format: &SourceFormat, x: u32, y: u32) -> Option<&'a [u8]> {
    let bpp = format.bytes_per_pixel();
    let offset = y as usize * view.stride + x as usize * bpp;
    view.data.get(offset..offset + bpp)
}

fn dump_frame(view: &FrameView<'_>, format: &SourceFormat) {
    let head = &view.data[..view.data.len().min(DUMP_BYTES)];
    tracing::debug!(
        target: "bridge",
        "[FRAME] {} {} stride={} (packed row {}) first bytes: {}",
        format.layout,
        format.geometry,
        view.stride,
        format.packed_row_bytes(),
        hex(head)
    );

    if format.height() > 1 {
        if let Some(second_row) = view.data.get(view.stride..view.stride + DUMP_BYTES.min(format.packed_row_bytes())) {
            tracing::debug!(target: "bridge", "[FRAME] Row 1 starts: {}", hex(second_row));
        }
    }
}

fn sample_colors(view: &FrameView<'_>, format: &SourceFormat) {
    let (w, h) = (format.width(), format.height());
    if let Some(center) = pixel_at(view, format, w / 2, h / 2) {
        tracing::debug!(target: "bridge", "[FRAME] Center pixel [{}]", hex(center));
    }

    if w > 20 && h > 20 {
        let corners = [(10, 10), (w - 10, 10), (10, h - 10), (w - 10, h - 10)];
        for (i, (x, y)) in corners.into_iter().enumerate() {
            if let Some(px) = pixel_at(view, format, x, y) {
                tracing::debug!(target: "bridge", "[FRAME] Corner {} [{}]", i, hex(px));
            }
        }
    }

    let order = format.layout.byte_order();
    let (mut black, mut white, mut other) = (0, 0, 0);
    for x in 0..w.min(100) {
        let Some(px) = pixel_at(view, format, x, 0) else {
            break;
        };
        let rgb = [px[order.red], px[order.green], px[order.blue]];
        match rgb {
            [0, 0, 0] => black += 1,
            [0xFF, 0xFF, 0xFF] => white += 1,
            _ => other += 1,
        }
    }
    tracing::debug!(
        target: "bridge",
        "[FRAME] First row: black={} white={} other={}",
        black,
        white,
        other
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_formatting() {
        assert_eq!(hex(&[0x00, 0xAB, 0xFF]), "00 AB FF");
        assert_eq!(hex(&[]), "");
    }

    #[test]
    fn test_pixel_lookup_respects_stride() {
        use crate::pipeline::format::SourceLayout;

        let format = SourceFormat::new(2, 2, SourceLayout::Rgb);
        let data: Vec<u8> = (0..16).collect();
        let view = FrameView {
            data: &data,
            stride: 8,
            len: data.len(),
        };

        assert_eq!(pixel_at(&view, &format, 1, 1), Some(&data[11..14]));
        assert_eq!(pixel_at(&view, &format, 2, 1), None);
    }
}
