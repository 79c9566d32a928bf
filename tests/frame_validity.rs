//! Integration tests for the frame validity heuristic.
//!
//! Tests cover the 1% non-black threshold on a 720p grid, padded strides,
//! and replacing the filter on a processor.

use gnome_v4l2_lib::errors::SinkError;
use gnome_v4l2_lib::pipeline::acquire::{BufferMemory, ChunkInfo, FrameView, InboundBuffer};
use gnome_v4l2_lib::pipeline::validity::{sample_grid, AcceptAll, FrameFilter, NonBlackFilter};
use gnome_v4l2_lib::pipeline::{
    FrameOutcome, FrameProcessor, FrameSink, Geometry, SinkWriter, SkipReason, SourceFormat,
    SourceLayout,
};

const WIDTH: u32 = 1280;
const HEIGHT: u32 = 720;
const STRIDE: usize = WIDTH as usize * 4;

fn format() -> SourceFormat {
    SourceFormat::new(WIDTH, HEIGHT, SourceLayout::Bgrx)
}

fn black_frame() -> Vec<u8> {
    vec![0u8; STRIDE * HEIGHT as usize]
}

fn paint(frame: &mut [u8], x: usize, y: usize) {
    let offset = y * STRIDE + x * 4;
    frame[offset..offset + 3].copy_from_slice(&[0xFF, 0xFF, 0xFF]);
}

fn view(frame: &[u8]) -> FrameView<'_> {
    FrameView {
        data: frame,
        stride: STRIDE,
        len: frame.len(),
    }
}

// =============================================================================
// Threshold
// =============================================================================

#[test]
fn test_nearly_black_frame_is_rejected() {
    let mut frame = black_frame();
    paint(&mut frame, 0, 0);

    assert!(!NonBlackFilter.is_valid(&view(&frame), &format()));
}

#[test]
fn test_ten_percent_block_is_accepted() {
    let mut frame = black_frame();
    for y in 0..HEIGHT as usize {
        for x in 0..WIDTH as usize / 10 {
            paint(&mut frame, x, y);
        }
    }

    let stats = sample_grid(&frame, STRIDE, &format());
    assert_eq!(stats.total, 1000);
    assert!(stats.non_black >= 100);
    assert!(NonBlackFilter.is_valid(&view(&frame), &format()));
}

#[test]
fn test_exactly_one_percent_is_not_enough() {
    // The grid samples every 7th row and every 128th column.
    let mut frame = black_frame();
    for row in 0..10 {
        paint(&mut frame, 0, row * 7);
    }
    assert_eq!(sample_grid(&frame, STRIDE, &format()).non_black, 10);
    assert!(!NonBlackFilter.is_valid(&view(&frame), &format()));

    paint(&mut frame, 0, 70);
    assert!(NonBlackFilter.is_valid(&view(&frame), &format()));
}

#[test]
fn test_padding_bytes_are_not_sampled() {
    let format = SourceFormat::new(64, 64, SourceLayout::Bgrx);
    let stride = 64 * 4 + 64;
    let mut frame = vec![0u8; stride * 64];
    for row in frame.chunks_exact_mut(stride) {
        row[64 * 4..].fill(0xFF);
    }

    let view = FrameView {
        data: &frame,
        stride,
        len: frame.len(),
    };
    assert!(!NonBlackFilter.is_valid(&view, &format));
}

// =============================================================================
// Overriding the filter
// =============================================================================

#[derive(Default)]
struct CountingSink {
    written: usize,
}

impl FrameSink for CountingSink {
    fn set_format(&mut self, _geometry: Geometry) -> Result<(), SinkError> {
        Ok(())
    }

    fn write_frame(&mut self, frame: &[u8]) -> Result<usize, SinkError> {
        self.written += 1;
        Ok(frame.len())
    }
}

fn black_buffer(frame: &[u8]) -> InboundBuffer<'_> {
    InboundBuffer {
        memory: BufferMemory::Pointer(frame),
        chunk: ChunkInfo {
            offset: 0,
            size: frame.len() as u32,
            stride: 64,
        },
    }
}

#[test]
fn test_black_frames_pass_with_accept_all() {
    let frame = vec![0u8; 64 * 16];
    let format = SourceFormat::new(16, 16, SourceLayout::Bgrx);

    let mut strict = FrameProcessor::new(SinkWriter::new(CountingSink::default()), None);
    let mut lenient = FrameProcessor::new(SinkWriter::new(CountingSink::default()), None)
        .with_filter(Box::new(AcceptAll));
    strict.on_format_changed(format);
    lenient.on_format_changed(format);

    for _ in 0..5 {
        strict.on_buffer(black_buffer(&frame), true);
        lenient.on_buffer(black_buffer(&frame), true);
    }

    assert_eq!(
        strict.on_buffer(black_buffer(&frame), true),
        FrameOutcome::Skipped(SkipReason::Invalid)
    );
    assert_eq!(
        lenient.on_buffer(black_buffer(&frame), true),
        FrameOutcome::Written(16 * 16 * 2)
    );
    assert_eq!(lenient.writer().sink().written, 1);
}
