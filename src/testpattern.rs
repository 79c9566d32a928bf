//! SMPTE colour bars written straight to the sink, bypassing capture.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::pipeline::{FrameSink, Geometry, SinkWriter, WriteOutcome};

/// One YUYV macropixel `[Y0, U, Y1, V]` per bar, left to right:
/// white, yellow, cyan, green, magenta, red, blue, black.
pub const BARS: [[u8; 4]; 8] = [
    [235, 128, 235, 128],
    [210, 16, 210, 146],
    [170, 166, 170, 16],
    [145, 54, 145, 34],
    [106, 202, 106, 222],
    [81, 90, 81, 240],
    [41, 240, 41, 110],
    [16, 128, 16, 128],
];

fn bar_at(x: u32, bar_width: u32) -> &'static [u8; 4] {
    let index = (x / bar_width).min(BARS.len() as u32 - 1);
    &BARS[index as usize]
}

/// Fills `dst` with eight vertical bars. `dst` must hold
/// `geometry.yuyv_frame_len()` bytes; an odd trailing column gets `[Y, U]`.
pub fn fill_color_bars(geometry: Geometry, dst: &mut [u8]) {
    let row_len = geometry.width as usize * 2;
    if row_len == 0 {
        return;
    }
    let bar_width = (geometry.width / BARS.len() as u32).max(1);

    let (first, rest) = dst.split_at_mut(row_len.min(dst.len()));
    for (pair, out) in first.chunks_mut(4).enumerate() {
        let bar = bar_at(pair as u32 * 2, bar_width);
        out.copy_from_slice(&bar[..out.len()]);
    }

    for row in rest.chunks_exact_mut(row_len) {
        row.copy_from_slice(first);
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PatternStats {
    pub frames_written: u64,
    pub write_failures: u64,
}

/// Writes colour bars at `fps` until `shutdown` is set or the writer gives up.
pub fn run_color_bars<S: FrameSink>(
    writer: &mut SinkWriter<S>,
    geometry: Geometry,
    fps: u32,
    shutdown: &AtomicBool,
) -> PatternStats {
    if let Err(e) = writer.configure(geometry, true) {
        tracing::warn!(target: "bridge", "[SINK] {}", e);
        tracing::warn!(target: "bridge", "[SINK] Trying to write without setting format");
    }

    let mut frame = vec![0u8; geometry.yuyv_frame_len()];
    fill_color_bars(geometry, &mut frame);

    let interval = Duration::from_secs(1) / fps.max(1);
    let mut stats = PatternStats::default();

    tracing::info!(
        target: "bridge",
        "[FRAME] Writing colour bars {} at {} fps ({} bytes per frame)",
        geometry,
        fps,
        frame.len()
    );

    while !shutdown.load(Ordering::SeqCst) {
        let started = Instant::now();

        match writer.write(&frame, true) {
            WriteOutcome::Written(n) => {
                stats.frames_written += 1;
                tracing::trace!(target: "bridge", "[SINK] Wrote {} colour bar bytes", n);
            }
            WriteOutcome::Tolerated { .. } => stats.write_failures += 1,
            WriteOutcome::ShutdownRequested => {
                stats.write_failures += 1;
                break;
            }
        }

        if let Some(remaining) = interval.checked_sub(started.elapsed()) {
            std::thread::sleep(remaining);
        }
    }

    tracing::info!(
        target: "bridge",
        "[FRAME] Colour bars stopped: written={} failures={}",
        stats.frames_written,
        stats.write_failures
    );
    stats
}
