//! Per-frame processing: acquire, gate, convert, write.
//!
//! Runs entirely on the transport thread. Owns the negotiated format and
//! every buffer sized from it, so scratch size and sink geometry can only
//! change together in [`FrameProcessor::on_format_changed`].

use crate::errors::{AcquireError, ConvertError};
use crate::gpu::DmaBufImporter;

use super::acquire::{acquire, InboundBuffer};
use super::convert::YuyvConverter;
use super::diagnostics::FrameDiagnostics;
use super::format::SourceFormat;
use super::sink::{FrameSink, SinkWriter, WriteOutcome};
use super::validity::{FrameFilter, NonBlackFilter, WarmupGate};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatOutcome {
    /// Geometry changed; sink and scratch were reconfigured.
    Reconfigured,
    /// Same geometry; only layout or stride were updated.
    Unchanged,
    /// Unusable format or sink refused it; no format is active.
    Rejected,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    NoFormat,
    Warmup { remaining: u32 },
    Unavailable(AcquireError),
    Invalid,
    Convert(ConvertError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    Written(usize),
    Skipped(SkipReason),
    /// Write failed below the escalation threshold.
    WriteFailed,
    ShutdownRequested,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FrameStats {
    pub received: u64,
    pub written: u64,
    pub skipped: u64,
    pub write_failures: u64,
}

pub struct FrameProcessor<S: FrameSink> {
    writer: SinkWriter<S>,
    importer: Option<Box<dyn DmaBufImporter>>,
    filter: Box<dyn FrameFilter>,
    format: Option<SourceFormat>,
    scratch: Vec<u8>,
    readback: Vec<u8>,
    converter: YuyvConverter,
    warmup: WarmupGate,
    diagnostics: FrameDiagnostics,
    stats: FrameStats,
}

impl<S: FrameSink> FrameProcessor<S> {
    pub fn new(writer: SinkWriter<S>, importer: Option<Box<dyn DmaBufImporter>>) -> Self {
        Self {
            writer,
            importer,
            filter: Box::new(NonBlackFilter),
            format: None,
            scratch: Vec::new(),
            readback: Vec::new(),
            converter: YuyvConverter::new(),
            warmup: WarmupGate::default(),
            diagnostics: FrameDiagnostics::new(),
            stats: FrameStats::default(),
        }
    }

    /// Replaces the validity heuristic.
    pub fn with_filter(mut self, filter: Box<dyn FrameFilter>) -> Self {
        self.filter = filter;
        self
    }

    pub fn on_format_changed(&mut self, format: SourceFormat) -> FormatOutcome {
        if format.geometry.is_empty() {
            tracing::warn!(target: "bridge", "[PIPEWIRE] Ignoring empty geometry {}", format.geometry);
            return FormatOutcome::Rejected;
        }

        let geometry_changed = self.format.map(|f| f.geometry) != Some(format.geometry);

        if geometry_changed {
            if let Err(e) = self.writer.configure(format.geometry, false) {
                tracing::error!(target: "bridge", "[SINK] Failed to update V4L2 format: {}", e);
                self.format = None;
                self.scratch = Vec::new();
                return FormatOutcome::Rejected;
            }
            self.scratch = vec![0u8; format.geometry.yuyv_frame_len()];
            tracing::debug!(
                target: "bridge",
                "[FRAME] Conversion buffer allocated: {} bytes",
                self.scratch.len()
            );
        }

        self.format = Some(format);
        self.warmup.reset();

        tracing::info!(
            target: "bridge",
            "[PIPEWIRE] Format {} {} (initial stride estimate {})",
            format.layout,
            format.geometry,
            format.stride
        );

        if geometry_changed {
            FormatOutcome::Reconfigured
        } else {
            FormatOutcome::Unchanged
        }
    }

    pub fn on_buffer(&mut self, buffer: InboundBuffer<'_>, session_active: bool) -> FrameOutcome {
        self.stats.received += 1;

        let outcome = self.process(buffer, session_active);
        match &outcome {
            FrameOutcome::Written(_) => self.stats.written += 1,
            FrameOutcome::Skipped(reason) => {
                self.stats.skipped += 1;
                tracing::trace!(target: "bridge", "[FRAME] Skipped: {:?}", reason);
            }
            FrameOutcome::WriteFailed | FrameOutcome::ShutdownRequested => {
                self.stats.write_failures += 1
            }
        }
        outcome
    }

    fn process(&mut self, buffer: InboundBuffer<'_>, session_active: bool) -> FrameOutcome {
        let Some(format) = self.format else {
            return FrameOutcome::Skipped(SkipReason::NoFormat);
        };

        if self.warmup.should_skip() {
            tracing::debug!(
                target: "bridge",
                "[FRAME] Skipping warm-up frame ({} left)",
                self.warmup.remaining()
            );
            return FrameOutcome::Skipped(SkipReason::Warmup {
                remaining: self.warmup.remaining(),
            });
        }

        let frame = match acquire(&buffer, &format, self.importer.as_deref_mut(), &mut self.readback) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(target: "bridge", "[FRAME] Dropping frame: {}", e);
                return FrameOutcome::Skipped(SkipReason::Unavailable(e));
            }
        };

        let expected = frame.stride() * format.height() as usize;
        if buffer.chunk.size as usize != expected {
            tracing::debug!(
                target: "bridge",
                "[FRAME] Chunk size {} != stride * height {}",
                buffer.chunk.size,
                expected
            );
        }

        let view = frame.view();
        self.diagnostics.observe(&view, &format);

        if !self.filter.is_valid(&view, &format) {
            tracing::debug!(target: "bridge", "[FRAME] Skipping mostly black frame");
            return FrameOutcome::Skipped(SkipReason::Invalid);
        }

        if let Err(e) = self
            .converter
            .convert(view.data, view.stride, &format, &mut self.scratch)
        {
            tracing::warn!(target: "bridge", "[FRAME] Conversion failed: {}", e);
            return FrameOutcome::Skipped(SkipReason::Convert(e));
        }
        drop(frame);

        match self.writer.write(&self.scratch, session_active) {
            WriteOutcome::Written(n) => FrameOutcome::Written(n),
            WriteOutcome::Tolerated { .. } => FrameOutcome::WriteFailed,
            WriteOutcome::ShutdownRequested => FrameOutcome::ShutdownRequested,
        }
    }

    pub fn format(&self) -> Option<&SourceFormat> {
        self.format.as_ref()
    }

    pub fn scratch_len(&self) -> usize {
        self.scratch.len()
    }

    pub fn has_importer(&self) -> bool {
        self.importer.is_some()
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    pub fn writer(&self) -> &SinkWriter<S> {
        &self.writer
    }
}
