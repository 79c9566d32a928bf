//! V4L2 loopback output and write-failure tracking.
//!
//! The device must already exist, e.g.:
//!
//! ```bash
//! sudo modprobe v4l2loopback devices=1 video_nr=10 card_label="GNOME Screen" exclusive_caps=1
//! ```

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use v4l::capability::Flags;
use v4l::format::FieldOrder;
use v4l::video::{Capture, Output};
use v4l::{Device, FourCC};

use crate::errors::SinkError;

use super::format::{Geometry, SINK_BYTES_PER_PIXEL, SINK_FOURCC};

/// Consecutive failed writes tolerated before shutdown is requested.
pub const MAX_CONSECUTIVE_WRITE_FAILURES: u32 = 5;

/// Destination for converted YUYV frames.
pub trait FrameSink {
    /// Sets the sink to `geometry` in packed YUV 4:2:2. Safe to repeat.
    fn set_format(&mut self, geometry: Geometry) -> Result<(), SinkError>;

    fn write_frame(&mut self, frame: &[u8]) -> Result<usize, SinkError>;
}

/// A v4l2loopback output device.
pub struct V4l2Sink {
    file: File,
    device: Device,
    output_capable: bool,
}

impl V4l2Sink {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref();
        let device_path = path.display().to_string();

        if !path.exists() {
            return Err(SinkError::NotFound(device_path));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::PermissionDenied {
                    SinkError::PermissionDenied(device_path.clone())
                } else {
                    SinkError::Open(e.to_string())
                }
            })?;

        let device = Device::with_path(path).map_err(|e| SinkError::Open(e.to_string()))?;

        let output_capable = match device.query_caps() {
            Ok(caps) => {
                tracing::info!(
                    target: "bridge",
                    "[SINK] {} ({}, driver {}): {:?}",
                    device_path,
                    caps.card,
                    caps.driver,
                    caps.capabilities
                );
                caps.capabilities.contains(Flags::VIDEO_OUTPUT)
            }
            Err(e) => {
                tracing::warn!(target: "bridge", "[SINK] Failed to query capabilities: {}", e);
                true
            }
        };

        tracing::info!(target: "bridge", "[SINK] Opened V4L2 device {}", device_path);

        Ok(Self {
            file,
            device,
            output_capable,
        })
    }
}

impl FrameSink for V4l2Sink {
    fn set_format(&mut self, geometry: Geometry) -> Result<(), SinkError> {
        let mut format = v4l::Format::new(geometry.width, geometry.height, FourCC::new(&SINK_FOURCC));
        format.field_order = FieldOrder::Progressive;
        format.stride = geometry.width * SINK_BYTES_PER_PIXEL as u32;
        format.size = geometry.yuyv_frame_len() as u32;

        let applied = if self.output_capable {
            Output::set_format(&self.device, &format)
        } else {
            Capture::set_format(&self.device, &format)
        }
        .map_err(|e| SinkError::Format(e.to_string()))?;

        if applied.fourcc != format.fourcc {
            return Err(SinkError::Format(format!(
                "device chose {} instead of YUYV",
                applied.fourcc
            )));
        }

        tracing::info!(
            target: "bridge",
            "[SINK] Format set: {}x{} YUYV",
            applied.width,
            applied.height
        );
        Ok(())
    }

    fn write_frame(&mut self, frame: &[u8]) -> Result<usize, SinkError> {
        let written = self.file.write(frame)?;
        if written != frame.len() {
            return Err(SinkError::ShortWrite {
                written,
                expected: frame.len(),
            });
        }
        Ok(written)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written(usize),
    /// Failed, but below the escalation threshold.
    Tolerated { consecutive_failures: u32 },
    ShutdownRequested,
}

/// Wraps a sink with configured geometry and failure escalation.
pub struct SinkWriter<S: FrameSink> {
    sink: S,
    geometry: Option<Geometry>,
    consecutive_failures: u32,
    frames_written: u64,
}

impl<S: FrameSink> SinkWriter<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            geometry: None,
            consecutive_failures: 0,
            frames_written: 0,
        }
    }

    /// Applies `geometry` unless it is already configured and `force` is false.
    pub fn configure(&mut self, geometry: Geometry, force: bool) -> Result<(), SinkError> {
        if !force && self.geometry == Some(geometry) {
            return Ok(());
        }
        self.geometry = None;
        self.sink.set_format(geometry)?;
        self.geometry = Some(geometry);
        Ok(())
    }

    pub fn write(&mut self, frame: &[u8], session_active: bool) -> WriteOutcome {
        match self.sink.write_frame(frame) {
            Ok(written) => {
                self.consecutive_failures = 0;
                self.frames_written += 1;
                tracing::trace!(target: "bridge", "[SINK] Wrote {} bytes", written);
                WriteOutcome::Written(written)
            }
            Err(e) => {
                self.consecutive_failures += 1;
                tracing::warn!(
                    target: "bridge",
                    "[SINK] Write failed ({} consecutive): {}",
                    self.consecutive_failures,
                    e
                );

                if !session_active {
                    tracing::info!(
                        target: "bridge",
                        "[SINK] Session is no longer active, stopping stream"
                    );
                    return WriteOutcome::ShutdownRequested;
                }
                if self.consecutive_failures >= MAX_CONSECUTIVE_WRITE_FAILURES {
                    tracing::error!(
                        target: "bridge",
                        "[SINK] {} consecutive write failures, assuming sharing stopped",
                        self.consecutive_failures
                    );
                    return WriteOutcome::ShutdownRequested;
                }
                WriteOutcome::Tolerated {
                    consecutive_failures: self.consecutive_failures,
                }
            }
        }
    }

    pub fn geometry(&self) -> Option<Geometry> {
        self.geometry
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct ScriptedSink {
        results: VecDeque<bool>,
        formats: Vec<Geometry>,
    }

    impl FrameSink for ScriptedSink {
        fn set_format(&mut self, geometry: Geometry) -> Result<(), SinkError> {
            self.formats.push(geometry);
            Ok(())
        }

        fn write_frame(&mut self, frame: &[u8]) -> Result<usize, SinkError> {
            if self.results.pop_front().unwrap_or(true) {
                Ok(frame.len())
            } else {
                Err(SinkError::Write(std::io::Error::from_raw_os_error(libc::EIO)))
            }
        }
    }

    fn writer(script: &[bool]) -> SinkWriter<ScriptedSink> {
        SinkWriter::new(ScriptedSink {
            results: script.iter().copied().collect(),
            formats: Vec::new(),
        })
    }

    #[test]
    fn test_single_failure_is_tolerated() {
        let mut writer = writer(&[false]);
        assert_eq!(
            writer.write(&[0; 4], true),
            WriteOutcome::Tolerated {
                consecutive_failures: 1
            }
        );
    }

    #[test]
    fn test_inactive_session_escalates_immediately() {
        let mut writer = writer(&[false]);
        assert_eq!(writer.write(&[0; 4], false), WriteOutcome::ShutdownRequested);
    }

    #[test]
    fn test_success_resets_counter() {
        let mut writer = writer(&[false, false, true]);
        writer.write(&[0; 4], true);
        writer.write(&[0; 4], true);
        assert_eq!(writer.consecutive_failures(), 2);

        assert_eq!(writer.write(&[0; 4], true), WriteOutcome::Written(4));
        assert_eq!(writer.consecutive_failures(), 0);
        assert_eq!(writer.frames_written(), 1);
    }

    #[test]
    fn test_configure_skips_unchanged_geometry() {
        let mut writer = writer(&[]);
        let geometry = Geometry::new(640, 480);

        writer.configure(geometry, false).unwrap();
        writer.configure(geometry, false).unwrap();
        assert_eq!(writer.sink().formats.len(), 1);

        writer.configure(geometry, true).unwrap();
        assert_eq!(writer.sink().formats.len(), 2);
        assert_eq!(writer.geometry(), Some(geometry));
    }
}
