//! Turns one delivered buffer into a readable frame view.
//!
//! Buffers arrive as a plain pointer, a shared-memory fd or a DMA-BUF fd.
//! Anything that needs mapping is wrapped in a [`MappedRegion`] so the
//! mapping is released on every return path, and nothing here outlives
//! the transport callback that delivered the buffer.

use std::os::fd::RawFd;
use std::ptr::NonNull;

use crate::errors::AcquireError;
use crate::gpu::{DmaBufDescriptor, DmaBufImporter};

use super::format::SourceFormat;

/// Where a mappable buffer lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapSource {
    pub fd: i64,
    pub map_offset: u32,
    pub max_size: u32,
}

/// Chunk metadata the transport attaches to plane 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChunkInfo {
    pub offset: u32,
    pub size: u32,
    pub stride: i32,
}

#[derive(Debug)]
pub enum BufferMemory<'a> {
    /// Memory already mapped into this process by the transport.
    Pointer(&'a [u8]),
    SharedMemory(MapSource),
    DmaBuf { map: MapSource, mappable: bool },
    /// A memory type this bridge does not handle.
    Unsupported(u32),
}

#[derive(Debug)]
pub struct InboundBuffer<'a> {
    pub memory: BufferMemory<'a>,
    pub chunk: ChunkInfo,
}

/// Read-only private mapping, unmapped on drop.
#[derive(Debug)]
pub struct MappedRegion {
    base: NonNull<libc::c_void>,
    map_len: usize,
    /// Distance from the page-aligned mapping start to the requested offset.
    lead: usize,
    len: usize,
}

impl MappedRegion {
    pub fn map(source: &MapSource) -> Result<Self, AcquireError> {
        if source.fd < 0 || source.fd > RawFd::MAX as i64 {
            return Err(AcquireError::MapFailed(format!("invalid fd {}", source.fd)));
        }
        if source.max_size == 0 {
            return Err(AcquireError::MapFailed("zero-sized buffer".to_string()));
        }

        let page = page_size();
        let offset = source.map_offset as usize;
        let aligned = offset - offset % page;
        let lead = offset - aligned;
        let map_len = source.max_size as usize + lead;

        // SAFETY: fresh read-only private mapping; the kernel validates fd and range.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                map_len,
                libc::PROT_READ,
                libc::MAP_PRIVATE,
                source.fd as RawFd,
                aligned as libc::off_t,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(AcquireError::MapFailed(
                std::io::Error::last_os_error().to_string(),
            ));
        }
        let base = NonNull::new(ptr)
            .ok_or_else(|| AcquireError::MapFailed("mmap returned null".to_string()))?;

        Ok(Self {
            base,
            map_len,
            lead,
            len: source.max_size as usize,
        })
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the mapping covers `lead + len` readable bytes while self lives.
        unsafe {
            std::slice::from_raw_parts((self.base.as_ptr() as *const u8).add(self.lead), self.len)
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        // SAFETY: base/map_len came from a successful mmap and are unmapped once.
        unsafe {
            libc::munmap(self.base.as_ptr(), self.map_len);
        }
    }
}

fn page_size() -> usize {
    // SAFETY: sysconf has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as usize
    } else {
        4096
    }
}

/// Non-owning view of one frame's pixels. Valid for one callback only.
#[derive(Debug, Clone, Copy)]
pub struct FrameView<'a> {
    pub data: &'a [u8],
    pub stride: usize,
    pub len: usize,
}

/// How the frame's bytes were obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSource {
    Pointer,
    Mapped,
    GpuImport,
}

#[derive(Debug)]
enum Backing<'a> {
    Borrowed(&'a [u8]),
    Mapped(MappedRegion),
}

/// Owns whatever backs a frame for the duration of one callback.
#[derive(Debug)]
pub struct AcquiredFrame<'a> {
    backing: Backing<'a>,
    offset: usize,
    len: usize,
    stride: usize,
    source: FrameSource,
}

impl<'a> AcquiredFrame<'a> {
    pub fn view(&self) -> FrameView<'_> {
        let bytes = match &self.backing {
            Backing::Borrowed(bytes) => *bytes,
            Backing::Mapped(region) => region.as_slice(),
        };
        let data = &bytes[self.offset..self.offset + self.len];
        FrameView {
            data,
            stride: self.stride,
            len: self.len,
        }
    }

    pub fn source(&self) -> FrameSource {
        self.source
    }

    pub fn stride(&self) -> usize {
        self.stride
    }
}

/// Resolves the row stride: chunk stride if positive, else `size / height`,
/// else the packed row; never below the packed row.
pub fn resolve_stride(chunk: &ChunkInfo, format: &SourceFormat) -> usize {
    let min_stride = format.packed_row_bytes();
    let height = format.height() as usize;

    let stride = if chunk.stride > 0 {
        chunk.stride as usize
    } else if height > 0 && chunk.size > 0 {
        chunk.size as usize / height
    } else {
        min_stride
    };

    if stride < min_stride {
        tracing::debug!(
            target: "bridge",
            "[FRAME] Stride {} below minimum {}, clamping",
            stride,
            min_stride
        );
    }
    stride.max(min_stride)
}

/// Produces a frame for `buffer`, importing through `importer` for DMA-BUFs
/// when possible. `readback` holds the imported pixels.
pub fn acquire<'a>(
    buffer: &InboundBuffer<'a>,
    format: &SourceFormat,
    importer: Option<&mut (dyn DmaBufImporter + 'static)>,
    readback: &'a mut Vec<u8>,
) -> Result<AcquiredFrame<'a>, AcquireError> {
    match &buffer.memory {
        BufferMemory::Pointer(bytes) => {
            let stride = resolve_stride(&buffer.chunk, format);
            frame_from(
                Backing::Borrowed(*bytes),
                bytes.len(),
                buffer,
                format,
                stride,
                FrameSource::Pointer,
            )
        }
        BufferMemory::SharedMemory(map) => map_frame(map, buffer, format),
        BufferMemory::DmaBuf { map, mappable } => {
            if let Some(importer) = importer.filter(|i| i.supports_import()) {
                match import_frame(importer, map, buffer, format, readback) {
                    Ok(frame) => return Ok(frame),
                    Err(e) => {
                        tracing::debug!(target: "bridge", "[GPU] Import failed, trying mmap: {}", e);
                    }
                }
            }
            if !*mappable {
                return Err(AcquireError::NotMappable);
            }
            map_frame(map, buffer, format)
        }
        BufferMemory::Unsupported(kind) => Err(AcquireError::UnsupportedMemory(*kind)),
    }
}

fn map_frame<'a>(
    map: &MapSource,
    buffer: &InboundBuffer<'a>,
    format: &SourceFormat,
) -> Result<AcquiredFrame<'a>, AcquireError> {
    let region = MappedRegion::map(map)?;
    let available = region.len();
    let stride = resolve_stride(&buffer.chunk, format);
    frame_from(Backing::Mapped(region), available, buffer, format, stride, FrameSource::Mapped)
}

fn frame_from<'a>(
    backing: Backing<'a>,
    available: usize,
    buffer: &InboundBuffer<'a>,
    format: &SourceFormat,
    stride: usize,
    source: FrameSource,
) -> Result<AcquiredFrame<'a>, AcquireError> {
    if buffer.chunk.size == 0 {
        return Err(AcquireError::EmptyChunk);
    }

    let offset = buffer.chunk.offset as usize;
    let needed = format.min_frame_len(stride);
    if offset.saturating_add(needed) > available {
        return Err(AcquireError::OutOfBounds {
            offset,
            needed,
            available,
        });
    }

    Ok(AcquiredFrame {
        backing,
        offset,
        len: available - offset,
        stride,
        source,
    })
}

fn import_frame<'a>(
    importer: &mut dyn DmaBufImporter,
    map: &MapSource,
    buffer: &InboundBuffer<'a>,
    format: &SourceFormat,
    readback: &'a mut Vec<u8>,
) -> Result<AcquiredFrame<'a>, crate::errors::ImportError> {
    let fourcc = format
        .layout
        .drm_fourcc()
        .ok_or(crate::errors::ImportError::Unsupported)?;

    let stride = if buffer.chunk.stride > 0 {
        buffer.chunk.stride as u32
    } else {
        format.width() * 4
    };

    let desc = DmaBufDescriptor {
        fd: map.fd,
        width: format.width(),
        height: format.height(),
        stride,
        offset: map.map_offset,
        fourcc,
    };

    let required = desc.readback_len();
    if readback.len() < required {
        readback.resize(required, 0);
    }
    importer.import(&desc, readback)?;

    let readback: &'a [u8] = readback;
    Ok(AcquiredFrame {
        backing: Backing::Borrowed(readback),
        offset: 0,
        len: required,
        stride: format.width() as usize * 4,
        source: FrameSource::GpuImport,
    })
}
