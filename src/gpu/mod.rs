//! GPU buffer import.
//!
//! DMA-BUF frames are often tiled or compressed and cannot be read by a
//! plain `mmap`. An importer binds them as a texture and reads the pixels
//! back into host memory.

pub mod egl;

use crate::errors::ImportError;

pub use egl::EglImporter;

/// A GPU-resident frame as delivered by the transport. The importer never
/// owns or closes `fd`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaBufDescriptor {
    pub fd: i64,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub offset: u32,
    pub fourcc: u32,
}

impl DmaBufDescriptor {
    /// Bytes needed to hold the RGBA readback.
    pub fn readback_len(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}

pub trait DmaBufImporter {
    fn supports_import(&self) -> bool;

    /// Reads the buffer back as 8-bit RGBA rows of `width * 4` bytes into `out`.
    fn import(&mut self, desc: &DmaBufDescriptor, out: &mut [u8]) -> Result<(), ImportError>;
}

/// Creates the EGL importer, logging and returning `None` when the GPU
/// path is unavailable.
pub fn probe_importer() -> Option<Box<dyn DmaBufImporter>> {
    match EglImporter::new() {
        Ok(importer) => {
            tracing::info!(target: "bridge", "[GPU] DMA-BUF import enabled");
            Some(Box::new(importer))
        }
        Err(e) => {
            tracing::warn!(
                target: "bridge",
                "[GPU] DMA-BUF import disabled, falling back to mmap: {}",
                e
            );
            None
        }
    }
}
