use std::time::Duration;
use thiserror::Error;

/// Errors from XDG Desktop Portal interactions.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PortalError {
    #[error("XDG Desktop Portal is not available")]
    Unavailable,
    #[error("User cancelled the screen selection")]
    UserCancelled,
    #[error("Portal session failed: {0}")]
    SessionFailed(String),
    #[error("Portal returned no streams")]
    NoStreams,
    #[error("Portal operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("Shutdown requested while waiting for the portal")]
    Interrupted,
}

/// Errors from the PipeWire transport.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StreamError {
    #[error("Failed to initialize PipeWire: {0}")]
    InitFailed(String),
    #[error("Failed to connect stream: {0}")]
    ConnectFailed(String),
    #[error("Unsupported video format: {0}")]
    UnsupportedFormat(String),
    #[error("Failed to parse video format: {0}")]
    FormatParse(String),
}

/// Errors from the V4L2 output device.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("V4L2 device not found: {0}")]
    NotFound(String),
    #[error("Permission denied for {0}, try adding user to the 'video' group")]
    PermissionDenied(String),
    #[error("Failed to open V4L2 device: {0}")]
    Open(String),
    #[error("Failed to set V4L2 format: {0}")]
    Format(String),
    #[error("Failed to write frame: {0}")]
    Write(#[from] std::io::Error),
    #[error("Short write: {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },
}

/// Errors from the GPU buffer import path. None of these stop the pipeline.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ImportError {
    #[error("GPU context unavailable: {0}")]
    ContextUnavailable(String),
    #[error("DMA-BUF import is not supported by this EGL display")]
    Unsupported,
    #[error("Invalid DMA-BUF file descriptor {0}")]
    InvalidFd(i64),
    #[error("Failed to create EGLImage: 0x{0:x}")]
    CreateImage(i32),
    #[error("Failed to bind EGLImage to texture: 0x{0:x}")]
    BindTexture(u32),
    #[error("Framebuffer incomplete: 0x{0:x}")]
    IncompleteFramebuffer(u32),
    #[error("Readback buffer too small: {actual} < {required}")]
    BufferTooSmall { actual: usize, required: usize },
    #[error("glReadPixels failed: 0x{0:x}")]
    Readback(u32),
}

/// Reasons a delivered buffer could not be turned into a frame view.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AcquireError {
    #[error("Unsupported buffer memory type {0}")]
    UnsupportedMemory(u32),
    #[error("DMA-BUF is not mappable and GPU import is unavailable")]
    NotMappable,
    #[error("Failed to map buffer: {0}")]
    MapFailed(String),
    #[error("Empty chunk")]
    EmptyChunk,
    #[error("Frame exceeds buffer: need {needed} bytes from offset {offset}, buffer has {available}")]
    OutOfBounds {
        offset: usize,
        needed: usize,
        available: usize,
    },
    #[error("No format negotiated yet")]
    NoFormat,
}

/// Errors from the pixel conversion engine.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConvertError {
    #[error("Scratch buffer is {actual} bytes, expected {expected}")]
    ScratchSize { actual: usize, expected: usize },
    #[error("Source holds {actual} bytes, expected at least {expected}")]
    SourceTooShort { actual: usize, expected: usize },
}

/// Errors from configuration loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read settings file: {0}")]
    Read(#[from] std::io::Error),
    #[error("Failed to parse settings: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid setting: {0}")]
    Invalid(String),
}

/// Top-level error type for the bridge.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error(transparent)]
    Portal(#[from] PortalError),
    #[error(transparent)]
    Stream(#[from] StreamError),
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Pipeline failed: {0}")]
    Pipeline(String),
}

impl BridgeError {
    /// Process exit code for an error that ends the program.
    pub fn exit_code(&self) -> i32 {
        match self {
            BridgeError::Config(_) => 1,
            BridgeError::Portal(PortalError::Interrupted) => 0,
            _ => 2,
        }
    }
}
