//! Source pixel layouts and the sink's fixed output format.
//!
//! Every transport format the bridge accepts maps to exactly one [`SourceLayout`].
//! Bytes-per-pixel, the DRM fourcc used for GPU import and the conversion
//! routine are all derived from that one enum.

use pipewire::spa::param::video::VideoFormat;

/// FourCC written to the V4L2 device: packed YUV 4:2:2.
pub const SINK_FOURCC: [u8; 4] = *b"YUYV";

/// Bytes per pixel of the sink format.
pub const SINK_BYTES_PER_PIXEL: usize = 2;

const fn fourcc(code: &[u8; 4]) -> u32 {
    (code[0] as u32) | ((code[1] as u32) << 8) | ((code[2] as u32) << 16) | ((code[3] as u32) << 24)
}

pub const DRM_FORMAT_XRGB8888: u32 = fourcc(b"XR24");
pub const DRM_FORMAT_XBGR8888: u32 = fourcc(b"XB24");
pub const DRM_FORMAT_RGBX8888: u32 = fourcc(b"RX24");
pub const DRM_FORMAT_BGRX8888: u32 = fourcc(b"BX24");
pub const DRM_FORMAT_ARGB8888: u32 = fourcc(b"AR24");
pub const DRM_FORMAT_ABGR8888: u32 = fourcc(b"AB24");
pub const DRM_FORMAT_RGBA8888: u32 = fourcc(b"RA24");
pub const DRM_FORMAT_BGRA8888: u32 = fourcc(b"BA24");

/// Pixel layouts the transport may negotiate. Names give byte order in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceLayout {
    Rgbx,
    Bgrx,
    Xrgb,
    Xbgr,
    Rgba,
    Bgra,
    Argb,
    Abgr,
    Rgb,
    Bgr,
}

/// How a layout reaches packed YUV 4:2:2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    /// Already `[A, R, G, B]`; one YUV step.
    DirectArgb,
    /// Byte shuffle into `[A, R, G, B]`, then the YUV step.
    Normalize(ByteOrder),
    /// Per-pixel integer arithmetic straight from `[B, G, R, X]`.
    BgrxArithmetic,
}

/// Positions of the red, green and blue bytes inside one source pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteOrder {
    pub bytes_per_pixel: usize,
    pub red: usize,
    pub green: usize,
    pub blue: usize,
}

impl SourceLayout {
    pub const ALL: [SourceLayout; 10] = [
        SourceLayout::Rgbx,
        SourceLayout::Bgrx,
        SourceLayout::Xrgb,
        SourceLayout::Xbgr,
        SourceLayout::Rgba,
        SourceLayout::Bgra,
        SourceLayout::Argb,
        SourceLayout::Abgr,
        SourceLayout::Rgb,
        SourceLayout::Bgr,
    ];

    pub fn from_video_format(format: VideoFormat) -> Option<Self> {
        match format {
            VideoFormat::RGBx => Some(SourceLayout::Rgbx),
            VideoFormat::BGRx => Some(SourceLayout::Bgrx),
            VideoFormat::xRGB => Some(SourceLayout::Xrgb),
            VideoFormat::xBGR => Some(SourceLayout::Xbgr),
            VideoFormat::RGBA => Some(SourceLayout::Rgba),
            VideoFormat::BGRA => Some(SourceLayout::Bgra),
            VideoFormat::ARGB => Some(SourceLayout::Argb),
            VideoFormat::ABGR => Some(SourceLayout::Abgr),
            VideoFormat::RGB => Some(SourceLayout::Rgb),
            VideoFormat::BGR => Some(SourceLayout::Bgr),
            _ => None,
        }
    }

    pub fn video_format(self) -> VideoFormat {
        match self {
            SourceLayout::Rgbx => VideoFormat::RGBx,
            SourceLayout::Bgrx => VideoFormat::BGRx,
            SourceLayout::Xrgb => VideoFormat::xRGB,
            SourceLayout::Xbgr => VideoFormat::xBGR,
            SourceLayout::Rgba => VideoFormat::RGBA,
            SourceLayout::Bgra => VideoFormat::BGRA,
            SourceLayout::Argb => VideoFormat::ARGB,
            SourceLayout::Abgr => VideoFormat::ABGR,
            SourceLayout::Rgb => VideoFormat::RGB,
            SourceLayout::Bgr => VideoFormat::BGR,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SourceLayout::Rgbx => "RGBx",
            SourceLayout::Bgrx => "BGRx",
            SourceLayout::Xrgb => "xRGB",
            SourceLayout::Xbgr => "xBGR",
            SourceLayout::Rgba => "RGBA",
            SourceLayout::Bgra => "BGRA",
            SourceLayout::Argb => "ARGB",
            SourceLayout::Abgr => "ABGR",
            SourceLayout::Rgb => "RGB",
            SourceLayout::Bgr => "BGR",
        }
    }

    pub fn bytes_per_pixel(self) -> usize {
        match self {
            SourceLayout::Rgb | SourceLayout::Bgr => 3,
            _ => 4,
        }
    }

    /// DRM fourcc for single-plane GPU import. 24-bit layouts have none.
    ///
    /// DRM codes name a little-endian word, so byte order `B,G,R,X` is `XRGB8888`.
    pub fn drm_fourcc(self) -> Option<u32> {
        match self {
            SourceLayout::Rgbx => Some(DRM_FORMAT_XBGR8888),
            SourceLayout::Bgrx => Some(DRM_FORMAT_XRGB8888),
            SourceLayout::Xrgb => Some(DRM_FORMAT_BGRX8888),
            SourceLayout::Xbgr => Some(DRM_FORMAT_RGBX8888),
            SourceLayout::Rgba => Some(DRM_FORMAT_ABGR8888),
            SourceLayout::Bgra => Some(DRM_FORMAT_ARGB8888),
            SourceLayout::Argb => Some(DRM_FORMAT_BGRA8888),
            SourceLayout::Abgr => Some(DRM_FORMAT_RGBA8888),
            SourceLayout::Rgb | SourceLayout::Bgr => None,
        }
    }

    pub fn byte_order(self) -> ByteOrder {
        let (bytes_per_pixel, red, green, blue) = match self {
            SourceLayout::Rgbx | SourceLayout::Rgba => (4, 0, 1, 2),
            SourceLayout::Bgrx | SourceLayout::Bgra => (4, 2, 1, 0),
            SourceLayout::Xrgb | SourceLayout::Argb => (4, 1, 2, 3),
            SourceLayout::Xbgr | SourceLayout::Abgr => (4, 3, 2, 1),
            SourceLayout::Rgb => (3, 0, 1, 2),
            SourceLayout::Bgr => (3, 2, 1, 0),
        };
        ByteOrder {
            bytes_per_pixel,
            red,
            green,
            blue,
        }
    }

    pub fn conversion(self) -> Conversion {
        match self {
            SourceLayout::Xrgb | SourceLayout::Argb => Conversion::DirectArgb,
            SourceLayout::Bgrx => Conversion::BgrxArithmetic,
            SourceLayout::Rgbx
            | SourceLayout::Rgba
            | SourceLayout::Bgra
            | SourceLayout::Xbgr
            | SourceLayout::Abgr
            | SourceLayout::Rgb
            | SourceLayout::Bgr => Conversion::Normalize(self.byte_order()),
        }
    }
}

impl std::fmt::Display for SourceLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Frame dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Geometry {
    pub width: u32,
    pub height: u32,
}

impl Geometry {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Bytes in one packed YUV 4:2:2 frame.
    pub fn yuyv_frame_len(&self) -> usize {
        self.pixel_count() * SINK_BYTES_PER_PIXEL
    }

    /// Bytes in one tightly packed RGBA readback.
    pub fn rgba_frame_len(&self) -> usize {
        self.pixel_count() * 4
    }
}

impl std::fmt::Display for Geometry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Negotiated source format. `stride` is advisory; each frame re-derives it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceFormat {
    pub geometry: Geometry,
    pub layout: SourceLayout,
    pub stride: u32,
}

impl SourceFormat {
    /// Format with the stride estimated as a tightly packed row.
    pub fn new(width: u32, height: u32, layout: SourceLayout) -> Self {
        let geometry = Geometry::new(width, height);
        Self {
            geometry,
            layout,
            stride: (width as usize * layout.bytes_per_pixel()) as u32,
        }
    }

    pub fn width(&self) -> u32 {
        self.geometry.width
    }

    pub fn height(&self) -> u32 {
        self.geometry.height
    }

    pub fn bytes_per_pixel(&self) -> usize {
        self.layout.bytes_per_pixel()
    }

    /// Row size without padding.
    pub fn packed_row_bytes(&self) -> usize {
        self.geometry.width as usize * self.bytes_per_pixel()
    }

    pub fn packed_frame_len(&self) -> usize {
        self.packed_row_bytes() * self.geometry.height as usize
    }

    /// Smallest buffer that holds every row at `stride`, ignoring the last row's padding.
    pub fn min_frame_len(&self, stride: usize) -> usize {
        if self.geometry.is_empty() {
            return 0;
        }
        stride * (self.geometry.height as usize - 1) + self.packed_row_bytes()
    }
}
