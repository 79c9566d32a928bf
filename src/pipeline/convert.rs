//! Stride-aware conversion from RGB-family layouts to packed YUV 4:2:2.
//!
//! Every path writes `[Y0, U, Y1, V]` per horizontal pixel pair. Rows are
//! `2 * width` bytes, so an odd width ends each row with a lone `[Y, U]`
//! whose chroma comes from the last column paired with itself.

use std::borrow::Cow;

use crate::errors::ConvertError;

use super::format::{ByteOrder, Conversion, SourceFormat, SINK_BYTES_PER_PIXEL};

/// Copies rows into a tightly packed buffer when `stride` carries padding.
///
/// Rows are located by direct indexing (`row * stride`), never by the chunk
/// size, and the result is exactly `width * height * bytes_per_pixel` long.
pub fn depad<'a>(
    src: &'a [u8],
    stride: usize,
    format: &SourceFormat,
) -> Result<Cow<'a, [u8]>, ConvertError> {
    let row_bytes = format.packed_row_bytes();
    let packed_len = format.packed_frame_len();
    let stride = stride.max(row_bytes);

    let needed = format.min_frame_len(stride);
    if src.len() < needed {
        return Err(ConvertError::SourceTooShort {
            actual: src.len(),
            expected: needed,
        });
    }

    if stride == row_bytes {
        return Ok(Cow::Borrowed(&src[..packed_len]));
    }

    let mut packed = Vec::with_capacity(packed_len);
    for row in 0..format.height() as usize {
        let start = row * stride;
        packed.extend_from_slice(&src[start..start + row_bytes]);
    }
    Ok(Cow::Owned(packed))
}

/// Converts one frame into the caller's scratch buffer.
///
/// Allocates its intermediates per call; [`YuyvConverter`] reuses them.
pub fn convert_to_yuyv(
    src: &[u8],
    stride: usize,
    format: &SourceFormat,
    dst: &mut [u8],
) -> Result<(), ConvertError> {
    YuyvConverter::new().convert(src, stride, format, dst)
}

/// Conversion engine holding the normalisation buffer between frames.
#[derive(Debug, Default)]
pub struct YuyvConverter {
    argb: Vec<u8>,
}

impl YuyvConverter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn convert(
        &mut self,
        src: &[u8],
        stride: usize,
        format: &SourceFormat,
        dst: &mut [u8],
    ) -> Result<(), ConvertError> {
        let expected = format.geometry.yuyv_frame_len();
        if dst.len() != expected {
            return Err(ConvertError::ScratchSize {
                actual: dst.len(),
                expected,
            });
        }
        if format.geometry.is_empty() {
            return Ok(());
        }

        let packed = depad(src, stride, format)?;
        let width = format.width() as usize;

        match format.layout.conversion() {
            Conversion::DirectArgb => argb_to_yuyv(&packed, width, dst),
            Conversion::BgrxArithmetic => bgrx_to_yuyv(&packed, width, dst),
            Conversion::Normalize(order) => {
                self.argb.resize(format.geometry.pixel_count() * 4, 0);
                normalize_to_argb(&packed, order, &mut self.argb);
                argb_to_yuyv(&self.argb, width, dst);
            }
        }
        Ok(())
    }
}

/// Rewrites tightly packed pixels into `[A, R, G, B]` byte order.
pub fn normalize_to_argb(src: &[u8], order: ByteOrder, argb: &mut [u8]) {
    for (pixel, out) in src
        .chunks_exact(order.bytes_per_pixel)
        .zip(argb.chunks_exact_mut(4))
    {
        out[0] = 0xFF;
        out[1] = pixel[order.red];
        out[2] = pixel[order.green];
        out[3] = pixel[order.blue];
    }
}

#[inline]
fn clamp_u8(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}

/// BT.601 studio-range luma.
#[inline]
pub fn studio_y(r: u8, g: u8, b: u8) -> u8 {
    let (r, g, b) = (r as i32, g as i32, b as i32);
    clamp_u8((66 * r + 129 * g + 25 * b + 0x1080) >> 8)
}

#[inline]
pub fn studio_u(r: u8, g: u8, b: u8) -> u8 {
    let (r, g, b) = (r as i32, g as i32, b as i32);
    clamp_u8((112 * b - 74 * g - 38 * r + 0x8080) >> 8)
}

#[inline]
pub fn studio_v(r: u8, g: u8, b: u8) -> u8 {
    let (r, g, b) = (r as i32, g as i32, b as i32);
    clamp_u8((112 * r - 94 * g - 18 * b + 0x8080) >> 8)
}

#[inline]
fn avg_round_up(a: u8, b: u8) -> u8 {
    ((a as u16 + b as u16 + 1) >> 1) as u8
}

fn argb_to_yuyv(argb: &[u8], width: usize, dst: &mut [u8]) {
    let row_in = width * 4;
    let row_out = width * SINK_BYTES_PER_PIXEL;

    for (src_row, dst_row) in argb.chunks_exact(row_in).zip(dst.chunks_exact_mut(row_out)) {
        let mut x = 0;
        while x < width {
            let p0 = &src_row[x * 4..x * 4 + 4];
            let p1 = if x + 1 < width {
                &src_row[(x + 1) * 4..(x + 1) * 4 + 4]
            } else {
                p0
            };

            let r = avg_round_up(p0[1], p1[1]);
            let g = avg_round_up(p0[2], p1[2]);
            let b = avg_round_up(p0[3], p1[3]);

            let out = x * 2;
            dst_row[out] = studio_y(p0[1], p0[2], p0[3]);
            dst_row[out + 1] = studio_u(r, g, b);
            if x + 1 < width {
                dst_row[out + 2] = studio_y(p1[1], p1[2], p1[3]);
                dst_row[out + 3] = studio_v(r, g, b);
            }
            x += 2;
        }
    }
}

/// Full-swing luma used by the `[B, G, R, X]` path.
#[inline]
pub fn bgrx_y(r: i32, g: i32, b: i32) -> u8 {
    clamp_u8((77 * r + 150 * g + 29 * b) >> 8)
}

#[inline]
pub fn bgrx_u(r: i32, g: i32, b: i32) -> u8 {
    clamp_u8(((-38 * r - 74 * g + 112 * b) >> 8) + 128)
}

#[inline]
pub fn bgrx_v(r: i32, g: i32, b: i32) -> u8 {
    clamp_u8(((112 * r - 94 * g - 18 * b) >> 8) + 128)
}

fn bgrx_to_yuyv(bgrx: &[u8], width: usize, dst: &mut [u8]) {
    let row_in = width * 4;
    let row_out = width * SINK_BYTES_PER_PIXEL;

    for (src_row, dst_row) in bgrx.chunks_exact(row_in).zip(dst.chunks_exact_mut(row_out)) {
        let mut x = 0;
        while x < width {
            let i0 = x * 4;
            let i1 = if x + 1 < width { i0 + 4 } else { i0 };

            let (b0, g0, r0) = (src_row[i0] as i32, src_row[i0 + 1] as i32, src_row[i0 + 2] as i32);
            let (b1, g1, r1) = (src_row[i1] as i32, src_row[i1 + 1] as i32, src_row[i1 + 2] as i32);

            let r_avg = (r0 + r1) / 2;
            let g_avg = (g0 + g1) / 2;
            let b_avg = (b0 + b1) / 2;

            let out = x * 2;
            dst_row[out] = bgrx_y(r0, g0, b0);
            dst_row[out + 1] = bgrx_u(r_avg, g_avg, b_avg);
            if x + 1 < width {
                dst_row[out + 2] = bgrx_y(r1, g1, b1);
                dst_row[out + 3] = bgrx_v(r_avg, g_avg, b_avg);
            }
            x += 2;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::format::SourceLayout;

    fn solid(format: &SourceFormat, r: u8, g: u8, b: u8) -> Vec<u8> {
        let order = format.layout.byte_order();
        let mut pixel = vec![0u8; order.bytes_per_pixel];
        pixel[order.red] = r;
        pixel[order.green] = g;
        pixel[order.blue] = b;
        pixel.repeat(format.geometry.pixel_count())
    }

    #[test]
    fn test_scratch_size_mismatch_is_rejected() {
        let format = SourceFormat::new(4, 2, SourceLayout::Bgrx);
        let src = vec![0u8; 32];
        let mut dst = vec![0u8; 15];

        let result = convert_to_yuyv(&src, 16, &format, &mut dst);
        assert_eq!(
            result,
            Err(ConvertError::ScratchSize {
                actual: 15,
                expected: 16
            })
        );
    }

    #[test]
    fn test_short_source_is_rejected() {
        let format = SourceFormat::new(4, 2, SourceLayout::Rgbx);
        let src = vec![0u8; 20];
        let mut dst = vec![0u8; 16];

        assert!(matches!(
            convert_to_yuyv(&src, 16, &format, &mut dst),
            Err(ConvertError::SourceTooShort { .. })
        ));
    }

    #[test]
    fn test_depad_borrows_tight_rows() {
        let format = SourceFormat::new(2, 2, SourceLayout::Rgb);
        let src: Vec<u8> = (0..12).collect();

        let packed = depad(&src, 6, &format).unwrap();
        assert!(matches!(packed, Cow::Borrowed(_)));
        assert_eq!(&packed[..], &src[..]);
    }

    #[test]
    fn test_depad_drops_row_padding() {
        let format = SourceFormat::new(2, 3, SourceLayout::Rgb);
        // 6 pixel bytes + 2 padding bytes per row; last row unpadded.
        let src: Vec<u8> = vec![
            1, 2, 3, 4, 5, 6, 0xEE, 0xEE, //
            7, 8, 9, 10, 11, 12, 0xEE, 0xEE, //
            13, 14, 15, 16, 17, 18,
        ];

        let packed = depad(&src, 8, &format).unwrap();
        assert_eq!(packed.len(), 18);
        assert_eq!(&packed[..], &(1..=18).collect::<Vec<u8>>()[..]);
    }

    #[test]
    fn test_black_converts_to_studio_black() {
        let format = SourceFormat::new(2, 1, SourceLayout::Xrgb);
        let src = vec![0u8; 8];
        let mut dst = vec![0u8; 4];

        convert_to_yuyv(&src, 8, &format, &mut dst).unwrap();
        assert_eq!(dst, vec![16, 128, 16, 128]);
    }

    #[test]
    fn test_bgrx_white_is_full_swing() {
        let format = SourceFormat::new(2, 1, SourceLayout::Bgrx);
        let src = vec![0xFF; 8];
        let mut dst = vec![0u8; 4];

        convert_to_yuyv(&src, 8, &format, &mut dst).unwrap();
        assert_eq!(dst[0], 255);
        assert_eq!(dst[2], 255);
        assert_eq!(dst[1], 128);
        assert_eq!(dst[3], 128);
    }

    #[test]
    fn test_normalized_layouts_agree() {
        let reference = {
            let format = SourceFormat::new(4, 2, SourceLayout::Argb);
            let mut dst = vec![0u8; 16];
            convert_to_yuyv(&solid(&format, 200, 40, 90), format.stride as usize, &format, &mut dst)
                .unwrap();
            dst
        };

        for layout in SourceLayout::ALL {
            if layout == SourceLayout::Bgrx {
                continue;
            }
            let format = SourceFormat::new(4, 2, layout);
            let mut dst = vec![0u8; 16];
            convert_to_yuyv(&solid(&format, 200, 40, 90), format.stride as usize, &format, &mut dst)
                .unwrap();
            assert_eq!(dst, reference, "layout {} disagrees with ARGB", layout);
        }
    }

    #[test]
    fn test_odd_width_duplicates_last_column() {
        let format = SourceFormat::new(3, 1, SourceLayout::Xrgb);
        let src = vec![
            0xFF, 0, 0, 0, //
            0xFF, 0, 0, 0, //
            0xFF, 250, 10, 10,
        ];
        let mut dst = vec![0u8; 6];

        convert_to_yuyv(&src, 12, &format, &mut dst).unwrap();
        assert_eq!(dst[4], studio_y(250, 10, 10));
        assert_eq!(dst[5], studio_u(250, 10, 10));
    }

    #[test]
    fn test_converter_reuses_buffer_between_frames() {
        let format = SourceFormat::new(6, 4, SourceLayout::Bgra);
        let src = solid(&format, 12, 34, 56);
        let mut converter = YuyvConverter::new();
        let mut first = vec![0u8; 48];
        let mut second = vec![0u8; 48];

        converter.convert(&src, 24, &format, &mut first).unwrap();
        converter.convert(&src, 24, &format, &mut second).unwrap();
        assert_eq!(first, second);
    }
}
