//! Guarantees every frame leaving the capture stage is JPEG

use std::borrow::Cow;
use std::ops::Deref;

use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, ImageError};
use thiserror::Error;

use super::frame::{Frame, PixelFormat};

/// Quality used when converting raw frames
pub const JPEG_QUALITY: u8 = 80;

/// JPEG bytes ready for transmission.
///
/// `Borrowed` aliases the frame it came from and cannot outlive it; the
/// frame still has to be released. `Owned` was produced by conversion and is
/// freed when dropped.
#[derive(Debug)]
pub enum EncodedChunk<'a> {
    Borrowed(&'a [u8]),
    Owned(Vec<u8>),
}

impl EncodedChunk<'_> {
    pub fn is_owned(&self) -> bool {
        matches!(self, EncodedChunk::Owned(_))
    }
}

impl Deref for EncodedChunk<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            EncodedChunk::Borrowed(bytes) => bytes,
            EncodedChunk::Owned(bytes) => bytes,
        }
    }
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("frame has no pixels")]
    Empty,

    #[error("frame buffer is {actual} bytes, expected {expected}")]
    BufferSize { expected: usize, actual: usize },

    #[error("JPEG compression failed: {0}")]
    Jpeg(#[from] ImageError),
}

/// Return the frame as JPEG, converting raw pixel formats at [`JPEG_QUALITY`].
///
/// Frames that are already JPEG come back as a zero-copy
/// [`EncodedChunk::Borrowed`].
pub fn ensure_jpeg(frame: &Frame) -> Result<EncodedChunk<'_>, EncodeError> {
    if frame.is_empty() {
        return Err(EncodeError::Empty);
    }

    let meta = frame.meta;
    let Some(bpp) = meta.format.bytes_per_pixel() else {
        return Ok(EncodedChunk::Borrowed(frame.data()));
    };

    let expected = meta.width as usize * meta.height as usize * bpp;
    if expected == 0 {
        return Err(EncodeError::Empty);
    }
    if frame.len() != expected {
        return Err(EncodeError::BufferSize {
            expected,
            actual: frame.len(),
        });
    }

    let (pixels, color): (Cow<'_, [u8]>, ColorType) = match meta.format {
        PixelFormat::Rgb888 => (Cow::Borrowed(frame.data()), ColorType::Rgb8),
        PixelFormat::Grayscale => (Cow::Borrowed(frame.data()), ColorType::L8),
        PixelFormat::Rgb565 => (Cow::Owned(rgb565_to_rgb8(frame.data())), ColorType::Rgb8),
        PixelFormat::Yuv422 => (Cow::Owned(yuyv_to_rgb8(frame.data())), ColorType::Rgb8),
        PixelFormat::Jpeg => unreachable!("compressed formats returned above"),
    };

    let mut out = Vec::with_capacity(frame.len() / 4);
    JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY).encode(
        &pixels,
        meta.width,
        meta.height,
        color.into(),
    )?;

    Ok(EncodedChunk::Owned(out))
}

/// Big-endian RGB565, the byte order the sensor emits
fn rgb565_to_rgb8(data: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(data.len() / 2 * 3);
    for px in data.chunks_exact(2) {
        let value = u16::from_be_bytes([px[0], px[1]]);
        let r = ((value >> 11) & 0x1F) as u8;
        let g = ((value >> 5) & 0x3F) as u8;
        let b = (value & 0x1F) as u8;
        rgb.extend_from_slice(&[(r << 3) | (r >> 2), (g << 2) | (g >> 4), (b << 3) | (b >> 2)]);
    }
    rgb
}

/// BT.601 YUYV to RGB
fn yuyv_to_rgb8(data: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(data.len() / 2 * 3);
    let mut quads = data.chunks_exact(4);
    for quad in &mut quads {
        let (y0, u, y1, v) = (quad[0], quad[1], quad[2], quad[3]);
        rgb.extend_from_slice(&yuv_to_rgb(y0, u, v));
        rgb.extend_from_slice(&yuv_to_rgb(y1, u, v));
    }
    // Odd pixel count: the last pixel has no V sample
    if let [y, u] = quads.remainder() {
        rgb.extend_from_slice(&yuv_to_rgb(*y, *u, 128));
    }
    rgb
}

fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = i32::from(y) - 16;
    let d = i32::from(u) - 128;
    let e = i32::from(v) - 128;

    let clamp = |x: i32| x.clamp(0, 255) as u8;
    [
        clamp((298 * c + 409 * e + 128) >> 8),
        clamp((298 * c - 100 * d - 208 * e + 128) >> 8),
        clamp((298 * c + 516 * d + 128) >> 8),
    ]
}
