use serde::{Deserialize, Serialize};
use std::time::Instant;

/// One captured image, backed by a buffer borrowed from the camera's pool.
///
/// Not `Clone`: a frame has exactly one owner and goes back to the pool
/// through [`Camera::release`](super::Camera::release).
#[derive(Debug)]
pub struct Frame {
    /// Pooled buffer holding the pixel or JPEG bytes
    pub(crate) buf: Vec<u8>,

    /// Id of the pool `buf` came from, 0 for detached frames
    pub(crate) pool: u64,

    /// Frame metadata
    pub meta: FrameMetadata,

    /// When the sensor was asked for this frame
    pub timestamp: Instant,
}

/// Frame metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

/// What a sensor reports about the image it just wrote
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readout {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

/// Pixel formats we support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    Jpeg,
    /// 16 bits per pixel, big-endian as the sensor emits it
    Rgb565,
    Rgb888,
    /// Packed YUYV
    Yuv422,
    Grayscale,
}

impl PixelFormat {
    /// Bytes per pixel for raw formats, `None` for compressed ones
    pub fn bytes_per_pixel(self) -> Option<usize> {
        match self {
            PixelFormat::Jpeg => None,
            PixelFormat::Rgb565 | PixelFormat::Yuv422 => Some(2),
            PixelFormat::Rgb888 => Some(3),
            PixelFormat::Grayscale => Some(1),
        }
    }
}

impl Frame {
    pub fn data(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn format(&self) -> PixelFormat {
        self.meta.format
    }

    /// Build a frame outside any pool, for encoder tests and tooling
    pub fn detached(data: Vec<u8>, width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            buf: data,
            pool: 0,
            meta: FrameMetadata {
                sequence: 0,
                width,
                height,
                format,
            },
            timestamp: Instant::now(),
        }
    }
}
