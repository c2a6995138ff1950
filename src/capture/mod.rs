pub mod camera;
pub mod encoder;
pub mod frame;
pub mod pattern;
pub mod pool;
#[cfg(feature = "v4l2")]
pub mod v4l2;

use thiserror::Error;

pub use camera::{Camera, DynCamera, Sensor};
pub use encoder::{ensure_jpeg, EncodeError, EncodedChunk, JPEG_QUALITY};
pub use frame::{Frame, PixelFormat, Readout};

/// Frame acquisition failed. Ends the current stream, never the process.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("sensor failed to deliver a frame: {0}")]
    Sensor(String),

    #[error("sensor delivered an empty frame")]
    Empty,

    #[error("unsupported camera setup: {0}")]
    Unsupported(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
