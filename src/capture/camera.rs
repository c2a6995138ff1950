//! Frame source: a sensor plus the buffer pool its frames live in

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use tracing::{info, instrument, warn};

use super::frame::{Frame, FrameMetadata, PixelFormat, Readout};
use super::pattern::TestPattern;
use super::pool::FramePool;
use super::CaptureError;
use crate::{CameraConfig, SensorKind};

/// An imaging device that can write one image into a caller-provided buffer.
///
/// Implementations may block until the next frame is ready.
pub trait Sensor: Send {
    fn capture_into(&mut self, buf: &mut Vec<u8>) -> Result<Readout, CaptureError>;
}

impl<S: Sensor + ?Sized> Sensor for Box<S> {
    fn capture_into(&mut self, buf: &mut Vec<u8>) -> Result<Readout, CaptureError> {
        (**self).capture_into(buf)
    }
}

/// Camera chosen at runtime from [`CameraConfig::sensor`]
pub type DynCamera = Camera<Box<dyn Sensor>>;

/// Frame source with an internal buffer pool.
///
/// At most `buffer_count` frames are in flight; `acquire` blocks until a
/// previously acquired frame has been released.
pub struct Camera<S> {
    sensor: Mutex<S>,
    pool: FramePool,
    sequence: AtomicU64,
}

impl<S: Sensor> Camera<S> {
    pub fn new(sensor: S, buffer_count: usize, buffer_size: usize) -> Self {
        Self {
            sensor: Mutex::new(sensor),
            pool: FramePool::new(buffer_count.max(1), buffer_size),
            sequence: AtomicU64::new(0),
        }
    }

    /// Take the next frame. On failure no buffer is held by the caller.
    pub fn acquire(&self) -> Result<Frame, CaptureError> {
        let mut buf = self.pool.take();
        let timestamp = Instant::now();

        let readout = self
            .sensor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .capture_into(&mut buf);

        let readout = match readout {
            Ok(_) if buf.is_empty() => Err(CaptureError::Empty),
            other => other,
        };

        match readout {
            Ok(readout) => Ok(Frame {
                buf,
                pool: self.pool.id(),
                meta: FrameMetadata {
                    sequence: self.sequence.fetch_add(1, Ordering::Relaxed) + 1,
                    width: readout.width,
                    height: readout.height,
                    format: readout.format,
                },
                timestamp,
            }),
            Err(e) => {
                self.pool.put(buf);
                Err(e)
            }
        }
    }

    /// Give a frame's buffer back to the pool.
    ///
    /// Frames acquired from another camera, or built detached, are dropped
    /// instead of entering this pool.
    pub fn release(&self, frame: Frame) {
        if frame.pool != self.pool.id() {
            warn!(
                "Dropping frame #{} released to a camera it wasn't acquired from",
                frame.meta.sequence
            );
            return;
        }
        if !self.pool.put(frame.buf) {
            warn!("Frame pool already full, dropping surplus buffer");
        }
    }

    /// Frames acquired and not yet released
    pub fn outstanding(&self) -> usize {
        self.pool.outstanding()
    }
}

impl DynCamera {
    /// Open the sensor named in the configuration
    #[instrument(skip(config), fields(sensor = ?config.sensor))]
    pub fn open(config: &CameraConfig) -> Result<Self, CaptureError> {
        if config.width == 0 || config.height == 0 {
            return Err(CaptureError::Unsupported("camera resolution must be non-zero"));
        }

        let sensor: Box<dyn Sensor> = match config.sensor {
            SensorKind::TestPattern => Box::new(TestPattern::new(
                config.width,
                config.height,
                config.format,
                config.fps,
            )),
            #[cfg(feature = "v4l2")]
            SensorKind::V4l2 => Box::new(super::v4l2::V4l2Sensor::new(config)?),
            #[cfg(not(feature = "v4l2"))]
            SensorKind::V4l2 => return Err(CaptureError::Unsupported("built without the v4l2 feature")),
        };

        let buffer_size = estimated_frame_size(config.width, config.height, config.format);
        info!(
            "Camera ready: {}x{} {:?}, {} buffer(s)",
            config.width, config.height, config.format, config.buffer_count
        );

        Ok(Camera::new(sensor, config.buffer_count as usize, buffer_size))
    }
}

fn estimated_frame_size(width: u32, height: u32, format: PixelFormat) -> usize {
    let pixels = width as usize * height as usize;
    match format.bytes_per_pixel() {
        Some(bpp) => pixels * bpp,
        // Compressed frames are typically well under a fifth of RGB565
        None => pixels * 2 / 5,
    }
}
