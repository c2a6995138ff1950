//! V4L2 sensor with memory-mapped streaming

use std::path::Path;

use tracing::{info, instrument};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use super::frame::{PixelFormat, Readout};
use super::{CaptureError, Sensor};
use crate::CameraConfig;

pub struct V4l2Sensor {
    _device: Device,
    stream: MmapStream<'static>,
    width: u32,
    height: u32,
    format: PixelFormat,
}

impl V4l2Sensor {
    pub fn new(config: &CameraConfig) -> Result<Self, CaptureError> {
        let path = if config.device.is_empty() {
            auto_detect_device()?
        } else {
            config.device.clone()
        };
        info!("Initializing V4L2 capture: {}", path);

        let device = Device::with_path(&path)?;

        let caps = device.query_caps()?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(CaptureError::Unsupported("device doesn't support video capture"));
        }

        let mut fmt = device.format()?;
        fmt.width = config.width;
        fmt.height = config.height;
        fmt.fourcc = match config.format {
            PixelFormat::Jpeg => FourCC::new(b"MJPG"),
            PixelFormat::Yuv422 => FourCC::new(b"YUYV"),
            _ => return Err(CaptureError::Unsupported("v4l2 supports jpeg and yuv422 only")),
        };

        // The driver may round the size; trust what it settled on
        let fmt = device.set_format(&fmt)?;

        let stream = MmapStream::with_buffers(&device, Type::VideoCapture, config.buffer_count)?;
        info!(
            "Capture stream started: {}x{} with {} buffers",
            fmt.width, fmt.height, config.buffer_count
        );

        Ok(Self {
            _device: device,
            stream,
            width: fmt.width,
            height: fmt.height,
            format: config.format,
        })
    }
}

impl Sensor for V4l2Sensor {
    #[instrument(skip_all)]
    fn capture_into(&mut self, buf: &mut Vec<u8>) -> Result<Readout, CaptureError> {
        let (data, meta) = self.stream.next()?;
        let used = (meta.bytesused as usize).min(data.len());
        buf.extend_from_slice(&data[..used]);

        Ok(Readout {
            width: self.width,
            height: self.height,
            format: self.format,
        })
    }
}

/// First capture-capable node among `/dev/video0..9`
pub fn auto_detect_device() -> Result<String, CaptureError> {
    info!("Auto-detecting capture devices...");

    for i in 0..10 {
        let path = format!("/dev/video{}", i);
        if !Path::new(&path).exists() {
            continue;
        }

        let Ok(dev) = Device::with_path(&path) else {
            continue;
        };
        if let Ok(caps) = dev.query_caps() {
            if caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
                info!("Found capture device: {} - {}", path, caps.card);
                return Ok(path);
            }
        }
    }

    Err(CaptureError::Unsupported("no capture device found"))
}
