//! Synthetic sensor: scrolling colour bars, used when no camera is attached

use std::thread;
use std::time::{Duration, Instant};

use image::codecs::jpeg::JpegEncoder;
use image::ColorType;

use super::frame::{PixelFormat, Readout};
use super::{CaptureError, Sensor};

const BARS: [[u8; 3]; 8] = [
    [255, 255, 255],
    [255, 255, 0],
    [0, 255, 255],
    [0, 255, 0],
    [255, 0, 255],
    [255, 0, 0],
    [0, 0, 255],
    [0, 0, 0],
];

pub struct TestPattern {
    width: u32,
    height: u32,
    format: PixelFormat,
    interval: Option<Duration>,
    next_frame: Option<Instant>,
    frame_count: u64,
    rgb: Vec<u8>,
}

impl TestPattern {
    /// `fps == 0` disables pacing. Dimensions are at least one pixel.
    pub fn new(width: u32, height: u32, format: PixelFormat, fps: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            format,
            interval: (fps > 0).then(|| Duration::from_secs(1) / fps),
            next_frame: None,
            frame_count: 0,
            rgb: Vec::new(),
        }
    }

    fn pace(&mut self) {
        let Some(interval) = self.interval else {
            return;
        };

        let now = Instant::now();
        let deadline = self.next_frame.unwrap_or(now);
        if deadline > now {
            thread::sleep(deadline - now);
        }
        // Fell behind: restart the cadence instead of bursting
        self.next_frame = Some(deadline.max(now) + interval);
    }

    fn render_rgb(&mut self) {
        let (w, h) = (self.width as usize, self.height as usize);
        let bar_width = (w / BARS.len()).max(1);
        let shift = (self.frame_count as usize) % w.max(1);

        self.rgb.clear();
        self.rgb.reserve(w * h * 3);
        for _ in 0..h {
            for x in 0..w {
                let bar = ((x + shift) / bar_width) % BARS.len();
                self.rgb.extend_from_slice(&BARS[bar]);
            }
        }
    }
}

impl Sensor for TestPattern {
    fn capture_into(&mut self, buf: &mut Vec<u8>) -> Result<Readout, CaptureError> {
        self.pace();
        self.render_rgb();
        self.frame_count += 1;

        match self.format {
            PixelFormat::Rgb888 => buf.extend_from_slice(&self.rgb),
            PixelFormat::Rgb565 => {
                for px in self.rgb.chunks_exact(3) {
                    let value = (u16::from(px[0] >> 3) << 11)
                        | (u16::from(px[1] >> 2) << 5)
                        | u16::from(px[2] >> 3);
                    buf.extend_from_slice(&value.to_be_bytes());
                }
            }
            PixelFormat::Grayscale => {
                buf.extend(self.rgb.chunks_exact(3).map(luma));
            }
            PixelFormat::Yuv422 => pack_yuyv(&self.rgb, self.width as usize, buf),
            PixelFormat::Jpeg => {
                JpegEncoder::new_with_quality(&mut *buf, 90)
                    .encode(&self.rgb, self.width, self.height, ColorType::Rgb8.into())
                    .map_err(|e| CaptureError::Sensor(e.to_string()))?;
            }
        }

        Ok(Readout {
            width: self.width,
            height: self.height,
            format: self.format,
        })
    }
}

fn luma(px: &[u8]) -> u8 {
    ((77 * u32::from(px[0]) + 150 * u32::from(px[1]) + 29 * u32::from(px[2])) >> 8) as u8
}

/// Two bytes per pixel: Y then alternating U/V shared by each horizontal pair
fn pack_yuyv(rgb: &[u8], width: usize, out: &mut Vec<u8>) {
    for row in rgb.chunks_exact(width * 3) {
        for x in 0..width {
            let left = x & !1;
            let right = (left + 1).min(width - 1);
            let (r, g, b) = pixel(row, x);
            let y = ((66 * r + 129 * g + 25 * b + 128) >> 8) + 16;

            let (r0, g0, b0) = pixel(row, left);
            let (r1, g1, b1) = pixel(row, right);
            let (r, g, b) = ((r0 + r1) / 2, (g0 + g1) / 2, (b0 + b1) / 2);
            let chroma = if x % 2 == 0 {
                ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128
            } else {
                ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128
            };

            out.push(y.clamp(0, 255) as u8);
            out.push(chroma.clamp(0, 255) as u8);
        }
    }
}

fn pixel(row: &[u8], x: usize) -> (i32, i32, i32) {
    let px = &row[x * 3..x * 3 + 3];
    (i32::from(px[0]), i32::from(px[1]), i32::from(px[2]))
}
