//! Multipart JPEG push loop, one per connected client

use std::time::Instant;

use thiserror::Error;
use tracing::{debug, trace};

use crate::capture::{ensure_jpeg, Camera, CaptureError, EncodeError, Frame, Sensor};

macro_rules! boundary {
    () => {
        "123456789000000000000987654321"
    };
}

pub const BOUNDARY: &str = boundary!();

/// Response content type. No space before `boundary`, as clients have always seen it.
pub const STREAM_CONTENT_TYPE: &str = concat!("multipart/x-mixed-replace;boundary=", boundary!());

/// Emitted before every part
pub const STREAM_BOUNDARY: &str = concat!("\r\n--", boundary!(), "\r\n");

pub fn part_header(len: usize) -> String {
    format!("Content-Type: image/jpeg\r\nContent-Length: {len}\r\n\r\n")
}

#[derive(Debug, Error)]
#[error("client disconnected")]
pub struct SinkClosed;

/// Blocking transport for one client. An error means the client is gone.
pub trait ChunkSink {
    fn send_chunk(&mut self, chunk: &[u8]) -> Result<(), SinkClosed>;
}

impl ChunkSink for Vec<u8> {
    fn send_chunk(&mut self, chunk: &[u8]) -> Result<(), SinkClosed> {
        self.extend_from_slice(chunk);
        Ok(())
    }
}

/// Why a stream stopped. There is no normal end.
#[derive(Debug, Error)]
pub enum StreamEnd {
    #[error("camera capture failed: {0}")]
    Capture(#[from] CaptureError),

    #[error("{0}")]
    Encode(#[from] EncodeError),

    #[error("client disconnected")]
    Disconnected(#[from] SinkClosed),
}

/// Per-connection streaming state
pub struct StreamSession<'a, S> {
    camera: &'a Camera<S>,
    last_frame: Instant,
    frames: u64,
}

impl<'a, S: Sensor> StreamSession<'a, S> {
    pub fn new(camera: &'a Camera<S>) -> Self {
        Self {
            camera,
            last_frame: Instant::now(),
            frames: 0,
        }
    }

    /// One acquire → encode → send → release cycle.
    ///
    /// The frame goes back to the camera on every path; a converted chunk is
    /// dropped before that happens.
    pub fn push_frame<K: ChunkSink>(&mut self, sink: &mut K) -> Result<usize, StreamEnd> {
        let frame = self.camera.acquire().map_err(|e| {
            metrics::counter!("bedcam_capture_failures").increment(1);
            e
        })?;

        let sent = send_frame(&frame, sink);
        let captured = frame.timestamp;
        self.camera.release(frame);
        let len = sent?;

        let now = Instant::now();
        let interval = now.duration_since(self.last_frame);
        self.last_frame = now;
        self.frames += 1;
        metrics::counter!("bedcam_frames_sent").increment(1);
        trace!(
            "MJPG: {}B {}ms ({:.1}fps), capture to send {}ms",
            len,
            interval.as_millis(),
            1.0 / interval.as_secs_f64().max(f64::EPSILON),
            now.duration_since(captured).as_millis()
        );

        Ok(len)
    }

    /// Push frames until something fails
    pub fn run<K: ChunkSink>(mut self, sink: &mut K) -> StreamEnd {
        loop {
            if let Err(end) = self.push_frame(sink) {
                debug!("Stream ended after {} frames: {}", self.frames, end);
                return end;
            }
        }
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames
    }
}

fn send_frame<K: ChunkSink>(frame: &Frame, sink: &mut K) -> Result<usize, StreamEnd> {
    let chunk = ensure_jpeg(frame).map_err(|e| {
        metrics::counter!("bedcam_encode_failures").increment(1);
        e
    })?;

    sink.send_chunk(STREAM_BOUNDARY.as_bytes())?;
    sink.send_chunk(part_header(chunk.len()).as_bytes())?;
    sink.send_chunk(&chunk)?;
    Ok(chunk.len())
}
