//! End-to-end streaming: HTTP request in, multipart JPEG parts out.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use bedcam::capture::pattern::TestPattern;
use bedcam::capture::{Camera, CaptureError, PixelFormat, Readout, Sensor};
use bedcam::stream::{self, BOUNDARY, STREAM_CONTENT_TYPE};

/// Delegates to a test pattern for `limit` frames, then fails for good
struct FailsAfter {
    inner: TestPattern,
    limit: usize,
    captures: Arc<AtomicUsize>,
}

impl FailsAfter {
    fn new(format: PixelFormat, limit: usize) -> Self {
        Self {
            inner: TestPattern::new(32, 24, format, 0),
            limit,
            captures: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Sensor for FailsAfter {
    fn capture_into(&mut self, buf: &mut Vec<u8>) -> Result<Readout, CaptureError> {
        let n = self.captures.fetch_add(1, Ordering::SeqCst);
        if n >= self.limit {
            return Err(CaptureError::Sensor("sensor unplugged".into()));
        }
        self.inner.capture_into(buf)
    }
}

/// Minimal multipart/x-mixed-replace reader: returns every complete part's
/// payload and fails on anything malformed, including a truncated tail.
fn parse_parts(body: &[u8], boundary: &str) -> Result<Vec<Vec<u8>>, String> {
    let delimiter = format!("\r\n--{boundary}\r\n");
    let mut rest = body;
    let mut parts = Vec::new();

    while !rest.is_empty() {
        rest = rest
            .strip_prefix(delimiter.as_bytes())
            .ok_or_else(|| format!("expected delimiter at part {}", parts.len()))?;

        let headers_end = rest
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .ok_or("unterminated part headers")?;
        let headers = std::str::from_utf8(&rest[..headers_end]).map_err(|e| e.to_string())?;
        rest = &rest[headers_end + 4..];

        let mut content_type = None;
        let mut content_length = None;
        for line in headers.split("\r\n") {
            let (name, value) = line.split_once(": ").ok_or("malformed header line")?;
            match name.to_ascii_lowercase().as_str() {
                "content-type" => content_type = Some(value.to_string()),
                "content-length" => {
                    content_length = Some(value.parse::<usize>().map_err(|e| e.to_string())?)
                }
                other => return Err(format!("unexpected header {other}")),
            }
        }

        if content_type.as_deref() != Some("image/jpeg") {
            return Err("missing image/jpeg content type".into());
        }
        let len = content_length.ok_or("missing content length")?;
        if rest.len() < len {
            return Err(format!("part {} truncated", parts.len()));
        }

        let payload = &rest[..len];
        if !payload.starts_with(&[0xFF, 0xD8]) || !payload.ends_with(&[0xFF, 0xD9]) {
            return Err(format!("part {} is not a JPEG", parts.len()));
        }
        parts.push(payload.to_vec());
        rest = &rest[len..];
    }

    Ok(parts)
}

#[tokio::test]
async fn parts_are_well_formed_until_capture_fails() {
    for format in [PixelFormat::Jpeg, PixelFormat::Rgb565, PixelFormat::Yuv422] {
        let camera = Arc::new(Camera::new(FailsAfter::new(format, 3), 1, 32 * 24 * 2));

        let response = stream::router(Some(Arc::clone(&camera)))
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], STREAM_CONTENT_TYPE);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parts = parse_parts(&body, BOUNDARY).unwrap();
        assert_eq!(parts.len(), 3, "{format:?}");

        for part in &parts {
            let mut decoder = jpeg_decoder::Decoder::new(&part[..]);
            decoder.decode().unwrap();
            let info = decoder.info().unwrap();
            assert_eq!((info.width, info.height), (32, 24));
        }
        assert_eq!(camera.outstanding(), 0);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn two_clients_share_a_single_buffer() {
    let camera = Arc::new(Camera::new(FailsAfter::new(PixelFormat::Jpeg, 6), 1, 32 * 24 * 2));
    let app = stream::router(Some(Arc::clone(&camera)));

    let first = app
        .clone()
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let second = app
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    let (first, second) = tokio::time::timeout(Duration::from_secs(10), async {
        tokio::join!(
            to_bytes(first.into_body(), usize::MAX),
            to_bytes(second.into_body(), usize::MAX)
        )
    })
    .await
    .expect("clients starved each other");

    let first = parse_parts(&first.unwrap(), BOUNDARY).unwrap();
    let second = parse_parts(&second.unwrap(), BOUNDARY).unwrap();

    // Every captured frame reached exactly one client, whole
    assert_eq!(first.len() + second.len(), 6);
    assert_eq!(camera.outstanding(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn client_disconnect_ends_the_stream() {
    let sensor = FailsAfter::new(PixelFormat::Rgb565, usize::MAX);
    let captures = Arc::clone(&sensor.captures);
    let camera = Arc::new(Camera::new(sensor, 1, 32 * 24 * 2));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let cancel = CancellationToken::new();
    let server = tokio::spawn(stream::serve(listener, Some(Arc::clone(&camera)), cancel.clone()));

    let mut client = TcpStream::connect(addr).await.unwrap();
    client
        .write_all(b"GET / HTTP/1.1\r\nHost: bedcam\r\n\r\n")
        .await
        .unwrap();

    // Read until a few boundaries have gone past
    let mut received = Vec::new();
    let mut buf = [0u8; 4096];
    let boundary = format!("--{BOUNDARY}");
    while received
        .windows(boundary.len())
        .filter(|w| *w == boundary.as_bytes())
        .count()
        < 3
    {
        let n = client.read(&mut buf).await.unwrap();
        assert!(n > 0, "server closed the stream early");
        received.extend_from_slice(&buf[..n]);
    }

    let head = String::from_utf8_lossy(&received);
    assert!(head.starts_with("HTTP/1.1 200 OK"));
    assert!(head
        .to_ascii_lowercase()
        .contains(&format!("content-type: {STREAM_CONTENT_TYPE}")));

    drop(client);

    // Production stops once the server notices the client is gone
    let settled = tokio::time::timeout(Duration::from_secs(10), async {
        let mut last = captures.load(Ordering::SeqCst);
        loop {
            tokio::time::sleep(Duration::from_millis(250)).await;
            let now = captures.load(Ordering::SeqCst);
            if now == last {
                return now;
            }
            last = now;
        }
    })
    .await
    .expect("stream kept producing frames after disconnect");

    assert!(settled >= 3);
    assert_eq!(camera.outstanding(), 0);

    cancel.cancel();
    server.await.unwrap().unwrap();
}
