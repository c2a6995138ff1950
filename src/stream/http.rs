//! HTTP front end: `GET /` answers with an endless MJPEG stream

use std::convert::Infallible;
use std::future::IntoFuture;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::mjpeg::{ChunkSink, SinkClosed, StreamSession, STREAM_CONTENT_TYPE};
use crate::capture::{Camera, Sensor};

/// Each send waits for the client to take the previous chunk
impl ChunkSink for mpsc::Sender<Bytes> {
    fn send_chunk(&mut self, chunk: &[u8]) -> Result<(), SinkClosed> {
        self.blocking_send(Bytes::copy_from_slice(chunk))
            .map_err(|_| SinkClosed)
    }
}

/// `None` runs the server without a camera: clients get headers and an
/// immediately finished body.
pub fn router<S: Sensor + 'static>(camera: Option<Arc<Camera<S>>>) -> Router {
    Router::new()
        .route("/", get(stream_mjpeg::<S>))
        .with_state(camera)
}

pub async fn serve<S: Sensor + 'static>(
    listener: TcpListener,
    camera: Option<Arc<Camera<S>>>,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    info!("Stream server listening on http://{}", listener.local_addr()?);

    // Streams never finish on their own; don't wait for them to drain
    tokio::select! {
        result = axum::serve(listener, router(camera)).into_future() => result,
        _ = cancel.cancelled() => {
            info!("Stream server stopped");
            Ok(())
        }
    }
}

async fn stream_mjpeg<S: Sensor + 'static>(
    State(camera): State<Option<Arc<Camera<S>>>>,
) -> Response {
    let (tx, rx) = mpsc::channel::<Bytes>(1);

    match camera {
        Some(camera) => {
            info!("Client connected, streaming");
            tokio::task::spawn_blocking(move || {
                let mut sink = tx;
                let end = StreamSession::new(&camera).run(&mut sink);
                info!("Stream closed: {}", end);
            });
        }
        None => {
            warn!("Camera unavailable, closing stream");
            drop(tx);
        }
    }

    let body = Body::from_stream(ReceiverStream::new(rx).map(Ok::<_, Infallible>));
    ([(header::CONTENT_TYPE, STREAM_CONTENT_TYPE)], body).into_response()
}

#[cfg(test)]
mod tests {
    use axum::body::to_bytes;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;
    use crate::capture::{CaptureError, Readout};

    struct Never;

    impl Sensor for Never {
        fn capture_into(&mut self, _buf: &mut Vec<u8>) -> Result<Readout, CaptureError> {
            Err(CaptureError::Sensor("no sensor".into()))
        }
    }

    #[tokio::test]
    async fn without_camera_body_is_empty() {
        let response = router::<Never>(None)
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            STREAM_CONTENT_TYPE
        );
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn capture_failure_ends_body_cleanly() {
        let camera = Arc::new(Camera::new(Never, 1, 0));
        let response = router(Some(Arc::clone(&camera)))
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(body.is_empty());
        assert_eq!(camera.outstanding(), 0);
    }

    #[tokio::test]
    async fn other_routes_are_not_found() {
        let response = router::<Never>(None)
            .oneshot(Request::get("/snapshot").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
