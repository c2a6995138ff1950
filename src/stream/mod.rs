pub mod http;
pub mod mjpeg;

pub use http::{router, serve};
pub use mjpeg::{ChunkSink, SinkClosed, StreamEnd, StreamSession, BOUNDARY, STREAM_CONTENT_TYPE};
