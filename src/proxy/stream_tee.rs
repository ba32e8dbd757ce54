//! Streaming tee: SSE passthrough with a bounded capture buffer.
//!
//! Provides [`tee_upstream_stream`], which takes a reqwest streaming response
//! and:
//! 1. Forwards raw bytes to the client immediately
//! 2. Copies a bounded prefix into a [`StreamCapture`] as chunks pass through
//! 3. Runs a completion hook exactly once when the stream ends, on every exit
//!    path (upstream EOF, client disconnect, upstream error)
//!
//! The hot path does a bounded memcpy and nothing else; all interpretation of
//! the captured bytes happens in the completion hook, after the stream is
//! closed.

use std::future::Future;

use axum::body::Body;
use bytes::Bytes;
use futures::StreamExt;

/// Bounded prefix of a byte stream, plus the true total length.
///
/// Capped at construction; pushes past the cap keep counting bytes without
/// storing them, so `truncated` can distinguish a stream that exactly filled
/// the buffer from one that overflowed it.
#[derive(Debug)]
pub struct StreamCapture {
    buf: Vec<u8>,
    cap: usize,
    total: u64,
}

impl StreamCapture {
    pub fn new(cap: usize) -> Self {
        Self {
            buf: Vec::new(),
            cap,
            total: 0,
        }
    }

    /// Record a chunk: copy whatever still fits under the cap, count all of it.
    pub fn push(&mut self, chunk: &[u8]) {
        self.total += chunk.len() as u64;
        let room = self.cap.saturating_sub(self.buf.len());
        if room > 0 {
            let take = room.min(chunk.len());
            self.buf.extend_from_slice(&chunk[..take]);
        }
    }

    /// True iff the stream carried more bytes than the cap. A stream of
    /// exactly `cap` bytes is complete, not truncated.
    pub fn truncated(&self) -> bool {
        self.total > self.cap as u64
    }

    pub fn total_bytes(&self) -> u64 {
        self.total
    }

    /// The captured prefix, decoded lossily.
    pub fn into_text(self) -> String {
        String::from_utf8_lossy(&self.buf).into_owned()
    }
}

/// Tee an upstream streaming response into an [`axum::body::Body`] for the
/// client while accumulating a bounded capture.
///
/// The relay task takes ownership of the upstream response, so the upstream
/// connection stays open for as long as the client keeps reading — it must
/// not be tied to the handler's scope. `on_complete` receives the finished
/// capture at the task's single exit point:
/// - upstream EOF
/// - client disconnect (observed as a failed channel send)
/// - upstream transport error (surfaced to the client as a broken body)
pub fn tee_upstream_stream<F, Fut>(
    upstream_resp: reqwest::Response,
    mut capture: StreamCapture,
    on_complete: F,
) -> Body
where
    F: FnOnce(StreamCapture) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    let mut byte_stream = upstream_resp.bytes_stream();
    let (tx, rx) = tokio::sync::mpsc::channel::<Result<Bytes, std::io::Error>>(1024);

    tokio::spawn(async move {
        while let Some(chunk_result) = byte_stream.next().await {
            match chunk_result {
                Ok(bytes) => {
                    capture.push(&bytes);

                    // Send to client; if client disconnected, stop reading.
                    if tx.send(Ok(bytes)).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    let err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, e.to_string());
                    let _ = tx.send(Err(err)).await;
                    break;
                }
            }
        }

        // Single exit: close the upstream connection once, then hand the
        // capture off for persistence — whatever made the loop end.
        drop(byte_stream);
        on_complete(capture).await;
    });

    Body::from_stream(tokio_stream::wrappers::ReceiverStream::new(rx))
}
