//! Per-request metrics captured around the routed handler.
//!
//! The response body is wrapped so bytes are counted as the client polls them;
//! the "request served" line is emitted when the body is finished or dropped,
//! which for streamed responses is well after the handler returned.

use std::time::Instant;

use axum::body::{Body, HttpBody};
use axum::http::header::CONTENT_LENGTH;
use axum::http::{HeaderValue, StatusCode};
use axum::response::Response;
use futures::StreamExt;
use tracing::{debug, Span};

#[derive(Debug)]
pub(crate) struct MetricsRecorder {
    span: Span,
    handler_pattern: String,
    status: StatusCode,
    bytes: u64,
    started: Instant,
}

impl MetricsRecorder {
    fn record_chunk(&mut self, len: usize) {
        self.bytes += len as u64;
    }
}

impl Drop for MetricsRecorder {
    fn drop(&mut self) {
        let duration_ms = self.started.elapsed().as_millis() as u64;
        self.span.in_scope(|| {
            debug!(
                status = self.status.as_u16(),
                bytes = self.bytes,
                duration_ms,
                handler_pattern = %self.handler_pattern,
                "request served"
            );
        });
    }
}

/// Wrap `response` so its body is measured. Status, headers and bytes pass
/// through unchanged.
pub(crate) fn instrument(
    response: Response,
    span: Span,
    handler_pattern: String,
    started: Instant,
) -> Response {
    let (mut parts, body) = response.into_parts();

    // Re-streaming loses the exact length; keep it on the wire.
    if !parts.headers.contains_key(CONTENT_LENGTH)
        && parts.status != StatusCode::NOT_MODIFIED
        && parts.status != StatusCode::NO_CONTENT
    {
        if let Some(len) = body.size_hint().exact() {
            parts.headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
        }
    }

    let mut recorder = MetricsRecorder {
        span,
        handler_pattern,
        status: parts.status,
        bytes: 0,
        started,
    };
    let stream = body.into_data_stream().map(move |chunk| {
        if let Ok(bytes) = &chunk {
            recorder.record_chunk(bytes.len());
        }
        chunk
    });
    Response::from_parts(parts, Body::from_stream(stream))
}
