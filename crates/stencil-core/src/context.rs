//! # Request Context
//!
//! Per-request values stored in `http::Extensions` by the request pipeline:
//! the request id and the request-scoped tracing span. Providers and function
//! libraries read them back through [`get_request_id`] and [`get_logger`].

use axum::http::Extensions;
use tracing::Span;

/// Request id minted or propagated by [`crate::Instance::serve`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// The tracing span every log line for a request is recorded under.
#[derive(Debug, Clone)]
pub struct RequestLogger(pub Span);

/// The request id for these extensions.
///
/// Prefers the id set by the pipeline, then an upstream `tower-http` request id,
/// and is empty when neither is present.
pub fn get_request_id(extensions: &Extensions) -> String {
    if let Some(id) = extensions.get::<RequestId>() {
        return id.0.clone();
    }
    extensions
        .get::<tower_http::request_id::RequestId>()
        .and_then(|id| id.header_value().to_str().ok())
        .map(str::to_string)
        .unwrap_or_default()
}

/// The request-scoped span, or a disabled span outside a request.
pub fn get_logger(extensions: &Extensions) -> Span {
    extensions
        .get::<RequestLogger>()
        .map(|logger| logger.0.clone())
        .unwrap_or_else(Span::none)
}
