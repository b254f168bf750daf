//! Route handlers: buffered templates, streaming templates and static files.
//!
//! Template execution and provider calls are synchronous, so both template
//! handlers run them on the blocking pool under the request span.

use std::sync::Arc;

use axum::body::Body;
use axum::http::header::{
    ACCEPT_ENCODING, ALLOW, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, ETAG, IF_NONE_MATCH,
    VARY,
};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, warn};

use crate::dot::surface::BufferedResponse;
use crate::dot::{RequestInfo, ResponseSurface};
use crate::error::{error_chain, BoxError};
use crate::instance::Instance;
use crate::minify::{is_minifiable, media_type};
use crate::router::{TemplateRoute, ALLOWED_METHODS};
use crate::statics::{if_none_match, StaticBody, StaticRoute};
use crate::templates::DeliveryMode;

const DEFAULT_CONTENT_TYPE: &str = "text/html; charset=utf-8";

/// Chunks buffered between a streaming template and the response body.
const STREAM_CHANNEL_CAPACITY: usize = 16;

/// Plain-text response with the status's reason phrase.
pub(crate) fn status_response(status: StatusCode) -> Response {
    (status, status.canonical_reason().unwrap_or_default()).into_response()
}

pub(crate) fn method_not_allowed() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        [(ALLOW, ALLOWED_METHODS)],
        "Method Not Allowed",
    )
        .into_response()
}

pub(crate) async fn serve_template(
    instance: Arc<Instance>,
    route: Arc<TemplateRoute>,
    request: RequestInfo,
) -> Response {
    match route.mode {
        DeliveryMode::Buffered => serve_buffered(instance, route, request).await,
        DeliveryMode::Streaming => serve_streaming(instance, route, request).await,
    }
}

async fn serve_buffered(
    instance: Arc<Instance>,
    route: Arc<TemplateRoute>,
    request: RequestInfo,
) -> Response {
    let span = request.logger.clone();
    let result = tokio::task::spawn_blocking(move || {
        let _entered = span.enter();
        execute_buffered(&instance, &route, &request)
    })
    .await;

    result.unwrap_or_else(|e| {
        error!(error = %e, "buffered template task failed");
        status_response(StatusCode::INTERNAL_SERVER_ERROR)
    })
}

fn execute_buffered(instance: &Instance, route: &TemplateRoute, request: &RequestInfo) -> Response {
    let surface = Arc::new(ResponseSurface::buffered());
    let ambient = instance.ambient(request, &surface);

    let dot = match instance.buffered_composer().acquire(&ambient) {
        Ok(dot) => dot,
        Err(e) => {
            error!(template = %route.name, error = %error_chain(&e), "failed to acquire dot");
            return status_response(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    let outcome = instance
        .templates()
        .render_to(&route.name, dot.context(), surface.writer())
        .map_err(|e| Box::new(e) as BoxError);
    let released = dot.release(outcome.err());
    let captured = surface.take_buffered().unwrap_or_default();

    if let Some(status) = captured.abort {
        if let Err(e) = &released {
            if e.has_cleanup_error() {
                error!(
                    template = %route.name,
                    error = %error_chain(e),
                    "cleanup failed after return_status"
                );
            }
        }
        debug!(template = %route.name, status = status.as_u16(), "template returned status");
        return status_response(status);
    }
    if let Err(e) = released {
        if e.has_execution_error() {
            error!(
                template = %route.name,
                error = %error_chain(&e),
                "template execution failed"
            );
            return status_response(StatusCode::INTERNAL_SERVER_ERROR);
        }
        // The template already produced its response; cleanup cannot change it.
        error!(
            template = %route.name,
            error = %error_chain(&e),
            "dot cleanup failed after successful execution"
        );
    }

    buffered_response(instance, route, request, captured)
}

fn buffered_response(
    instance: &Instance,
    route: &TemplateRoute,
    request: &RequestInfo,
    captured: BufferedResponse,
) -> Response {
    let BufferedResponse {
        status,
        mut headers,
        mut body,
        ..
    } = captured;

    if !headers.contains_key(CONTENT_TYPE) {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(DEFAULT_CONTENT_TYPE));
    }

    if let Some(minifier) = instance.minifier() {
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or(DEFAULT_CONTENT_TYPE);
        if is_minifiable(content_type) {
            match minifier.minify(&media_type(content_type), &body) {
                Ok(minified) => body = minified,
                Err(e) => {
                    warn!(
                        template = %route.name,
                        error = %e,
                        "minification failed, serving unminified output"
                    );
                }
            }
        }
    }

    headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
    let body = if request.method == Method::HEAD {
        Body::empty()
    } else {
        Body::from(body)
    };

    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

async fn serve_streaming(
    instance: Arc<Instance>,
    route: Arc<TemplateRoute>,
    request: RequestInfo,
) -> Response {
    let (chunks, receiver) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
    let (ready, acquired) = oneshot::channel();
    let span = request.logger.clone();

    tokio::task::spawn_blocking(move || {
        let _entered = span.enter();
        execute_streaming(&instance, &route, &request, chunks, ready);
    });

    match acquired.await {
        Ok(true) => {
            let mut response = Response::new(Body::from_stream(ReceiverStream::new(receiver)));
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static(DEFAULT_CONTENT_TYPE));
            response
        }
        _ => status_response(StatusCode::INTERNAL_SERVER_ERROR),
    }
}

fn execute_streaming(
    instance: &Instance,
    route: &TemplateRoute,
    request: &RequestInfo,
    chunks: mpsc::Sender<Result<bytes::Bytes, std::io::Error>>,
    ready: oneshot::Sender<bool>,
) {
    let surface = Arc::new(ResponseSurface::streaming(chunks));
    let ambient = instance.ambient(request, &surface);

    let dot = match instance.streaming_composer().acquire(&ambient) {
        Ok(dot) => dot,
        Err(e) => {
            error!(template = %route.name, error = %error_chain(&e), "failed to acquire dot");
            let _ = ready.send(false);
            return;
        }
    };
    // Headers go out now; later failures can only truncate the body.
    let _ = ready.send(true);

    let outcome = instance
        .templates()
        .render_to(&route.name, dot.context(), surface.writer())
        .map_err(|e| Box::new(e) as BoxError)
        .and_then(|()| surface.flush_pending().map_err(|e| Box::new(e) as BoxError));

    if let Err(e) = &outcome {
        surface.fail_stream(error_chain(&**e));
    }
    if let Err(e) = dot.release(outcome.err()) {
        error!(template = %route.name, error = %error_chain(&e), "streaming template failed");
    }
}

pub(crate) async fn serve_static(route: Arc<StaticRoute>, request: &RequestInfo) -> Response {
    let accept_encoding = request
        .headers
        .get(ACCEPT_ENCODING)
        .and_then(|value| value.to_str().ok());
    let variant = route.select(accept_encoding).clone();

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(route.content_type));
    if let Ok(etag) = HeaderValue::from_str(&variant.etag) {
        headers.insert(ETAG, etag);
    }
    if route.has_alternates() {
        headers.insert(VARY, HeaderValue::from_static("accept-encoding"));
    }
    if let Some(encoding) = variant.encoding {
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static(encoding.token()));
    }

    let not_modified = request
        .headers
        .get(IF_NONE_MATCH)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|header| if_none_match(header, &variant.etag));
    if not_modified {
        return (StatusCode::NOT_MODIFIED, headers).into_response();
    }

    let contents = match &variant.body {
        StaticBody::Inline(bytes) => Ok(bytes.clone()),
        StaticBody::Source { .. } => {
            let loading = variant.clone();
            tokio::task::spawn_blocking(move || loading.load())
                .await
                .unwrap_or_else(|e| Err(std::io::Error::other(e)))
        }
    };
    let contents = match contents {
        Ok(contents) => contents,
        Err(e) => {
            error!(path = %route.path, error = %e, "failed to read static file");
            return status_response(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    headers.insert(CONTENT_LENGTH, HeaderValue::from(contents.len()));
    let body = if request.method == Method::HEAD {
        Body::empty()
    } else {
        Body::from(contents)
    };
    (headers, body).into_response()
}
