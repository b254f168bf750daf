//! # Instance
//!
//! An [`Instance`] is the frozen product of a build: router, compiled templates,
//! the buffered and streaming composers and the cancellation token. It holds no
//! per-request mutable state apart from the surface registry, whose entries are
//! each touched only by their own request.
//!
//! [`Instance::serve`] is the request pipeline:
//!
//! 1. reject when cancelled (`500 server stopped`)
//! 2. resolve or mint the request id
//! 3. bind the request span, a child of the instance span opened at build time
//! 4. route
//! 5. dispatch inside the metrics shim

use std::convert::Infallible;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::body::Body;
use axum::http::header::USER_AGENT;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info_span, Instrument, Span};

use crate::context::{get_request_id, RequestId, RequestLogger};
use crate::dot::{Ambient, Composer, RequestInfo, ResponseSurface, SurfaceRegistry};
use crate::handlers;
use crate::metrics;
use crate::minify::Minifier;
use crate::router::{RouteHandler, RouteMatch, Router};

static NEXT_INSTANCE_ID: AtomicI64 = AtomicI64::new(1);

/// Next process-wide instance identity.
pub(crate) fn next_instance_id() -> i64 {
    NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed)
}

/// Compiled, immutable request handler.
pub struct Instance {
    pub(crate) id: i64,
    pub(crate) span: Span,
    pub(crate) router: Router,
    pub(crate) templates: tera::Tera,
    pub(crate) buffered: Composer,
    pub(crate) streaming: Composer,
    pub(crate) surfaces: Arc<SurfaceRegistry>,
    pub(crate) minifier: Option<Arc<dyn Minifier>>,
    pub(crate) cancel: CancellationToken,
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("id", &self.id)
            .field("routes", &self.router.len())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl Instance {
    /// Process-unique identity, used for log correlation.
    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn templates(&self) -> &tera::Tera {
        &self.templates
    }

    pub fn buffered_composer(&self) -> &Composer {
        &self.buffered
    }

    pub fn streaming_composer(&self) -> &Composer {
        &self.streaming
    }

    pub fn minifier(&self) -> Option<&Arc<dyn Minifier>> {
        self.minifier.as_ref()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Live response surfaces; empty whenever no template is executing.
    pub fn active_surfaces(&self) -> usize {
        self.surfaces.len()
    }

    pub(crate) fn ambient<'a>(
        &'a self,
        request: &'a RequestInfo,
        response: &'a Arc<ResponseSurface>,
    ) -> Ambient<'a> {
        Ambient {
            instance_id: self.id,
            cancel: &self.cancel,
            request,
            response,
        }
    }

    /// A `tower::Service` over this instance.
    pub fn service(self: &Arc<Self>) -> InstanceService {
        InstanceService {
            instance: self.clone(),
        }
    }

    /// Handle one request.
    pub async fn serve(self: Arc<Self>, request: Request<Body>) -> Response {
        if self.cancel.is_cancelled() {
            self.span.in_scope(|| {
                error!(
                    method = %request.method(),
                    path = %request.uri().path(),
                    "request rejected: instance stopped"
                );
            });
            return (StatusCode::INTERNAL_SERVER_ERROR, "server stopped").into_response();
        }

        let started = Instant::now();
        let (mut parts, _body) = request.into_parts();

        let mut request_id = get_request_id(&parts.extensions);
        if request_id.is_empty() {
            request_id = uuid::Uuid::now_v7().to_string();
        }
        parts.extensions.insert(RequestId(request_id.clone()));

        let span = info_span!(parent: &self.span, "serve", request_id = %request_id);
        parts.extensions.insert(RequestLogger(span.clone()));

        let matched = self.router.lookup(&parts.method, parts.uri.path());
        let handler_pattern = matched.pattern().to_string();

        span.in_scope(|| {
            debug!(
                user_agent = parts
                    .headers
                    .get(USER_AGENT)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or_default(),
                method = %parts.method,
                path = %parts.uri.path(),
                handler_pattern = %handler_pattern,
                "serving request"
            );
        });

        let request = RequestInfo::from_parts(&parts);
        let response = self
            .dispatch(matched, request)
            .instrument(span.clone())
            .await;
        metrics::instrument(response, span, handler_pattern, started)
    }

    async fn dispatch(self: Arc<Self>, matched: RouteMatch, request: RequestInfo) -> Response {
        match matched {
            RouteMatch::Found { handler, .. } => match handler {
                RouteHandler::Template(route) => {
                    handlers::serve_template(self, route, request).await
                }
                RouteHandler::Static(route) => handlers::serve_static(route, &request).await,
            },
            RouteMatch::MethodNotAllowed { .. } => handlers::method_not_allowed(),
            RouteMatch::NotFound => handlers::status_response(StatusCode::NOT_FOUND),
        }
    }
}

/// `tower::Service` serving every request with one [`Instance`].
#[derive(Debug, Clone)]
pub struct InstanceService {
    instance: Arc<Instance>,
}

impl InstanceService {
    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }
}

impl tower::Service<Request<Body>> for InstanceService {
    type Response = Response;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Response, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let instance = self.instance.clone();
        Box::pin(async move { Ok(instance.serve(request).await) })
    }
}
