//! # Server
//!
//! Holds the current [`Instance`] behind an atomically swappable reference.
//! [`Server::reload`] builds a replacement from the same configuration and
//! options, swaps it in and cancels the previous instance: requests already
//! running on it finish, new ones go to the replacement.

use std::convert::Infallible;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use arc_swap::ArcSwap;
use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::builder::{BuildStats, InstanceBuild};
use crate::config::{Config, ConfigOption};
use crate::error::BuildError;
use crate::instance::Instance;

#[derive(Debug)]
pub struct Server {
    config: Config,
    options: Vec<ConfigOption>,
    current: ArcSwap<Instance>,
    root: CancellationToken,
    reloading: Mutex<()>,
}

impl Server {
    /// Build the first instance.
    pub fn new(config: Config, options: Vec<ConfigOption>) -> Result<Self, BuildError> {
        let root = CancellationToken::new();
        let build = build(&config, &options, &root)?;
        Ok(Self {
            config,
            options,
            current: ArcSwap::new(build.instance),
            root,
            reloading: Mutex::new(()),
        })
    }

    /// The instance serving new requests.
    pub fn instance(&self) -> Arc<Instance> {
        self.current.load_full()
    }

    /// Rebuild and swap. On failure the current instance keeps serving.
    pub fn reload(&self) -> Result<BuildStats, BuildError> {
        let _guard = self
            .reloading
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let build = match build(&self.config, &self.options, &self.root) {
            Ok(build) => build,
            Err(e) => {
                warn!(
                    error = %e,
                    instance = self.current.load().id(),
                    "reload failed, keeping current instance"
                );
                return Err(e);
            }
        };

        let next = build.instance.id();
        let previous = self.current.swap(build.instance);
        previous.cancellation_token().cancel();
        info!(
            previous = previous.id(),
            instance = next,
            "instance reloaded"
        );
        Ok(build.stats)
    }

    /// Cancel the current instance and every future one.
    pub fn stop(&self) {
        self.root.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.root.is_cancelled()
    }

    /// A `tower::Service` dispatching to whichever instance is current.
    pub fn service(self: &Arc<Self>) -> ServerService {
        ServerService {
            server: self.clone(),
        }
    }
}

fn build(
    config: &Config,
    options: &[ConfigOption],
    root: &CancellationToken,
) -> Result<InstanceBuild, BuildError> {
    let options = options
        .iter()
        .cloned()
        .chain([ConfigOption::cancellation(root.child_token())]);
    config.clone().build(options)
}

#[derive(Debug, Clone)]
pub struct ServerService {
    server: Arc<Server>,
}

impl tower::Service<Request<Body>> for ServerService {
    type Response = Response;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Response, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let instance = self.server.instance();
        Box::pin(async move { Ok(instance.serve(request).await) })
    }
}
