//! # Stencil Server
//!
//! Serves a template directory over HTTP.
//!
//! ## Usage
//!
//! ```bash
//! # Serve ./templates on 127.0.0.1:8080
//! stencil-server
//!
//! # Explicit configuration file, overridden from the command line
//! stencil-server --config stencil.toml --listen 0.0.0.0:3000 --minify
//!
//! # Environment overrides (nested keys use a double underscore)
//! STENCIL_TEMPLATES_DIR=site STENCIL_VARS__SITE_NAME=Example stencil-server
//! ```
//!
//! `SIGHUP` rebuilds the instance from disk; `SIGTERM` and Ctrl+C drain
//! in-flight requests and exit.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use tokio::signal;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tracing::{error, info, warn};

use stencil_core::logging;
use stencil_core::{Config, Server};

const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8080";
const ENV_PREFIX: &str = "STENCIL";

#[derive(Debug, Parser)]
#[command(name = "stencil-server", version, about = "Serve a Stencil template directory")]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, env = "STENCIL_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Directory containing templates and static files
    #[arg(short = 'd', long)]
    templates_dir: Option<PathBuf>,

    /// Minify HTML, CSS, JavaScript and SVG output
    #[arg(long)]
    minify: bool,
}

/// Settings resolved from the configuration file, environment and flags.
#[derive(Debug)]
struct Settings {
    listen_addr: SocketAddr,
    site: Config,
}

fn load_settings(cli: &Cli) -> anyhow::Result<Settings> {
    let mut builder = config::Config::builder();
    if let Some(path) = &cli.config {
        builder = builder.add_source(config::File::from(path.as_path()).required(true));
    }
    let loaded = builder
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("failed to load configuration")?;

    let listen_addr = match cli.listen {
        Some(addr) => addr,
        None => loaded
            .get_string("listen_addr")
            .unwrap_or_else(|_| DEFAULT_LISTEN_ADDR.to_string())
            .parse::<SocketAddr>()
            .context("invalid listen_addr")?,
    };

    let mut site: Config = loaded
        .try_deserialize()
        .context("invalid site configuration")?;
    if let Some(path) = &cli.config {
        site.templates_dir = relative_to(path, &site.templates_dir);
    }
    if let Some(dir) = &cli.templates_dir {
        site.templates_dir = dir.clone();
    }
    if cli.minify {
        site.minify = true;
    }
    site.apply_defaults();
    site.validate().context("invalid site configuration")?;

    Ok(Settings { listen_addr, site })
}

/// Resolve a relative templates directory against the configuration file.
fn relative_to(config_path: &Path, dir: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if dir.is_relative() && !parent.as_os_str().is_empty() => parent.join(dir),
        _ => dir.to_path_buf(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_tracing();

    let cli = Cli::parse();
    let settings = load_settings(&cli)?;

    info!("Starting Stencil Server...");
    info!("   Version: {}", env!("CARGO_PKG_VERSION"));
    info!("   Templates: {}", settings.site.templates_dir.display());

    let site = settings.site;
    let server = tokio::task::spawn_blocking(move || Server::new(site, Vec::new()))
        .await
        .context("instance build task failed")?
        .context("failed to build instance")?;
    let server = Arc::new(server);

    #[cfg(unix)]
    tokio::spawn(reload_on_hangup(server.clone()));

    let app = axum::Router::new()
        .fallback_service(server.service())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid));

    let listener = tokio::net::TcpListener::bind(settings.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", settings.listen_addr))?;
    info!("   Listening: http://{}", settings.listen_addr);
    info!("   Press Ctrl+C to shutdown gracefully");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    server.stop();
    info!("Stencil Server shutdown complete");
    Ok(())
}

/// Rebuild the instance on every `SIGHUP`.
#[cfg(unix)]
async fn reload_on_hangup(server: Arc<Server>) {
    let mut hangup = match signal::unix::signal(signal::unix::SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(e) => {
            warn!(error = %e, "failed to install SIGHUP handler, reload disabled");
            return;
        }
    };

    while hangup.recv().await.is_some() {
        info!("Received SIGHUP, reloading");
        let reloading = server.clone();
        match tokio::task::spawn_blocking(move || reloading.reload()).await {
            Ok(Ok(stats)) => info!(routes = stats.routes, "reload complete"),
            Ok(Err(e)) => error!(error = %e, "reload failed"),
            Err(e) => error!(error = %e, "reload task failed"),
        }
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C");
        },
        _ = terminate => {
            info!("Received SIGTERM");
        },
    }
}
