//! # Stencil Core
//!
//! Compiles a directory of Tera templates and static assets into an immutable,
//! reusable HTTP request handler.
//!
//! ## Overview
//!
//! - **Dot composition** ([`dot`]): every template execution receives a single
//!   composite value assembled from an ordered list of [`ValueProvider`]s. Providers
//!   are produced in registration order and cleaned up in reverse order, and each
//!   cleanup sees the execution outcome so it can commit or roll back.
//! - **Instance building** ([`builder`]): walks a [`FileSource`], compiles templates,
//!   groups pre-compressed static files, wires the composers and runs `INIT `
//!   templates exactly once before anything is exposed to traffic.
//! - **Request pipeline** ([`instance`]): request-id propagation, a request-scoped
//!   tracing span, routing and metrics capture around the routed handler, in both
//!   buffered and streaming delivery.
//! - **Hot swap** ([`server`]): rebuild, swap, cancel and drain.
//!
//! ## Example
//!
//! ```rust,no_run
//! use stencil_core::{Config, ConfigOption};
//!
//! # fn main() -> Result<(), stencil_core::BuildError> {
//! let build = Config::default().build([
//!     ConfigOption::templates_dir("site"),
//!     ConfigOption::minify(true),
//! ])?;
//! println!("{} routes", build.stats.routes);
//! let service = build.instance.service();
//! # let _ = service;
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod config;
pub mod context;
pub mod dot;
pub mod error;
pub mod funcs;
pub(crate) mod handlers;
pub mod instance;
pub mod logging;
pub(crate) mod metrics;
pub mod minify;
pub mod router;
pub mod server;
pub mod source;
pub mod statics;
pub(crate) mod templates;

pub use builder::{BuildStats, InstanceBuild, Route, RouteKind};
pub use config::{Config, ConfigOption, Delimiters};
pub use context::{get_logger, get_request_id, RequestId, RequestLogger};
pub use dot::{
    Ambient, Composer, Dot, Provided, ProviderSpec, RequestInfo, ResponseSurface, ValueProvider,
};
pub use error::{BoxError, BuildError, ConfigError, DotError, InitStage, ScanError};
pub use funcs::FuncLibrary;
pub use instance::{Instance, InstanceService};
pub use minify::{BasicMinifier, Minifier};
pub use server::{Server, ServerService};
pub use source::{DirSource, FileSource, MemorySource};
pub use statics::Encoding;
pub use templates::DeliveryMode;
