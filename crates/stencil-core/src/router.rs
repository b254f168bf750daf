//! # Router
//!
//! Exact-path routing table built once by the instance builder. Every route
//! answers `GET` and `HEAD`; other methods on a known path get `405`.

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::Method;

use crate::statics::StaticRoute;
use crate::templates::DeliveryMode;

/// Value of the `Allow` header on `405` responses.
pub const ALLOWED_METHODS: &str = "GET, HEAD";

/// A compiled, routed template.
#[derive(Debug, Clone)]
pub struct TemplateRoute {
    /// Template name as registered with Tera (its source path).
    pub name: String,
    pub mode: DeliveryMode,
}

/// What serves a route.
#[derive(Debug, Clone)]
pub enum RouteHandler {
    Template(Arc<TemplateRoute>),
    Static(Arc<StaticRoute>),
}

#[derive(Debug)]
struct RouteEntry {
    pattern: String,
    handler: RouteHandler,
}

/// Result of a router lookup.
#[derive(Debug, Clone)]
pub enum RouteMatch {
    Found {
        pattern: String,
        handler: RouteHandler,
    },
    MethodNotAllowed {
        pattern: String,
    },
    NotFound,
}

impl RouteMatch {
    /// The matched pattern, empty when nothing matched.
    pub fn pattern(&self) -> &str {
        match self {
            RouteMatch::Found { pattern, .. } | RouteMatch::MethodNotAllowed { pattern } => {
                pattern
            }
            RouteMatch::NotFound => "",
        }
    }
}

/// `GET <path>` route pattern.
pub fn route_pattern(path: &str) -> String {
    format!("GET {path}")
}

#[derive(Debug, Default)]
pub struct Router {
    routes: HashMap<String, RouteEntry>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a route. Returns `false` and leaves the table unchanged when the path
    /// is already routed.
    pub fn insert(&mut self, path: &str, handler: RouteHandler) -> bool {
        if self.routes.contains_key(path) {
            return false;
        }
        self.routes.insert(
            path.to_string(),
            RouteEntry {
                pattern: route_pattern(path),
                handler,
            },
        );
        true
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn lookup(&self, method: &Method, path: &str) -> RouteMatch {
        let Some(entry) = self.routes.get(path) else {
            return RouteMatch::NotFound;
        };
        if *method == Method::GET || *method == Method::HEAD {
            RouteMatch::Found {
                pattern: entry.pattern.clone(),
                handler: entry.handler.clone(),
            }
        } else {
            RouteMatch::MethodNotAllowed {
                pattern: entry.pattern.clone(),
            }
        }
    }
}
