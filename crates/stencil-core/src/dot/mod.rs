//! # Dot Composition
//!
//! Every template execution receives one composite value, the "dot", built from
//! an ordered list of [`ProviderSpec`]s. A [`Composer`] owns that list:
//!
//! - [`Composer::acquire`] calls each provider's `produce` in registration
//!   order and stops at the first failure, cleaning up the providers that
//!   already produced (in reverse order) before returning.
//! - [`Composer::release`] calls `cleanup` in reverse order, handing every
//!   provider the execution outcome so it can commit or roll back. Cleanup
//!   errors are joined with the execution error; neither is dropped.
//!
//! A [`Dot`] that is dropped without being released still cleans up, with an
//! error telling providers the execution never completed.

pub mod providers;
pub mod surface;

use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use axum::http::request::Parts;
use axum::http::{HeaderMap, Method, Uri};
use tokio_util::sync::CancellationToken;
use tracing::{warn, Span};

use crate::context::{get_logger, get_request_id};
use crate::error::{BoxError, DotError};

pub use surface::{ResponseSurface, SurfaceRegistry, SurfaceWriter};

/// Read-only view of the inbound request handed to providers.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub request_id: String,
    pub logger: Span,
}

impl RequestInfo {
    /// Capture the request head after the pipeline attached id and span.
    pub fn from_parts(parts: &Parts) -> Self {
        Self {
            method: parts.method.clone(),
            uri: parts.uri.clone(),
            headers: parts.headers.clone(),
            request_id: get_request_id(&parts.extensions),
            logger: get_logger(&parts.extensions),
        }
    }

    /// The stand-in request used while running initializers.
    pub fn synthetic() -> Self {
        Self {
            method: Method::GET,
            uri: Uri::from_static("/"),
            headers: HeaderMap::new(),
            request_id: String::new(),
            logger: Span::current(),
        }
    }
}

/// Everything a provider may look at while producing its value.
#[derive(Debug, Clone, Copy)]
pub struct Ambient<'a> {
    pub instance_id: i64,
    pub cancel: &'a CancellationToken,
    pub request: &'a RequestInfo,
    pub response: &'a Arc<ResponseSurface>,
}

/// A produced value plus optional provider-private state returned to `cleanup`.
pub struct Provided {
    pub value: tera::Value,
    pub state: Option<Box<dyn Any + Send>>,
}

impl fmt::Debug for Provided {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provided")
            .field("value", &self.value)
            .field("has_state", &self.state.is_some())
            .finish()
    }
}

impl Provided {
    pub fn new(value: tera::Value) -> Self {
        Self { value, state: None }
    }

    pub fn with_state<S: Any + Send>(value: tera::Value, state: S) -> Self {
        Self {
            value,
            state: Some(Box::new(state)),
        }
    }

    /// Take the private state back out, if it has type `S`.
    pub fn take_state<S: Any + Send>(&mut self) -> Option<S> {
        let state = self.state.take()?;
        match state.downcast::<S>() {
            Ok(state) => Some(*state),
            Err(other) => {
                self.state = Some(other);
                None
            }
        }
    }
}

/// Produces one named field of the dot.
///
/// `produce` runs on the blocking pool and may read fields produced by earlier
/// providers through `fields`. `cleanup` runs exactly once for every successful
/// `produce`, receiving the execution error (if any).
pub trait ValueProvider: fmt::Debug + Send + Sync {
    fn produce(
        &self,
        ambient: &Ambient<'_>,
        fields: &tera::Context,
    ) -> Result<Provided, BoxError>;

    fn cleanup(
        &self,
        _provided: Provided,
        _error: Option<&(dyn std::error::Error + Send + Sync + 'static)>,
    ) -> Result<(), BoxError> {
        Ok(())
    }
}

/// A provider registered under a template-visible name.
#[derive(Debug, Clone)]
pub struct ProviderSpec {
    exported_name: String,
    field_token: String,
    provider: Arc<dyn ValueProvider>,
}

impl ProviderSpec {
    pub fn new(
        exported_name: impl Into<String>,
        field_token: impl Into<String>,
        provider: impl ValueProvider + 'static,
    ) -> Self {
        Self::from_arc(exported_name, field_token, Arc::new(provider))
    }

    pub fn from_arc(
        exported_name: impl Into<String>,
        field_token: impl Into<String>,
        provider: Arc<dyn ValueProvider>,
    ) -> Self {
        Self {
            exported_name: exported_name.into(),
            field_token: field_token.into(),
            provider,
        }
    }

    /// The field name templates use.
    pub fn exported_name(&self) -> &str {
        &self.exported_name
    }

    /// Correlation token used in logs and errors.
    pub fn field_token(&self) -> &str {
        &self.field_token
    }

    pub fn provider(&self) -> &Arc<dyn ValueProvider> {
        &self.provider
    }
}

/// Ordered provider list for one kind of composite value.
#[derive(Debug, Clone)]
pub struct Composer {
    specs: Arc<[ProviderSpec]>,
}

impl Composer {
    pub fn new(specs: Vec<ProviderSpec>) -> Result<Self, DotError> {
        let mut seen = HashSet::new();
        for spec in &specs {
            if !seen.insert(spec.exported_name.as_str()) {
                return Err(DotError::DuplicateName(spec.exported_name.clone()));
            }
        }
        Ok(Self {
            specs: specs.into(),
        })
    }

    pub fn specs(&self) -> &[ProviderSpec] {
        &self.specs
    }

    /// Produce every field in order.
    pub fn acquire(&self, ambient: &Ambient<'_>) -> Result<Dot, DotError> {
        let mut dot = Dot {
            specs: self.specs.clone(),
            context: tera::Context::new(),
            produced: Vec::with_capacity(self.specs.len()),
        };

        for (index, spec) in self.specs.iter().enumerate() {
            match spec.provider.produce(ambient, &dot.context) {
                Ok(provided) => {
                    dot.context
                        .insert(spec.exported_name.as_str(), &provided.value);
                    dot.produced.push((index, provided));
                }
                Err(source) => {
                    let cleanup_errors = dot.unwind(Some(&*source));
                    let mut errors = vec![DotError::Produce {
                        name: spec.exported_name.clone(),
                        token: spec.field_token.clone(),
                        source,
                    }];
                    errors.extend(cleanup_errors);
                    return Err(DotError::join(errors)
                        .unwrap_or_else(|| DotError::Execution("acquisition failed".into())));
                }
            }
        }
        Ok(dot)
    }

    /// Clean up in reverse order and join every failure with `error`.
    pub fn release(&self, dot: Dot, error: Option<BoxError>) -> Result<(), DotError> {
        dot.release(error)
    }
}

/// An acquired composite value.
pub struct Dot {
    specs: Arc<[ProviderSpec]>,
    context: tera::Context,
    produced: Vec<(usize, Provided)>,
}

impl fmt::Debug for Dot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dot")
            .field("fields", &self.context.clone().into_json())
            .finish()
    }
}

impl Dot {
    /// The template context: one entry per exported name.
    pub fn context(&self) -> &tera::Context {
        &self.context
    }

    /// Produced value of a field, by exported name.
    pub fn field(&self, name: &str) -> Option<&tera::Value> {
        self.context.get(name)
    }

    /// Clean up every produced field and report the joined outcome.
    pub fn release(mut self, error: Option<BoxError>) -> Result<(), DotError> {
        let cleanup_errors = self.unwind(error.as_deref());
        let errors = error
            .map(DotError::Execution)
            .into_iter()
            .chain(cleanup_errors)
            .collect();
        match DotError::join(errors) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn unwind(
        &mut self,
        error: Option<&(dyn std::error::Error + Send + Sync + 'static)>,
    ) -> Vec<DotError> {
        let mut errors = Vec::new();
        while let Some((index, provided)) = self.produced.pop() {
            let spec = &self.specs[index];
            if let Err(source) = spec.provider.cleanup(provided, error) {
                errors.push(DotError::Cleanup {
                    name: spec.exported_name.clone(),
                    token: spec.field_token.clone(),
                    source,
                });
            }
        }
        errors
    }
}

#[derive(Debug, thiserror::Error)]
#[error("dot dropped before release")]
struct DroppedUnreleased;

impl Drop for Dot {
    fn drop(&mut self) {
        if self.produced.is_empty() {
            return;
        }
        for error in self.unwind(Some(&DroppedUnreleased)) {
            warn!(error = %error, "cleanup failed for unreleased dot");
        }
    }
}
