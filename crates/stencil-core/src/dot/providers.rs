//! Built-in dot fields: `Instance`, `Req`, and the terminal `Resp`/`Flush`.

use std::sync::Arc;

use serde_json::{json, Map, Value};

use super::{Ambient, Provided, ProviderSpec, SurfaceRegistry, ValueProvider};
use crate::error::BoxError;

pub const INSTANCE_FIELD: &str = "Instance";
pub const REQUEST_FIELD: &str = "Req";
pub const RESPONSE_FIELD: &str = "Resp";
pub const FLUSH_FIELD: &str = "Flush";

/// Names caller providers may not use.
pub const RESERVED_FIELDS: [&str; 4] = [INSTANCE_FIELD, REQUEST_FIELD, RESPONSE_FIELD, FLUSH_FIELD];

/// `Instance`: `{"id", "vars"}`.
#[derive(Debug)]
pub struct InstanceProvider {
    vars: Value,
}

impl InstanceProvider {
    pub fn new(vars: Value) -> Self {
        Self { vars }
    }

    pub fn spec(vars: Value) -> ProviderSpec {
        ProviderSpec::new(INSTANCE_FIELD, "instance", Self::new(vars))
    }
}

impl ValueProvider for InstanceProvider {
    fn produce(
        &self,
        ambient: &Ambient<'_>,
        _fields: &tera::Context,
    ) -> Result<Provided, BoxError> {
        Ok(Provided::new(json!({
            "id": ambient.instance_id,
            "vars": self.vars,
        })))
    }
}

/// `Req`: method, path, query, decoded params, lowercase headers and host.
#[derive(Debug, Default)]
pub struct RequestProvider;

impl RequestProvider {
    pub fn spec() -> ProviderSpec {
        ProviderSpec::new(REQUEST_FIELD, "request", Self)
    }
}

impl ValueProvider for RequestProvider {
    fn produce(
        &self,
        ambient: &Ambient<'_>,
        _fields: &tera::Context,
    ) -> Result<Provided, BoxError> {
        let request = ambient.request;
        let query = request.uri.query().unwrap_or_default();

        let mut params = Map::new();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            // First occurrence wins for repeated keys.
            params
                .entry(key.into_owned())
                .or_insert_with(|| Value::String(value.into_owned()));
        }

        let mut headers = Map::new();
        for name in request.headers.keys() {
            let joined = request
                .headers
                .get_all(name)
                .iter()
                .filter_map(|value| value.to_str().ok())
                .collect::<Vec<_>>()
                .join(", ");
            headers.insert(name.as_str().to_string(), Value::String(joined));
        }

        let host = request
            .headers
            .get(axum::http::header::HOST)
            .and_then(|value| value.to_str().ok())
            .or_else(|| request.uri.authority().map(|authority| authority.as_str()))
            .unwrap_or_default();

        Ok(Provided::new(json!({
            "id": request.request_id,
            "method": request.method.as_str(),
            "path": request.uri.path(),
            "query": query,
            "params": params,
            "headers": headers,
            "host": host,
        })))
    }
}

/// `Resp` or `Flush`: registers the execution's response surface and exposes
/// its handle to the surface filters.
#[derive(Debug)]
pub struct SurfaceProvider {
    registry: Arc<SurfaceRegistry>,
}

impl SurfaceProvider {
    pub fn new(registry: Arc<SurfaceRegistry>) -> Self {
        Self { registry }
    }

    pub fn response_spec(registry: Arc<SurfaceRegistry>) -> ProviderSpec {
        ProviderSpec::new(RESPONSE_FIELD, "response", Self::new(registry))
    }

    pub fn flush_spec(registry: Arc<SurfaceRegistry>) -> ProviderSpec {
        ProviderSpec::new(FLUSH_FIELD, "flush", Self::new(registry))
    }
}

impl ValueProvider for SurfaceProvider {
    fn produce(
        &self,
        ambient: &Ambient<'_>,
        _fields: &tera::Context,
    ) -> Result<Provided, BoxError> {
        let handle = self.registry.register(ambient.response.clone());
        Ok(Provided::with_state(json!({ "handle": handle }), handle))
    }

    fn cleanup(
        &self,
        mut provided: Provided,
        _error: Option<&(dyn std::error::Error + Send + Sync + 'static)>,
    ) -> Result<(), BoxError> {
        if let Some(handle) = provided.take_state::<u64>() {
            self.registry.remove(handle);
        }
        Ok(())
    }
}
