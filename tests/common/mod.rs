//! Helpers for end-to-end scenarios.
//!
// Note: Using #[allow(dead_code)] instead of #[expect] because helpers may be
// used by some test targets but not others.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{Request, Response};
use futures::StreamExt;
use stencil::{
    Ambient, BoxError, Config, ConfigOption, FuncLibrary, InstanceBuild, MemorySource, Provided,
    ProviderSpec, ValueProvider,
};
use tower::ServiceExt;

/// Build an instance over an in-memory site.
pub fn build(source: MemorySource, options: Vec<ConfigOption>) -> InstanceBuild {
    let mut all = vec![ConfigOption::source(Arc::new(source))];
    all.extend(options);
    Config::default().build(all).expect("instance should build")
}

pub fn get(path: &str) -> Request<Body> {
    Request::get(path).body(Body::empty()).unwrap()
}

/// Send one request through the instance service.
pub async fn send(build: &InstanceBuild, request: Request<Body>) -> Response<Body> {
    build.instance.service().oneshot(request).await.unwrap()
}

pub async fn body_string(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Collect a streamed body chunk by chunk.
pub async fn body_chunks(response: Response<Body>) -> Vec<String> {
    let mut stream = response.into_body().into_data_stream();
    let mut chunks = Vec::new();
    while let Some(chunk) = stream.next().await {
        chunks.push(String::from_utf8(chunk.unwrap().to_vec()).unwrap());
    }
    chunks
}

/// Function library with a `set_counter(value=N)` function that records the
/// last value it was called with.
pub fn counter_library(counter: Arc<AtomicI64>) -> FuncLibrary {
    FuncLibrary::new().function(
        "set_counter",
        move |args: &HashMap<String, tera::Value>| -> tera::Result<tera::Value> {
            let value = args
                .get("value")
                .and_then(tera::Value::as_i64)
                .ok_or_else(|| tera::Error::msg("set_counter expects `value`"))?;
            counter.store(value, Ordering::SeqCst);
            Ok(tera::Value::String(String::new()))
        },
    )
}

/// Provider recording every produce and cleanup. Failures can be switched on
/// after the build, which acquires caller providers once itself.
#[derive(Debug, Default)]
pub struct Journal {
    entries: Mutex<Vec<String>>,
    fail_produce: AtomicBool,
    fail_cleanup: AtomicBool,
}

impl Journal {
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }

    pub fn fail_produce(&self, fail: bool) {
        self.fail_produce.store(fail, Ordering::SeqCst);
    }

    pub fn fail_cleanup(&self, fail: bool) {
        self.fail_cleanup.store(fail, Ordering::SeqCst);
    }

    pub fn spec(self: &Arc<Self>, name: &str) -> ProviderSpec {
        ProviderSpec::new(name, name.to_lowercase(), JournalProvider(self.clone()))
    }

    fn record(&self, entry: String) {
        self.entries.lock().unwrap().push(entry);
    }
}

#[derive(Debug)]
pub struct JournalProvider(pub Arc<Journal>);

impl ValueProvider for JournalProvider {
    fn produce(
        &self,
        ambient: &Ambient<'_>,
        _fields: &tera::Context,
    ) -> Result<Provided, BoxError> {
        self.0.record(format!("produce {}", ambient.request.uri.path()));
        if self.0.fail_produce.load(Ordering::SeqCst) {
            return Err("provider unavailable".into());
        }
        Ok(Provided::new(serde_json::json!({ "request_id": ambient.request.request_id })))
    }

    fn cleanup(
        &self,
        _provided: Provided,
        error: Option<&(dyn std::error::Error + Send + Sync + 'static)>,
    ) -> Result<(), BoxError> {
        self.0.record(format!("cleanup ok={}", error.is_none()));
        if self.0.fail_cleanup.load(Ordering::SeqCst) {
            return Err("commit failed".into());
        }
        Ok(())
    }
}
