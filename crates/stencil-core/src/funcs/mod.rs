//! # Function Libraries
//!
//! A [`FuncLibrary`] is a named set of Tera filters and functions. The builder
//! merges, in order: the built-in surface filters, the case conversion helpers
//! and every caller library. A later entry replaces an earlier one with the same
//! name.
//!
//! Built-in surface filters take the handle exposed as `Resp` or `Flush`:
//!
//! ```text
//! {{ Resp | status(code=201) }}
//! {{ Resp | add_header(name="x-tag", value="a") }}
//! {{ Resp | set_header(name="cache-control", value="no-store") }}
//! {{ Resp | return_status(code=404) }}
//! {{ Flush | flush }}
//! ```

mod filters;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use axum::http::StatusCode;
use tera::{Filter, Function, Tera, Value};

use crate::dot::{ResponseSurface, SurfaceRegistry};

#[derive(Clone)]
struct SharedFilter(Arc<dyn Filter>);

impl Filter for SharedFilter {
    fn filter(&self, value: &Value, args: &HashMap<String, Value>) -> tera::Result<Value> {
        self.0.filter(value, args)
    }

    fn is_safe(&self) -> bool {
        self.0.is_safe()
    }
}

#[derive(Clone)]
struct SharedFunction(Arc<dyn Function>);

impl Function for SharedFunction {
    fn call(&self, args: &HashMap<String, Value>) -> tera::Result<Value> {
        self.0.call(args)
    }

    fn is_safe(&self) -> bool {
        self.0.is_safe()
    }
}

/// Filters and functions made available to every template of an instance.
#[derive(Clone, Default)]
pub struct FuncLibrary {
    filters: BTreeMap<String, SharedFilter>,
    functions: BTreeMap<String, SharedFunction>,
}

impl fmt::Debug for FuncLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FuncLibrary")
            .field("filters", &self.filters.keys().collect::<Vec<_>>())
            .field("functions", &self.functions.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl FuncLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a filter, builder style.
    pub fn filter(mut self, name: impl Into<String>, filter: impl Filter + 'static) -> Self {
        self.filters
            .insert(name.into(), SharedFilter(Arc::new(filter)));
        self
    }

    /// Add a function, builder style.
    pub fn function(mut self, name: impl Into<String>, function: impl Function + 'static) -> Self {
        self.functions
            .insert(name.into(), SharedFunction(Arc::new(function)));
        self
    }

    /// Merge `other` into this library; its entries win on name collision.
    pub fn extend(&mut self, other: &FuncLibrary) {
        self.filters
            .extend(other.filters.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.functions
            .extend(other.functions.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    pub fn filter_names(&self) -> impl Iterator<Item = &str> {
        self.filters.keys().map(String::as_str)
    }

    pub fn function_names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty() && self.functions.is_empty()
    }

    /// The general-purpose helper set: case conversion filters.
    pub fn helpers() -> Self {
        Self::new()
            .filter("snake_case", filters::snake_case)
            .filter("pascal_case", filters::pascal_case)
            .filter("camel_case", filters::camel_case)
            .filter("kebab_case", filters::kebab_case)
            .filter("shouty_snake_case", filters::shouty_snake_case)
            .filter("title_case", filters::title_case)
    }

    /// Surface filters bound to one instance's registry.
    pub(crate) fn builtins(registry: Arc<SurfaceRegistry>) -> Self {
        let status = {
            let registry = registry.clone();
            move |value: &Value, args: &HashMap<String, Value>| -> tera::Result<Value> {
                let surface = resolve(&registry, value, "status")?;
                let code = status_arg(args, "status")?;
                surface.set_status(code).map_err(surface_error)?;
                Ok(empty())
            }
        };
        let add_header = {
            let registry = registry.clone();
            move |value: &Value, args: &HashMap<String, Value>| -> tera::Result<Value> {
                let surface = resolve(&registry, value, "add_header")?;
                let (name, header) = header_args(args, "add_header")?;
                surface.add_header(name, header).map_err(surface_error)?;
                Ok(empty())
            }
        };
        let set_header = {
            let registry = registry.clone();
            move |value: &Value, args: &HashMap<String, Value>| -> tera::Result<Value> {
                let surface = resolve(&registry, value, "set_header")?;
                let (name, header) = header_args(args, "set_header")?;
                surface.set_header(name, header).map_err(surface_error)?;
                Ok(empty())
            }
        };
        let return_status = {
            let registry = registry.clone();
            move |value: &Value, args: &HashMap<String, Value>| -> tera::Result<Value> {
                let surface = resolve(&registry, value, "return_status")?;
                let code = status_arg(args, "return_status")?;
                surface.abort_with(code).map_err(surface_error)?;
                Err(tera::Error::msg(format!("execution stopped with status {code}")))
            }
        };
        let flush = move |value: &Value, _args: &HashMap<String, Value>| -> tera::Result<Value> {
            let surface = resolve(&registry, value, "flush")?;
            surface
                .flush_pending()
                .map_err(|e| tera::Error::chain("flush failed", e))?;
            Ok(empty())
        };

        Self::new()
            .filter("status", status)
            .filter("add_header", add_header)
            .filter("set_header", set_header)
            .filter("return_status", return_status)
            .filter("flush", flush)
    }

    /// Register every entry on a Tera instance.
    pub(crate) fn register(&self, tera: &mut Tera) {
        for (name, filter) in &self.filters {
            tera.register_filter(name, filter.clone());
        }
        for (name, function) in &self.functions {
            tera.register_function(name, function.clone());
        }
    }
}

fn empty() -> Value {
    Value::String(String::new())
}

fn resolve(
    registry: &SurfaceRegistry,
    value: &Value,
    filter: &str,
) -> tera::Result<Arc<ResponseSurface>> {
    let handle = value
        .get("handle")
        .and_then(Value::as_u64)
        .ok_or_else(|| tera::Error::msg(format!("{filter} filter expects Resp or Flush")))?;
    registry
        .get(handle)
        .ok_or_else(|| tera::Error::msg(format!("{filter}: response is no longer active")))
}

fn status_arg(args: &HashMap<String, Value>, filter: &str) -> tera::Result<StatusCode> {
    args.get("code")
        .and_then(Value::as_u64)
        .and_then(|code| u16::try_from(code).ok())
        .and_then(|code| StatusCode::from_u16(code).ok())
        .ok_or_else(|| tera::Error::msg(format!("{filter} filter expects a valid `code`")))
}

fn header_args<'a>(
    args: &'a HashMap<String, Value>,
    filter: &str,
) -> tera::Result<(&'a str, &'a str)> {
    let arg = |key: &str| {
        args.get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| tera::Error::msg(format!("{filter} filter expects a string `{key}`")))
    };
    Ok((arg("name")?, arg("value")?))
}

fn surface_error(error: crate::dot::surface::SurfaceError) -> tera::Error {
    tera::Error::msg(error.to_string())
}
