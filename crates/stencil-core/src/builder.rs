//! # Instance Builder
//!
//! [`Config::build`] turns a configuration and its options into a frozen
//! [`Instance`]. Every step is a hard failure point and nothing partial is
//! returned:
//!
//! 1. apply defaults and options in order, then open the `instance` span that
//!    covers the rest of the build and parents every request span
//! 2. merge function libraries (built-ins, helpers, caller libraries)
//! 3. scan the file source: compile templates, group static files and their
//!    pre-compressed alternates, build the router
//! 4. assemble the buffered and streaming composers
//! 5. run `INIT ` templates once, before the instance is exposed
//! 6. log the final stats

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tracing::{debug, info, info_span};

use crate::config::{Config, ConfigOption, Delimiters};
use crate::dot::providers::{InstanceProvider, RequestProvider, SurfaceProvider};
use crate::dot::{Composer, ProviderSpec, RequestInfo, ResponseSurface, SurfaceRegistry};
use crate::error::{BoxError, BuildError, DotError, InitStage, ScanError};
use crate::funcs::FuncLibrary;
use crate::instance::{next_instance_id, Instance};
use crate::minify::{is_minifiable, media_type, Minifier};
use crate::router::{route_pattern, RouteHandler, Router, TemplateRoute};
use crate::source::FileSource;
use crate::statics::{content_type_for, Encoding, StaticBody, StaticRoute, StaticVariant};
use crate::templates::{self, DeliveryMode};

/// Counters accumulated while building an instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildStats {
    pub routes: usize,
    pub template_files: usize,
    pub template_definitions: usize,
    pub template_initializers: usize,
    pub static_files: usize,
    pub static_alternates: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteKind {
    Template {
        mode: DeliveryMode,
    },
    /// Every servable variant: `None` for the identity file, then one entry
    /// per pre-compressed alternate.
    Static {
        encodings: Vec<Option<Encoding>>,
    },
}

/// One routed path, as reported by the builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// `GET <path>`.
    pub pattern: String,
    pub path: String,
    pub kind: RouteKind,
    /// Source file the route was built from.
    pub file: String,
}

/// Result of a successful build.
#[derive(Debug)]
pub struct InstanceBuild {
    pub instance: Arc<Instance>,
    pub stats: BuildStats,
    /// Routes sorted by path.
    pub routes: Vec<Route>,
}

impl Config {
    /// Build an instance from this configuration plus `options`.
    pub fn build<I>(mut self, options: I) -> Result<InstanceBuild, BuildError>
    where
        I: IntoIterator<Item = ConfigOption>,
    {
        let started = Instant::now();
        self.apply_defaults();
        for option in options {
            option.apply(&mut self)?;
        }

        let id = next_instance_id();
        let span = info_span!(parent: &self.parent_span(), "instance", id);
        let _entered = span.enter();
        info!("initializing");

        self.validate()?;
        let delimiters = self.delimiters()?;

        let surfaces = Arc::new(SurfaceRegistry::new());
        let mut functions = FuncLibrary::builtins(surfaces.clone());
        functions.extend(&FuncLibrary::helpers());
        for library in &self.func_libraries {
            functions.extend(library);
        }

        let source = self.file_source();
        let minifier = self.active_minifier();
        let scan = scan(
            source.as_ref(),
            &source,
            &self.template_extension,
            &delimiters,
            minifier.as_deref(),
        )?;

        let mut tera = tera::Tera::default();
        functions.register(&mut tera);
        tera.add_raw_templates(scan.templates)
            .map_err(BuildError::Compile)?;

        let vars = serde_json::Value::Object(self.vars.clone().into_iter().collect());
        let instance_spec = InstanceProvider::spec(vars);
        let composer = |terminal: Option<ProviderSpec>| {
            let mut specs = vec![instance_spec.clone()];
            if terminal.is_some() {
                specs.push(RequestProvider::spec());
            }
            specs.extend(self.providers.iter().cloned());
            specs.extend(terminal);
            Composer::new(specs).map_err(BuildError::Dot)
        };
        let buffered = composer(Some(SurfaceProvider::response_spec(surfaces.clone())))?;
        let streaming = composer(Some(SurfaceProvider::flush_spec(surfaces.clone())))?;
        let init = composer(None)?;

        let instance = Instance {
            id,
            span: span.clone(),
            router: scan.router,
            templates: tera,
            buffered,
            streaming,
            surfaces,
            minifier,
            cancel: self.cancellation_token(),
        };

        run_initializers(&instance, &init, &scan.initializers)?;

        let stats = BuildStats {
            routes: instance.router.len(),
            ..scan.stats
        };
        info!(
            routes = stats.routes,
            template_files = stats.template_files,
            template_definitions = stats.template_definitions,
            template_initializers = stats.template_initializers,
            static_files = stats.static_files,
            static_alternates = stats.static_alternates,
            load_time_ms = started.elapsed().as_millis() as u64,
            "instance loaded"
        );

        Ok(InstanceBuild {
            instance: Arc::new(instance),
            stats,
            routes: scan.routes.into_values().collect(),
        })
    }
}

#[derive(Debug, Default)]
struct Scan {
    templates: Vec<(String, String)>,
    initializers: Vec<String>,
    router: Router,
    routes: BTreeMap<String, Route>,
    stats: BuildStats,
}

impl Scan {
    fn add_route(
        &mut self,
        path: String,
        file: &str,
        kind: RouteKind,
        handler: RouteHandler,
    ) -> Result<(), ScanError> {
        if !self.router.insert(&path, handler) {
            let first = self
                .routes
                .get(&path)
                .map(|route| route.file.clone())
                .unwrap_or_default();
            return Err(ScanError::DuplicateRoute {
                pattern: route_pattern(&path),
                first,
                second: file.to_string(),
            });
        }
        self.routes.insert(
            path.clone(),
            Route {
                pattern: route_pattern(&path),
                path,
                kind,
                file: file.to_string(),
            },
        );
        Ok(())
    }
}

fn is_template(path: &str, extension: &str) -> bool {
    path.ends_with(extension) && templates::file_name(path).len() > extension.len()
}

fn read(source: &dyn FileSource, path: &str) -> Result<Vec<u8>, ScanError> {
    source.read(path).map_err(|e| ScanError::Read {
        path: path.to_string(),
        source: e,
    })
}

fn scan(
    source: &dyn FileSource,
    shared: &Arc<dyn FileSource>,
    extension: &str,
    delimiters: &Delimiters,
    minifier: Option<&dyn Minifier>,
) -> Result<Scan, ScanError> {
    let paths = source.list().map_err(ScanError::List)?;
    let mut scan = Scan::default();

    let (template_paths, other_paths): (Vec<&String>, Vec<&String>) =
        paths.iter().partition(|path| is_template(path, extension));

    for path in template_paths {
        let raw = read(source, path)?;
        let text = String::from_utf8(raw).map_err(|_| ScanError::NotUtf8(path.clone()))?;
        let text = delimiters.translate(&text);

        scan.stats.template_files += 1;
        scan.stats.template_definitions += templates::count_definitions(&text);

        if templates::is_initializer(path) {
            scan.stats.template_initializers += 1;
            scan.initializers.push(path.clone());
        } else if !templates::is_partial(path) {
            let mode = templates::detect_mode(&text);
            debug!(template = %path, ?mode, "compiled template");
            let route = Arc::new(TemplateRoute {
                name: path.clone(),
                mode,
            });
            scan.add_route(
                templates::template_route_path(path, extension),
                path,
                RouteKind::Template { mode },
                RouteHandler::Template(route),
            )?;
        }
        scan.templates.push((path.clone(), text));
    }

    // Pre-compressed files attach to an identity static file when one exists.
    let identities: BTreeSet<&str> = other_paths
        .iter()
        .filter(|path| Encoding::from_path(path).is_none())
        .map(|path| path.as_str())
        .collect();
    let mut alternates: HashMap<&str, Vec<(&str, Encoding)>> = HashMap::new();
    let mut plain = Vec::new();
    for path in &other_paths {
        match Encoding::from_path(path) {
            Some((base, encoding)) if identities.contains(base) => {
                alternates
                    .entry(base)
                    .or_default()
                    .push((path.as_str(), encoding));
            }
            _ => plain.push(path.as_str()),
        }
    }

    for path in plain {
        let contents = read(source, path)?;
        let content_type = content_type_for(path);

        let identity = match minifier.filter(|_| is_minifiable(content_type)) {
            Some(minifier) => {
                let minified = minifier
                    .minify(&media_type(content_type), &contents)
                    .map_err(|source: BoxError| ScanError::Minify {
                        path: path.to_string(),
                        source,
                    })?;
                let body = StaticBody::Inline(Bytes::from(minified.clone()));
                StaticVariant::new(None, &minified, body)
            }
            None => StaticVariant::new(None, &contents, source_body(shared, path)),
        };

        let mut variants = Vec::new();
        for (encoded_path, encoding) in alternates.remove(path).unwrap_or_default() {
            let encoded = read(source, encoded_path)?;
            variants.push(StaticVariant::new(
                Some(encoding),
                &encoded,
                source_body(shared, encoded_path),
            ));
        }

        scan.stats.static_files += 1;
        scan.stats.static_alternates += variants.len();
        let encodings = std::iter::once(None)
            .chain(variants.iter().map(|variant| variant.encoding))
            .collect();
        let url_path = format!("/{path}");
        let route = Arc::new(StaticRoute {
            path: url_path.clone(),
            content_type,
            identity,
            alternates: variants.clone(),
        });
        scan.add_route(
            url_path,
            path,
            RouteKind::Static { encodings },
            RouteHandler::Static(route),
        )?;
    }

    Ok(scan)
}

fn source_body(shared: &Arc<dyn FileSource>, path: &str) -> StaticBody {
    StaticBody::Source {
        source: shared.clone(),
        path: path.to_string(),
    }
}

fn run_initializers(
    instance: &Instance,
    composer: &Composer,
    initializers: &[String],
) -> Result<(), BuildError> {
    let request = RequestInfo::synthetic();
    let response = Arc::new(ResponseSurface::discard());
    let ambient = instance.ambient(&request, &response);

    // Validate the instance-scoped context once, even with no initializers.
    let dot = composer.acquire(&ambient).map_err(BuildError::DotInit)?;
    composer.release(dot, None).map_err(BuildError::DotInit)?;

    for name in initializers {
        let failed = |stage, source: DotError| BuildError::Initializer {
            name: name.clone(),
            stage,
            source,
        };

        let dot = composer
            .acquire(&ambient)
            .map_err(|e| failed(InitStage::Acquisition, e))?;
        let outcome = instance
            .templates
            .render_to(name, dot.context(), std::io::sink())
            .map_err(|e| Box::new(e) as BoxError);
        composer.release(dot, outcome.err()).map_err(|e| {
            let stage = if e.has_execution_error() {
                InitStage::Execution
            } else {
                InitStage::Cleanup
            };
            failed(stage, e)
        })?;
        debug!(initializer = %name, "initializer completed");
    }
    Ok(())
}
