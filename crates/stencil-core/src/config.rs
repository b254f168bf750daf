//! # Instance Configuration
//!
//! [`Config`] holds the serializable settings (loadable from TOML through the
//! server binary) plus the collaborators that cannot be serialized: file source,
//! dot providers, function libraries, minifier, cancellation token and the
//! parent span for instance logs. Those are attached with [`ConfigOption`]s,
//! applied in order by [`Config::build`]; the first failing option aborts the
//! build before any file is read.
//!
//! ## Example
//!
//! ```toml
//! templates_dir = "site"
//! template_extension = ".html"
//! minify = true
//!
//! [vars]
//! site_name = "Example"
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::Span;

use crate::dot::providers::RESERVED_FIELDS;
use crate::dot::ProviderSpec;
use crate::error::ConfigError;
use crate::funcs::FuncLibrary;
use crate::minify::{BasicMinifier, Minifier};
use crate::source::{DirSource, FileSource};

const DEFAULT_TEMPLATES_DIR: &str = "templates";
const DEFAULT_TEMPLATE_EXTENSION: &str = ".html";
const DEFAULT_LEFT_DELIM: &str = "{{";
const DEFAULT_RIGHT_DELIM: &str = "}}";

/// Instance configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory scanned when no explicit file source is attached.
    pub templates_dir: PathBuf,
    /// Files ending with this suffix are compiled as templates.
    pub template_extension: String,
    /// Left expression delimiter, translated to `{{` before compilation.
    pub left_delim: String,
    /// Right expression delimiter, translated to `}}` before compilation.
    pub right_delim: String,
    /// Minify buffered template output and static text assets.
    pub minify: bool,
    /// Values exposed to every template as `Instance.vars`.
    pub vars: BTreeMap<String, serde_json::Value>,

    #[serde(skip)]
    pub(crate) source: Option<Arc<dyn FileSource>>,
    #[serde(skip)]
    pub(crate) func_libraries: Vec<FuncLibrary>,
    #[serde(skip)]
    pub(crate) providers: Vec<ProviderSpec>,
    #[serde(skip)]
    pub(crate) minifier: Option<Arc<dyn Minifier>>,
    #[serde(skip)]
    pub(crate) cancel: Option<CancellationToken>,
    #[serde(skip)]
    pub(crate) span: Option<Span>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            templates_dir: PathBuf::from(DEFAULT_TEMPLATES_DIR),
            template_extension: DEFAULT_TEMPLATE_EXTENSION.to_string(),
            left_delim: DEFAULT_LEFT_DELIM.to_string(),
            right_delim: DEFAULT_RIGHT_DELIM.to_string(),
            minify: false,
            vars: BTreeMap::new(),
            source: None,
            func_libraries: Vec::new(),
            providers: Vec::new(),
            minifier: None,
            cancel: None,
            span: None,
        }
    }
}

impl Config {
    /// Fill blank settings with defaults. Deserialized configs may carry empty
    /// strings for values the file left out explicitly.
    pub fn apply_defaults(&mut self) {
        if self.templates_dir.as_os_str().is_empty() {
            self.templates_dir = PathBuf::from(DEFAULT_TEMPLATES_DIR);
        }
        if self.template_extension.is_empty() {
            self.template_extension = DEFAULT_TEMPLATE_EXTENSION.to_string();
        }
        if self.left_delim.is_empty() && self.right_delim.is_empty() {
            self.left_delim = DEFAULT_LEFT_DELIM.to_string();
            self.right_delim = DEFAULT_RIGHT_DELIM.to_string();
        }
    }

    /// Check settings that may have come from a file rather than an option.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_extension(&self.template_extension)?;
        Delimiters::new(&self.left_delim, &self.right_delim)?;
        Ok(())
    }

    /// The configured delimiter pair.
    pub fn delimiters(&self) -> Result<Delimiters, ConfigError> {
        Delimiters::new(&self.left_delim, &self.right_delim)
    }

    /// Caller-supplied dot providers, in registration order.
    pub fn providers(&self) -> &[ProviderSpec] {
        &self.providers
    }

    /// The attached file source, or a directory source over `templates_dir`.
    pub(crate) fn file_source(&self) -> Arc<dyn FileSource> {
        match &self.source {
            Some(source) => source.clone(),
            None => Arc::new(DirSource::new(&self.templates_dir)),
        }
    }

    /// The minifier to use, when minification is enabled.
    pub(crate) fn active_minifier(&self) -> Option<Arc<dyn Minifier>> {
        if !self.minify {
            return None;
        }
        Some(
            self.minifier
                .clone()
                .unwrap_or_else(|| Arc::new(BasicMinifier)),
        )
    }

    /// The cancellation token for instances built from this config.
    pub(crate) fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone().unwrap_or_default()
    }

    /// Parent of the instance span: the attached span, else the caller's current one.
    pub(crate) fn parent_span(&self) -> Span {
        self.span.clone().unwrap_or_else(Span::current)
    }
}

fn validate_extension(extension: &str) -> Result<(), ConfigError> {
    if extension.len() < 2 || !extension.starts_with('.') || extension.contains('/') {
        return Err(ConfigError::InvalidExtension(extension.to_string()));
    }
    Ok(())
}

/// Expression delimiter pair.
///
/// Tera only understands `{{ … }}`; any other pair is rewritten into it before
/// compilation while literal `{{`/`}}` text is preserved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delimiters {
    left: String,
    right: String,
}

impl Default for Delimiters {
    fn default() -> Self {
        Self {
            left: DEFAULT_LEFT_DELIM.to_string(),
            right: DEFAULT_RIGHT_DELIM.to_string(),
        }
    }
}

impl Delimiters {
    pub fn new(left: &str, right: &str) -> Result<Self, ConfigError> {
        let invalid = |reason| ConfigError::InvalidDelimiters {
            left: left.to_string(),
            right: right.to_string(),
            reason,
        };

        if left == DEFAULT_LEFT_DELIM && right == DEFAULT_RIGHT_DELIM {
            return Ok(Self::default());
        }
        if left.is_empty() || right.is_empty() {
            return Err(invalid("delimiters must not be empty"));
        }
        if left == right {
            return Err(invalid("left and right delimiters must differ"));
        }
        if left.chars().chain(right.chars()).any(char::is_whitespace) {
            return Err(invalid("delimiters must not contain whitespace"));
        }
        let clashes = ["{{", "}}", "{%", "%}", "{#", "#}"];
        if clashes
            .iter()
            .any(|tag| left.contains(tag) || right.contains(tag))
        {
            return Err(invalid("delimiters must not contain template tag markers"));
        }

        Ok(Self {
            left: left.to_string(),
            right: right.to_string(),
        })
    }

    pub fn left(&self) -> &str {
        &self.left
    }

    pub fn right(&self) -> &str {
        &self.right
    }

    pub fn is_default(&self) -> bool {
        self.left == DEFAULT_LEFT_DELIM && self.right == DEFAULT_RIGHT_DELIM
    }

    /// Rewrite template source written with these delimiters into Tera syntax.
    pub fn translate(&self, source: &str) -> String {
        if self.is_default() {
            return source.to_string();
        }

        let mut out = String::with_capacity(source.len());
        let mut rest = source;
        loop {
            let next = [
                (rest.find(self.left.as_str()), Token::Open),
                (rest.find("{{"), Token::LiteralOpen),
                (rest.find("}}"), Token::LiteralClose),
            ]
            .into_iter()
            .filter_map(|(pos, token)| pos.map(|pos| (pos, token)))
            .min_by_key(|(pos, _)| *pos);

            let Some((pos, token)) = next else {
                out.push_str(rest);
                break;
            };
            out.push_str(&rest[..pos]);

            match token {
                Token::Open => {
                    let after = &rest[pos + self.left.len()..];
                    match after.find(self.right.as_str()) {
                        Some(end) => {
                            out.push_str("{{");
                            out.push_str(&after[..end]);
                            out.push_str("}}");
                            rest = &after[end + self.right.len()..];
                        }
                        None => {
                            // Unterminated: leave the remainder as literal text.
                            out.push_str(&rest[pos..]);
                            break;
                        }
                    }
                }
                Token::LiteralOpen => {
                    out.push_str(r#"{{ "{{" }}"#);
                    rest = &rest[pos + 2..];
                }
                Token::LiteralClose => {
                    out.push_str(r#"{{ "}}" }}"#);
                    rest = &rest[pos + 2..];
                }
            }
        }
        out
    }
}

#[derive(Debug, Clone, Copy)]
enum Token {
    Open,
    LiteralOpen,
    LiteralClose,
}

type ApplyFn = dyn Fn(&mut Config) -> Result<(), ConfigError> + Send + Sync;

/// A reusable configuration step applied by [`Config::build`].
///
/// Options are `Fn` rather than `FnOnce` so a [`crate::Server`] can rebuild from
/// the same list on reload.
#[derive(Clone)]
pub struct ConfigOption(Arc<ApplyFn>);

impl fmt::Debug for ConfigOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ConfigOption")
    }
}

impl ConfigOption {
    /// Wrap an arbitrary configuration step.
    pub fn new<F>(apply: F) -> Self
    where
        F: Fn(&mut Config) -> Result<(), ConfigError> + Send + Sync + 'static,
    {
        Self(Arc::new(apply))
    }

    pub fn apply(&self, config: &mut Config) -> Result<(), ConfigError> {
        (self.0)(config)
    }

    /// Scan a directory.
    pub fn templates_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self::new(move |config| {
            config.templates_dir = dir.clone();
            config.source = None;
            Ok(())
        })
    }

    /// Scan an arbitrary file source instead of `templates_dir`.
    pub fn source(source: Arc<dyn FileSource>) -> Self {
        Self::new(move |config| {
            config.source = Some(source.clone());
            Ok(())
        })
    }

    pub fn template_extension(extension: impl Into<String>) -> Self {
        let extension = extension.into();
        Self::new(move |config| {
            validate_extension(&extension)?;
            config.template_extension = extension.clone();
            Ok(())
        })
    }

    pub fn delimiters(left: impl Into<String>, right: impl Into<String>) -> Self {
        let (left, right) = (left.into(), right.into());
        Self::new(move |config| {
            Delimiters::new(&left, &right)?;
            config.left_delim = left.clone();
            config.right_delim = right.clone();
            Ok(())
        })
    }

    /// Add a function library; later libraries override earlier ones by name.
    pub fn functions(library: FuncLibrary) -> Self {
        Self::new(move |config| {
            config.func_libraries.push(library.clone());
            Ok(())
        })
    }

    /// Append a dot provider. Names must be identifiers, unique, and not one of
    /// the built-in fields.
    pub fn provider(spec: ProviderSpec) -> Self {
        Self::new(move |config| {
            let name = spec.exported_name();
            if !is_identifier(name) {
                return Err(ConfigError::InvalidProviderName(name.to_string()));
            }
            if RESERVED_FIELDS.contains(&name) {
                return Err(ConfigError::ReservedProvider(name.to_string()));
            }
            if config.providers.iter().any(|p| p.exported_name() == name) {
                return Err(ConfigError::DuplicateProvider(name.to_string()));
            }
            config.providers.push(spec.clone());
            Ok(())
        })
    }

    pub fn minify(enabled: bool) -> Self {
        Self::new(move |config| {
            config.minify = enabled;
            Ok(())
        })
    }

    /// Replace the built-in minifier. Does not enable minification by itself.
    pub fn minifier(minifier: Arc<dyn Minifier>) -> Self {
        Self::new(move |config| {
            config.minifier = Some(minifier.clone());
            Ok(())
        })
    }

    /// Cancellation signal for the built instance.
    pub fn cancellation(token: CancellationToken) -> Self {
        Self::new(move |config| {
            config.cancel = Some(token.clone());
            Ok(())
        })
    }

    /// Parent span for the build logs and every request span of the instance.
    pub fn span(span: Span) -> Self {
        Self::new(move |config| {
            config.span = Some(span.clone());
            Ok(())
        })
    }

    /// Expose `value` to templates as `Instance.vars.<name>`.
    pub fn var(name: impl Into<String>, value: serde_json::Value) -> Self {
        let name = name.into();
        Self::new(move |config| {
            config.vars.insert(name.clone(), value.clone());
            Ok(())
        })
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
