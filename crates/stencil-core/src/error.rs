//! # Error Types
//!
//! One `thiserror` enum per concern:
//!
//! - [`ConfigError`]: invalid options, never partially applied
//! - [`ScanError`]: walking and reading the file source
//! - [`DotError`]: provider acquisition, cleanup and joined execution outcomes
//! - [`BuildError`]: everything that aborts [`crate::Config::build`]

use std::fmt;
use std::io;

/// Boxed error used at provider and minifier seams.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Invalid configuration or option.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid delimiters '{left}' / '{right}': {reason}")]
    InvalidDelimiters {
        left: String,
        right: String,
        reason: &'static str,
    },

    #[error("template extension must start with '.' and name a suffix, got '{0}'")]
    InvalidExtension(String),

    #[error("dot field name '{0}' is already registered")]
    DuplicateProvider(String),

    #[error("dot field name '{0}' is reserved")]
    ReservedProvider(String),

    #[error("invalid dot field name '{0}': expected an identifier")]
    InvalidProviderName(String),
}

/// Failure while enumerating or reading the file source.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("failed to list files: {0}")]
    List(#[source] io::Error),

    #[error("failed to read '{path}': {source}")]
    Read { path: String, source: io::Error },

    #[error("template '{0}' is not valid UTF-8")]
    NotUtf8(String),

    #[error("route '{pattern}' is claimed by both '{first}' and '{second}'")]
    DuplicateRoute {
        pattern: String,
        first: String,
        second: String,
    },

    #[error("failed to minify '{path}': {source}")]
    Minify { path: String, source: BoxError },
}

/// Dot composition failure.
///
/// `Multiple` is the joined form produced when an execution error and one or more
/// cleanup errors (or several cleanup errors) occur for the same composite value.
/// The first element of a joined error is always the original cause.
#[derive(Debug, thiserror::Error)]
pub enum DotError {
    #[error("dot field name '{0}' is registered more than once")]
    DuplicateName(String),

    #[error("dot provider '{name}' ({token}) failed to produce a value: {source}")]
    Produce {
        name: String,
        token: String,
        source: BoxError,
    },

    #[error("dot provider '{name}' ({token}) cleanup failed: {source}")]
    Cleanup {
        name: String,
        token: String,
        source: BoxError,
    },

    #[error("execution failed: {0}")]
    Execution(#[source] BoxError),

    #[error("{}", join_messages(.0))]
    Multiple(Vec<DotError>),
}

impl DotError {
    /// Join errors: `None` for an empty list, the error itself for one, `Multiple`
    /// otherwise. Nested `Multiple`s are flattened.
    pub fn join(errors: Vec<DotError>) -> Option<DotError> {
        let mut flat = Vec::with_capacity(errors.len());
        for error in errors {
            match error {
                DotError::Multiple(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        match flat.len() {
            0 => None,
            1 => flat.pop(),
            _ => Some(DotError::Multiple(flat)),
        }
    }

    /// Iterate the individual errors of a (possibly joined) error.
    pub fn errors(&self) -> Box<dyn Iterator<Item = &DotError> + '_> {
        match self {
            DotError::Multiple(inner) => Box::new(inner.iter()),
            other => Box::new(std::iter::once(other)),
        }
    }

    /// Whether this error carries an execution failure.
    pub fn has_execution_error(&self) -> bool {
        self.errors()
            .any(|error| matches!(error, DotError::Execution(_)))
    }

    /// Whether any provider cleanup failed.
    pub fn has_cleanup_error(&self) -> bool {
        self.errors()
            .any(|error| matches!(error, DotError::Cleanup { .. }))
    }
}

fn join_messages(errors: &[DotError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Which part of the initializer protocol failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStage {
    Acquisition,
    Execution,
    Cleanup,
}

impl fmt::Display for InitStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            InitStage::Acquisition => "acquisition",
            InitStage::Execution => "execution",
            InitStage::Cleanup => "cleanup",
        };
        f.write_str(stage)
    }
}

/// Anything that aborts instance construction. No partial instance survives.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("failed to configure instance: {0}")]
    Configure(#[from] ConfigError),

    #[error("error scanning files: {0}")]
    Scan(#[from] ScanError),

    #[error("failed to compile templates: {}", error_chain(.0))]
    Compile(#[source] tera::Error),

    #[error("failed to assemble dot: {0}")]
    Dot(#[source] DotError),

    #[error("failed to initialize dot value: {0}")]
    DotInit(#[source] DotError),

    #[error("template initializer '{name}' failed during {stage}: {source}")]
    Initializer {
        name: String,
        stage: InitStage,
        source: DotError,
    },
}

/// Render an error together with its `source()` chain, `outer: inner: innermost`.
///
/// Tera reports the useful part of render errors (the failing filter, the missing
/// variable) in the source chain, so log lines use this instead of `Display`.
pub fn error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
