//! Template source classification: delivery mode, initializers, partials,
//! definition counting and route paths.

/// Prefix marking a build-time initializer template.
pub(crate) const INIT_PREFIX: &str = "INIT ";

/// Pragma opting a template into streaming delivery.
const STREAM_PRAGMA: &str = "{# @stream #}";

/// How a template's output reaches the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Captured in memory and sent once execution succeeds.
    Buffered,
    /// Sent incrementally; the template may flush explicitly.
    Streaming,
}

/// Streaming when the first non-blank line starts with the stream pragma.
pub(crate) fn detect_mode(source: &str) -> DeliveryMode {
    let first = source
        .lines()
        .map(str::trim_start)
        .find(|line| !line.is_empty());
    match first {
        Some(line) if line.starts_with(STREAM_PRAGMA) => DeliveryMode::Streaming,
        _ => DeliveryMode::Buffered,
    }
}

/// The last path segment.
pub(crate) fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

pub(crate) fn is_initializer(path: &str) -> bool {
    file_name(path).starts_with(INIT_PREFIX)
}

/// Partials are compiled for `include`/`extends` but never routed.
pub(crate) fn is_partial(path: &str) -> bool {
    file_name(path).starts_with('_')
}

/// Number of named `block` and `macro` definitions in a template source.
pub(crate) fn count_definitions(source: &str) -> usize {
    let mut count = 0;
    let mut rest = source;
    while let Some(start) = rest.find("{%") {
        let tag = rest[start + 2..].trim_start_matches('-').trim_start();
        if tag.starts_with("block ") || tag.starts_with("macro ") {
            count += 1;
        }
        rest = &rest[start + 2..];
    }
    count
}

/// URL path for a routed template: `index<ext>` maps to its directory, other
/// templates drop the extension.
pub(crate) fn template_route_path(path: &str, extension: &str) -> String {
    let stem = path.strip_suffix(extension).unwrap_or(path);
    if stem == "index" {
        return "/".to_string();
    }
    if let Some(dir) = stem.strip_suffix("/index") {
        return format!("/{dir}/");
    }
    format!("/{stem}")
}
