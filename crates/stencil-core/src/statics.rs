//! # Static Files
//!
//! Non-template files are served as static routes. Pre-compressed siblings
//! (`style.css.br`, `style.css.zst`, `style.css.gz`) are grouped under the
//! logical path of their identity original and picked by `Accept-Encoding`:
//! among the acceptable alternates the smallest wins, ties broken in the order
//! br, zstd, gzip. Identity is always the fallback.

use std::fmt;
use std::io;
use std::sync::Arc;

use bytes::Bytes;
use sha2::{Digest, Sha256};

use crate::source::FileSource;

/// A pre-applied content coding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    Brotli,
    Zstd,
    Gzip,
}

impl Encoding {
    /// Tie-break order, most preferred first.
    pub const PREFERENCE: [Encoding; 3] = [Encoding::Brotli, Encoding::Zstd, Encoding::Gzip];

    /// The `Content-Encoding` token.
    pub fn token(self) -> &'static str {
        match self {
            Encoding::Brotli => "br",
            Encoding::Zstd => "zstd",
            Encoding::Gzip => "gzip",
        }
    }

    pub fn suffix(self) -> &'static str {
        match self {
            Encoding::Brotli => ".br",
            Encoding::Zstd => ".zst",
            Encoding::Gzip => ".gz",
        }
    }

    /// Split `style.css.br` into `style.css` and its encoding.
    pub fn from_path(path: &str) -> Option<(&str, Encoding)> {
        Self::PREFERENCE.into_iter().find_map(|encoding| {
            path.strip_suffix(encoding.suffix())
                .filter(|base| !base.is_empty() && !base.ends_with('/'))
                .map(|base| (base, encoding))
        })
    }

    fn rank(self) -> usize {
        Self::PREFERENCE
            .iter()
            .position(|e| *e == self)
            .unwrap_or(Self::PREFERENCE.len())
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Where a variant's bytes come from at request time.
#[derive(Clone)]
pub enum StaticBody {
    /// Held in memory, e.g. after build-time minification.
    Inline(Bytes),
    /// Read from the file source on each request.
    Source {
        source: Arc<dyn FileSource>,
        path: String,
    },
}

impl fmt::Debug for StaticBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StaticBody::Inline(bytes) => write!(f, "Inline({} bytes)", bytes.len()),
            StaticBody::Source { path, .. } => write!(f, "Source({path})"),
        }
    }
}

/// One servable representation of a static route.
#[derive(Debug, Clone)]
pub struct StaticVariant {
    pub encoding: Option<Encoding>,
    pub body: StaticBody,
    pub len: u64,
    pub etag: String,
}

impl StaticVariant {
    /// Describe `contents`, served later from `body`.
    pub fn new(encoding: Option<Encoding>, contents: &[u8], body: StaticBody) -> Self {
        Self {
            encoding,
            body,
            len: contents.len() as u64,
            etag: etag(contents),
        }
    }

    /// The variant's bytes. Blocking for source-backed variants.
    pub fn load(&self) -> io::Result<Bytes> {
        match &self.body {
            StaticBody::Inline(bytes) => Ok(bytes.clone()),
            StaticBody::Source { source, path } => source.read(path).map(Bytes::from),
        }
    }
}

/// A static file and its pre-compressed alternates.
#[derive(Debug, Clone)]
pub struct StaticRoute {
    pub path: String,
    pub content_type: &'static str,
    pub identity: StaticVariant,
    pub alternates: Vec<StaticVariant>,
}

impl StaticRoute {
    pub fn has_alternates(&self) -> bool {
        !self.alternates.is_empty()
    }

    /// The variant to serve for an `Accept-Encoding` header value.
    pub fn select(&self, accept_encoding: Option<&str>) -> &StaticVariant {
        let Some(header) = accept_encoding else {
            return &self.identity;
        };
        let accepted = parse_accept_encoding(header);
        self.alternates
            .iter()
            .filter(|variant| {
                variant
                    .encoding
                    .is_some_and(|encoding| accepts(&accepted, encoding))
            })
            .min_by_key(|variant| {
                (
                    variant.len,
                    variant.encoding.map_or(usize::MAX, Encoding::rank),
                )
            })
            .unwrap_or(&self.identity)
    }
}

/// `gzip, br;q=0.8, *;q=0` → `[("gzip", 1.0), ("br", 0.8), ("*", 0.0)]`.
pub fn parse_accept_encoding(header: &str) -> Vec<(String, f32)> {
    header
        .split(',')
        .filter_map(|item| {
            let mut parts = item.split(';');
            let token = parts.next()?.trim().to_ascii_lowercase();
            if token.is_empty() {
                return None;
            }
            let quality = parts
                .find_map(|param| {
                    let (key, value) = param.split_once('=')?;
                    if key.trim().eq_ignore_ascii_case("q") {
                        value.trim().parse::<f32>().ok()
                    } else {
                        None
                    }
                })
                .unwrap_or(1.0);
            Some((token, quality))
        })
        .collect()
}

fn accepts(accepted: &[(String, f32)], encoding: Encoding) -> bool {
    if let Some((_, quality)) = accepted.iter().find(|(token, _)| token == encoding.token()) {
        return *quality > 0.0;
    }
    accepted
        .iter()
        .any(|(token, quality)| token == "*" && *quality > 0.0)
}

/// Content type by extension of the logical path.
pub fn content_type_for(path: &str) -> &'static str {
    let extension = path
        .rsplit('/')
        .next()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" | "mjs" => "text/javascript; charset=utf-8",
        "json" => "application/json",
        "xml" => "application/xml",
        "txt" => "text/plain; charset=utf-8",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "wasm" => "application/wasm",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

/// Strong ETag over the served bytes.
pub fn etag(contents: &[u8]) -> String {
    let digest = format!("{:x}", Sha256::digest(contents));
    format!("\"{}\"", &digest[..32])
}

/// Whether an `If-None-Match` header value matches `etag`.
pub fn if_none_match(header: &str, etag: &str) -> bool {
    header.split(',').map(str::trim).any(|candidate| {
        candidate == "*" || candidate.strip_prefix("W/").unwrap_or(candidate) == etag
    })
}
