//! # Minification
//!
//! A [`Minifier`] rewrites text output keyed by content type. When minification
//! is enabled, buffered template output and static text assets go through it;
//! streamed output never does.

use std::fmt::Debug;

use crate::error::BoxError;

/// Content-type keyed output transformer.
pub trait Minifier: Debug + Send + Sync {
    /// Minify `input` of the given media type (no parameters, lowercase).
    fn minify(&self, media_type: &str, input: &[u8]) -> Result<Vec<u8>, BoxError>;
}

/// Whether `content_type` is one of the text types minification applies to.
pub fn is_minifiable(content_type: &str) -> bool {
    matches!(
        media_type(content_type).as_str(),
        "text/html" | "text/css" | "text/javascript" | "application/javascript" | "image/svg+xml"
    )
}

/// `text/html; charset=utf-8` → `text/html`.
pub(crate) fn media_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Line-oriented minifier: trims each line and drops blank ones; CSS also loses
/// `/* */` comments. HTML containing `<pre` or `<textarea` is returned as is,
/// since whitespace there is significant.
#[derive(Debug, Default, Clone, Copy)]
pub struct BasicMinifier;

impl Minifier for BasicMinifier {
    fn minify(&self, media_type: &str, input: &[u8]) -> Result<Vec<u8>, BoxError> {
        let text = std::str::from_utf8(input)?;

        if media_type == "text/html" {
            let lower = text.to_ascii_lowercase();
            if lower.contains("<pre") || lower.contains("<textarea") {
                return Ok(input.to_vec());
            }
        }

        let text = if media_type == "text/css" {
            strip_block_comments(text)
        } else {
            text.to_string()
        };

        let lines: Vec<&str> = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect();
        Ok(lines.join("\n").into_bytes())
    }
}

fn strip_block_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("/*") {
        out.push_str(&rest[..start]);
        match rest[start + 2..].find("*/") {
            Some(end) => rest = &rest[start + 2 + end + 2..],
            None => {
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);
    out
}
