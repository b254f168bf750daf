//! # Stencil
//!
//! Compile a directory of Tera templates and static assets into an immutable,
//! hot-swappable HTTP handler.
//!
//! This crate re-exports [`stencil_core`]; the standalone server lives in the
//! `stencil-server` binary.

pub use stencil_core::*;
