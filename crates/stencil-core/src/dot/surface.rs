//! # Response Surfaces
//!
//! The terminal field of every dot (`Resp` or `Flush`) is backed by a
//! [`ResponseSurface`] owned by the request handler. Templates reach it through
//! a numeric handle looked up in the instance's [`SurfaceRegistry`].

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc;

/// Chunks sent to a streaming response body.
pub(crate) type ChunkSender = mpsc::Sender<Result<Bytes, io::Error>>;

/// Pending streaming output is sent without an explicit flush past this size.
const STREAM_CHUNK_LIMIT: usize = 16 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum SurfaceError {
    #[error("response status and headers are only adjustable on a buffered response")]
    NotBuffered,

    #[error("invalid response header '{name}'")]
    InvalidHeader { name: String },

    #[error("client disconnected")]
    Disconnected,
}

/// Status, headers and body captured by a buffered execution.
#[derive(Debug)]
pub(crate) struct BufferedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    pub abort: Option<StatusCode>,
}

impl Default for BufferedResponse {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Vec::new(),
            abort: None,
        }
    }
}

#[derive(Debug)]
struct StreamingState {
    pending: Vec<u8>,
    sender: ChunkSender,
}

#[derive(Debug)]
enum SurfaceKind {
    Buffered(Mutex<BufferedResponse>),
    Streaming(Mutex<StreamingState>),
    Discard,
}

/// Where template output for one execution goes.
#[derive(Debug)]
pub struct ResponseSurface {
    kind: SurfaceKind,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ResponseSurface {
    /// Capture everything in memory until execution completes.
    pub fn buffered() -> Self {
        Self {
            kind: SurfaceKind::Buffered(Mutex::new(BufferedResponse::default())),
        }
    }

    /// Forward output to a response body as it is flushed.
    pub(crate) fn streaming(sender: ChunkSender) -> Self {
        Self {
            kind: SurfaceKind::Streaming(Mutex::new(StreamingState {
                pending: Vec::new(),
                sender,
            })),
        }
    }

    /// Drop all output. Used by initializers.
    pub fn discard() -> Self {
        Self {
            kind: SurfaceKind::Discard,
        }
    }

    pub fn writer(self: &Arc<Self>) -> SurfaceWriter {
        SurfaceWriter {
            surface: self.clone(),
        }
    }

    fn write_bytes(&self, buf: &[u8]) -> io::Result<()> {
        match &self.kind {
            SurfaceKind::Buffered(state) => lock(state).body.extend_from_slice(buf),
            SurfaceKind::Streaming(state) => {
                let mut state = lock(state);
                state.pending.extend_from_slice(buf);
                if state.pending.len() >= STREAM_CHUNK_LIMIT {
                    send_pending(&mut state)?;
                }
            }
            SurfaceKind::Discard => {}
        }
        Ok(())
    }

    /// Send everything written so far to the client. A no-op unless streaming.
    ///
    /// Blocks while the body channel is full, so it must run off the async
    /// runtime.
    pub fn flush_pending(&self) -> io::Result<()> {
        if let SurfaceKind::Streaming(state) = &self.kind {
            send_pending(&mut lock(state))?;
        }
        Ok(())
    }

    /// Terminate a streaming body with an error so the client sees a truncated
    /// response rather than a clean end.
    pub(crate) fn fail_stream(&self, message: String) {
        if let SurfaceKind::Streaming(state) = &self.kind {
            let state = lock(state);
            let _ = state.sender.blocking_send(Err(io::Error::other(message)));
        }
    }

    pub fn set_status(&self, status: StatusCode) -> Result<(), SurfaceError> {
        self.with_buffered(|response| response.status = status)
    }

    pub fn add_header(&self, name: &str, value: &str) -> Result<(), SurfaceError> {
        let (name, value) = parse_header(name, value)?;
        self.with_buffered(|response| {
            response.headers.append(name, value);
        })
    }

    pub fn set_header(&self, name: &str, value: &str) -> Result<(), SurfaceError> {
        let (name, value) = parse_header(name, value)?;
        self.with_buffered(|response| {
            response.headers.insert(name, value);
        })
    }

    /// Record that execution is being aborted in favour of `status`.
    pub fn abort_with(&self, status: StatusCode) -> Result<(), SurfaceError> {
        self.with_buffered(|response| response.abort = Some(status))
    }

    /// Take the captured response out of a buffered surface.
    pub(crate) fn take_buffered(&self) -> Option<BufferedResponse> {
        match &self.kind {
            SurfaceKind::Buffered(state) => Some(std::mem::take(&mut *lock(state))),
            _ => None,
        }
    }

    fn with_buffered(&self, f: impl FnOnce(&mut BufferedResponse)) -> Result<(), SurfaceError> {
        match &self.kind {
            SurfaceKind::Buffered(state) => {
                f(&mut lock(state));
                Ok(())
            }
            SurfaceKind::Discard => Ok(()),
            SurfaceKind::Streaming(_) => Err(SurfaceError::NotBuffered),
        }
    }
}

fn send_pending(state: &mut StreamingState) -> io::Result<()> {
    if state.pending.is_empty() {
        return Ok(());
    }
    let chunk = Bytes::from(std::mem::take(&mut state.pending));
    state
        .sender
        .blocking_send(Ok(chunk))
        .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, SurfaceError::Disconnected))
}

fn parse_header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue), SurfaceError> {
    let invalid = || SurfaceError::InvalidHeader {
        name: name.to_string(),
    };
    let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| invalid())?;
    let header_value = HeaderValue::from_str(value).map_err(|_| invalid())?;
    Ok((header_name, header_value))
}

/// `io::Write` adapter handed to `Tera::render_to`.
#[derive(Debug, Clone)]
pub struct SurfaceWriter {
    surface: Arc<ResponseSurface>,
}

impl io::Write for SurfaceWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.surface.write_bytes(buf)?;
        Ok(buf.len())
    }

    // Explicit flushes come from the `flush` filter; Tera's own flush is ignored.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Live surfaces of in-flight executions, keyed by template-visible handle.
#[derive(Debug, Default)]
pub struct SurfaceRegistry {
    surfaces: DashMap<u64, Arc<ResponseSurface>>,
    next: AtomicU64,
}

impl SurfaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, surface: Arc<ResponseSurface>) -> u64 {
        let handle = self.next.fetch_add(1, Ordering::Relaxed) + 1;
        self.surfaces.insert(handle, surface);
        handle
    }

    pub fn get(&self, handle: u64) -> Option<Arc<ResponseSurface>> {
        self.surfaces
            .get(&handle)
            .map(|entry| entry.value().clone())
    }

    pub fn remove(&self, handle: u64) {
        self.surfaces.remove(&handle);
    }

    pub fn len(&self) -> usize {
        self.surfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.surfaces.is_empty()
    }
}
