//! Sources of backend deltas.
//!
//! The pipeline is generic over [`ChatBackend`] so the HTTP backend and the
//! in-process scripted one are interchangeable.

mod llama_server;

pub use llama_server::LlamaServerBackend;

use std::future::Future;

use parking_lot::Mutex;

use crate::error::DialectifyError;
use crate::protocol::canonical::CanonicalRequest;
use crate::stream::{DeltaStream, RawDelta};

/// Opens one backend response stream per request.
pub trait ChatBackend: Send + Sync {
    /// Start generation for `request`.
    ///
    /// # Errors
    ///
    /// Fails when the stream cannot be opened at all (connection refused,
    /// non-success status). Failures after this point arrive as stream items.
    fn open(
        &self,
        request: &CanonicalRequest,
    ) -> impl Future<Output = Result<DeltaStream, DialectifyError>> + Send;
}

/// In-process backend replaying a fixed list of deltas.
///
/// Each call to [`ChatBackend::open`] replays the same script.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    deltas: Vec<RawDelta>,
    /// Yielded after all deltas, in place of a clean end of stream.
    trailing_error: Option<String>,
    start_error: Option<String>,
    last_request: Mutex<Option<CanonicalRequest>>,
}

impl ScriptedBackend {
    #[must_use]
    pub fn new(deltas: Vec<RawDelta>) -> Self {
        Self {
            deltas,
            ..Self::default()
        }
    }

    /// Text-only script.
    #[must_use]
    pub fn from_text<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(chunks.into_iter().map(RawDelta::text).collect())
    }

    /// End the stream with a transport error after the scripted deltas.
    #[must_use]
    pub fn interrupted_with(mut self, message: impl Into<String>) -> Self {
        self.trailing_error = Some(message.into());
        self
    }

    /// Fail before any delta is produced.
    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            start_error: Some(message.into()),
            ..Self::default()
        }
    }

    /// The request most recently passed to `open`.
    #[must_use]
    pub fn last_request(&self) -> Option<CanonicalRequest> {
        self.last_request.lock().clone()
    }
}

impl ChatBackend for ScriptedBackend {
    fn open(
        &self,
        request: &CanonicalRequest,
    ) -> impl Future<Output = Result<DeltaStream, DialectifyError>> + Send {
        *self.last_request.lock() = Some(request.clone());
        let start_error = self.start_error.clone();
        let mut items: Vec<Result<RawDelta, DialectifyError>> =
            self.deltas.iter().cloned().map(Ok).collect();
        if let Some(message) = &self.trailing_error {
            items.push(Err(DialectifyError::Transport(message.clone())));
        }
        async move {
            if let Some(message) = start_error {
                return Err(DialectifyError::Transport(message));
            }
            let stream: DeltaStream = Box::pin(futures_util::stream::iter(items));
            Ok(stream)
        }
    }
}
