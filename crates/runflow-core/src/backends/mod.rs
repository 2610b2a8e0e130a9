//! Token-producing backend implementations.

pub mod mock;
pub mod process;
pub mod protocol;
pub mod shared;

use std::future::Future;
use std::pin::Pin;

use runflow_types::run::RunSettings;

pub use mock::MockBackend;
pub use process::{ProcessBackend, ProcessConfig};
pub use shared::{BackendEvent, BackendStream, RunError, RunErrorKind, RunResult, Usage};

/// Boxed future returned by [`Backend`] methods.
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = RunResult<T>> + Send + 'a>>;

/// Chat request handed to a backend for one run.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub run_id: String,
    pub model: String,
    /// Resolved prompt text.
    pub input: String,
    pub settings: RunSettings,
}

/// Capability interface over token-producing backends.
///
/// Dropping the stream returned by `stream_chat` releases the
/// underlying producer. Ordering rules for the yielded events are
/// enforced by the executor, not here.
pub trait Backend: Send + Sync {
    /// Verifies the backend is usable before any streaming starts.
    fn check_auth(&self) -> BackendFuture<'_, ()>;

    /// Opens the wire event stream for one run.
    fn stream_chat(&self, request: ChatRequest) -> BackendFuture<'_, BackendStream>;

    /// Embedding vector for a text. Part of the capability surface even
    /// though the executor never calls it.
    fn embeddings(&self, text: String) -> BackendFuture<'_, Vec<f32>>;
}

/// Backend selection for glue layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Mock,
    Process,
}

impl BackendKind {
    /// Returns all backend kinds.
    pub fn all() -> &'static [BackendKind] {
        &[BackendKind::Mock, BackendKind::Process]
    }

    /// Stable identifier used in config files and CLI flags.
    pub fn id(self) -> &'static str {
        match self {
            BackendKind::Mock => "mock",
            BackendKind::Process => "process",
        }
    }

    /// Parses a backend id.
    pub fn from_id(id: &str) -> Option<Self> {
        match id {
            "mock" => Some(BackendKind::Mock),
            "process" => Some(BackendKind::Process),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_ids_roundtrip() {
        for kind in BackendKind::all() {
            assert_eq!(BackendKind::from_id(kind.id()), Some(*kind));
        }
        assert_eq!(BackendKind::from_id("unknown"), None);
    }
}
