//! Shared backend types: wire events, errors, stream aliases.

use std::fmt;

use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Boxed stream of wire events for one run.
pub type BackendStream = BoxStream<'static, RunResult<BackendEvent>>;

/// Result alias for backend and executor operations.
pub type RunResult<T> = std::result::Result<T, RunError>;

/// Wire-level record produced by a backend for one run.
///
/// This is the newline-delimited JSON union process backends emit on
/// stdout, one object per line. `Meta` and `Progress` are informational;
/// the executor forwards only `Token` and `Final` to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendEvent {
    /// Stream preamble identifying the serving model.
    Meta {
        model: String,
        #[serde(default)]
        usage: Usage,
    },

    /// Incremental token output.
    Token {
        data: String,
        chunk_index: u64,
        #[serde(default)]
        is_final: bool,
    },

    /// Coarse progress indication, in percent.
    Progress { percent: u32 },

    /// Terminal record carrying the complete final content.
    Final {
        content: String,
        #[serde(default)]
        metrics: Map<String, Value>,
    },

    /// Backend-reported failure; terminates the run.
    Error { message: String },
}

/// Token usage reported in a backend meta record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub tokens: u64,
}

/// Error categories for run failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunErrorKind {
    /// Backend rejected the authentication probe.
    Auth,
    /// Malformed or out-of-order backend event.
    ProtocolViolation,
    /// Backend process could not be spawned.
    BackendUnavailable,
    /// No backend output within the read deadline.
    Timeout,
    /// Run was cancelled; not a failure from the caller's perspective.
    Cancelled,
    /// Well-formed error record reported by the backend stream.
    Backend,
}

impl RunErrorKind {
    /// Spawn failures are the only transient category worth retrying.
    pub fn is_retryable(self) -> bool {
        matches!(self, RunErrorKind::BackendUnavailable)
    }
}

impl fmt::Display for RunErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunErrorKind::Auth => write!(f, "auth"),
            RunErrorKind::ProtocolViolation => write!(f, "protocol_violation"),
            RunErrorKind::BackendUnavailable => write!(f, "backend_unavailable"),
            RunErrorKind::Timeout => write!(f, "timeout"),
            RunErrorKind::Cancelled => write!(f, "cancelled"),
            RunErrorKind::Backend => write!(f, "backend"),
        }
    }
}

/// Structured error for run failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunError {
    pub kind: RunErrorKind,
    /// One-line summary.
    pub message: String,
    /// Optional extra context, e.g. the offending protocol line.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl RunError {
    pub fn new(kind: RunErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(
        kind: RunErrorKind,
        message: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            details: Some(details.into()),
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(RunErrorKind::Auth, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(RunErrorKind::ProtocolViolation, message)
    }

    /// Protocol violation caused by a specific wire line. The line is
    /// truncated into `details` so failure records stay bounded.
    pub fn protocol_for_line(message: impl Into<String>, line: &str) -> Self {
        Self::with_details(
            RunErrorKind::ProtocolViolation,
            message,
            truncate_for_error(line, MAX_LINE_EXCERPT_LEN),
        )
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(RunErrorKind::BackendUnavailable, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(RunErrorKind::Timeout, message)
    }

    pub fn cancelled() -> Self {
        Self::new(RunErrorKind::Cancelled, "run cancelled")
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::new(RunErrorKind::Backend, message)
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == RunErrorKind::Cancelled
    }

    /// Full description for persistence: message plus details when present.
    pub fn describe(&self) -> String {
        match &self.details {
            Some(details) => format!("{}: {}", self.message, details),
            None => self.message.clone(),
        }
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for RunError {}

/// Cap applied to wire-line excerpts embedded in error details.
const MAX_LINE_EXCERPT_LEN: usize = 500;

/// Truncates a string for error reporting, keeping valid UTF-8.
pub(crate) fn truncate_for_error(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated, {} total bytes)", &s[..end], s.len())
}
