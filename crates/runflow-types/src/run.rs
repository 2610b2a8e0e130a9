//! Run records and typed generation settings.
//!
//! A [`Run`] is the unit of work the executor drives to a terminal status.
//! Records are serializable for file persistence and JSON output mode.

use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Lifecycle status of a run.
///
/// Transitions are monotonic: `Pending -> Running -> {Completed, Failed,
/// Cancelled}`. A terminal status never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Created but not yet handed to the executor.
    Pending,
    /// Executor is streaming tokens for this run.
    Running,
    /// Stream finished with a final event.
    Completed,
    /// Run ended with an error; the record carries a description.
    Failed,
    /// Run was cancelled before completion.
    Cancelled,
}

impl RunStatus {
    /// Returns true once the run can never change status again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }

    /// Stable lowercase identifier used in logs and listings.
    pub fn label(self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Inclusive temperature range accepted by [`RunSettings::new`].
pub const TEMPERATURE_RANGE: std::ops::RangeInclusive<f64> = 0.0..=2.0;

/// Upper bound on `max_tokens` accepted by [`RunSettings::new`].
pub const MAX_TOKENS_LIMIT: u32 = 65_536;

/// Typed generation settings attached to a run.
///
/// Construct via [`RunSettings::new`] so out-of-range values are rejected
/// before a run record exists, instead of surfacing mid-stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSettings {
    /// Sampling temperature.
    pub temperature: f64,
    /// Maximum number of tokens the backend may generate.
    pub max_tokens: u32,
}

impl RunSettings {
    /// Validates and builds settings.
    ///
    /// # Errors
    /// Returns a human-readable message when a value is out of range.
    pub fn new(temperature: f64, max_tokens: u32) -> Result<Self, String> {
        if !temperature.is_finite() || !TEMPERATURE_RANGE.contains(&temperature) {
            return Err(format!(
                "temperature {temperature} out of range ({:?} to {:?})",
                TEMPERATURE_RANGE.start(),
                TEMPERATURE_RANGE.end()
            ));
        }
        if max_tokens == 0 || max_tokens > MAX_TOKENS_LIMIT {
            return Err(format!(
                "max_tokens {max_tokens} out of range (1 to {MAX_TOKENS_LIMIT})"
            ));
        }
        Ok(Self {
            temperature,
            max_tokens,
        })
    }
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            temperature: 1.0,
            max_tokens: 1024,
        }
    }
}

/// A persisted run record.
///
/// Timestamps are RFC 3339 strings so records stay stable across tooling.
/// `transcript` accumulates streamed token text; `final_content` is set only
/// when the run completes, and `error` only when it fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    /// Reference to the prompt this run was created from.
    pub prompt_id: String,
    pub model: String,
    pub settings: RunSettings,
    pub status: RunStatus,
    /// Free-form annotations attached by the caller.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    /// Short-lived token minted per run for stream access checks.
    pub ephemeral_token: String,
    pub created_at: String,
    /// Concatenated token text streamed so far.
    #[serde(default)]
    pub transcript: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
}

impl Run {
    /// Creates a pending run with fresh id and ephemeral token.
    pub fn new(
        prompt_id: impl Into<String>,
        model: impl Into<String>,
        settings: RunSettings,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            prompt_id: prompt_id.into(),
            model: model.into(),
            settings,
            status: RunStatus::Pending,
            metadata: Map::new(),
            ephemeral_token: Uuid::new_v4().to_string(),
            created_at: Utc::now().to_rfc3339(),
            transcript: String::new(),
            final_content: None,
            error: None,
            finished_at: None,
        }
    }

    /// Returns true once the run reached a terminal status.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_accepts_in_range_values() {
        let settings = RunSettings::new(0.7, 2048).unwrap();
        assert!((settings.temperature - 0.7).abs() < f64::EPSILON);
        assert_eq!(settings.max_tokens, 2048);
    }

    #[test]
    fn test_settings_accepts_range_endpoints() {
        assert!(RunSettings::new(0.0, 1).is_ok());
        assert!(RunSettings::new(2.0, MAX_TOKENS_LIMIT).is_ok());
    }

    #[test]
    fn test_settings_rejects_out_of_range_temperature() {
        let err = RunSettings::new(2.5, 1024).unwrap_err();
        assert!(err.contains("temperature"));

        assert!(RunSettings::new(-0.1, 1024).is_err());
        assert!(RunSettings::new(f64::NAN, 1024).is_err());
    }

    #[test]
    fn test_settings_rejects_bad_max_tokens() {
        let err = RunSettings::new(1.0, 0).unwrap_err();
        assert!(err.contains("max_tokens"));

        assert!(RunSettings::new(1.0, MAX_TOKENS_LIMIT + 1).is_err());
    }

    #[test]
    fn test_new_run_is_pending_with_fresh_identifiers() {
        let a = Run::new("prompt-1", "mock-model", RunSettings::default());
        let b = Run::new("prompt-1", "mock-model", RunSettings::default());

        assert_eq!(a.status, RunStatus::Pending);
        assert!(!a.is_terminal());
        assert_ne!(a.id, b.id);
        assert_ne!(a.ephemeral_token, b.ephemeral_token);
        assert!(a.transcript.is_empty());
        assert!(a.final_content.is_none());
        assert!(a.error.is_none());
    }

    #[test]
    fn test_status_terminal_matrix() {
        assert!(!RunStatus::Pending.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_run_record_roundtrip() {
        let mut run = Run::new("prompt-9", "mock-model", RunSettings::default());
        run.status = RunStatus::Completed;
        run.transcript = "token-0 token-1 ".to_string();
        run.final_content = Some("This is the final content.".to_string());

        let json = serde_json::to_string(&run).unwrap();
        let parsed: Run = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, run);

        // Unset optional fields stay out of the serialized record.
        assert!(!json.contains("\"error\""));
        assert!(!json.contains("\"finished_at\""));
        assert!(!json.contains("\"metadata\""));
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&RunStatus::Cancelled).unwrap();
        assert_eq!(json, "\"cancelled\"");
        assert_eq!(RunStatus::Failed.to_string(), "failed");
    }
}
