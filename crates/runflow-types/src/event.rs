//! Stream event types and their wire encoding.
//!
//! Subscribers receive [`RunEvent`]s in emission order. For transports the
//! events encode as [`StreamFrame`]s, one JSON object per frame:
//! - Token: `{"type": "token", "data": "...", "chunk_index": n, "is_final": false}`
//! - Final: `{"type": "final", "data": "...", "chunk_index": n, "is_final": true}`
//! - Error: `{"type": "error", "message": "..."}`

use serde::{Deserialize, Serialize};

/// One unit of streamed output within a run.
///
/// `chunk_index` is strictly increasing from 0 within a run. Exactly one
/// event per run carries `is_final = true` and it is always the last one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenEvent {
    pub run_id: String,
    pub chunk_index: u64,
    pub data: String,
    pub is_final: bool,
}

/// Event delivered to subscribers of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    /// Incremental or final token output.
    Token(TokenEvent),
    /// The run failed; this is the last event for the run.
    Error { run_id: String, message: String },
}

impl RunEvent {
    /// Run this event belongs to.
    pub fn run_id(&self) -> &str {
        match self {
            RunEvent::Token(event) => &event.run_id,
            RunEvent::Error { run_id, .. } => run_id,
        }
    }

    /// Returns true when no further events follow for the run.
    pub fn is_terminal(&self) -> bool {
        match self {
            RunEvent::Token(event) => event.is_final,
            RunEvent::Error { .. } => true,
        }
    }

    /// Wire frame for this event (run id is implied by the stream).
    pub fn frame(&self) -> StreamFrame {
        match self {
            RunEvent::Token(event) => StreamFrame::Token {
                data: event.data.clone(),
                chunk_index: event.chunk_index,
                is_final: event.is_final,
            },
            RunEvent::Error { message, .. } => StreamFrame::Error {
                message: message.clone(),
            },
        }
    }
}

/// Wire frame for the streaming transport.
///
/// Token frames split into `"token"` and `"final"` discriminators on the
/// wire based on `is_final`; both decode back to [`StreamFrame::Token`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFrame {
    Token {
        data: String,
        chunk_index: u64,
        is_final: bool,
    },
    Error {
        message: String,
    },
}

impl Serialize for StreamFrame {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;

        match self {
            StreamFrame::Token {
                data,
                chunk_index,
                is_final,
            } => {
                let kind = if *is_final { "final" } else { "token" };
                let mut state = serializer.serialize_struct("StreamFrame", 4)?;
                state.serialize_field("type", kind)?;
                state.serialize_field("data", data)?;
                state.serialize_field("chunk_index", chunk_index)?;
                state.serialize_field("is_final", is_final)?;
                state.end()
            }
            StreamFrame::Error { message } => {
                let mut state = serializer.serialize_struct("StreamFrame", 2)?;
                state.serialize_field("type", "error")?;
                state.serialize_field("message", message)?;
                state.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for StreamFrame {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct RawFrame {
            #[serde(rename = "type")]
            kind: String,
            #[serde(default)]
            data: Option<String>,
            #[serde(default)]
            chunk_index: Option<u64>,
            #[serde(default)]
            is_final: Option<bool>,
            #[serde(default)]
            message: Option<String>,
        }

        let raw = RawFrame::deserialize(deserializer)?;
        match raw.kind.as_str() {
            "token" => Ok(StreamFrame::Token {
                data: raw.data.unwrap_or_default(),
                chunk_index: raw.chunk_index.unwrap_or_default(),
                is_final: raw.is_final.unwrap_or(false),
            }),
            // The discriminator wins over a conflicting is_final field.
            "final" => Ok(StreamFrame::Token {
                data: raw.data.unwrap_or_default(),
                chunk_index: raw.chunk_index.unwrap_or_default(),
                is_final: true,
            }),
            "error" => Ok(StreamFrame::Error {
                message: raw
                    .message
                    .unwrap_or_else(|| "unknown error".to_string()),
            }),
            other => Err(serde::de::Error::custom(format!(
                "unknown frame type: {other}"
            ))),
        }
    }
}

impl StreamFrame {
    /// Serializes the frame to one JSON line for the transport.
    pub fn to_json_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"type":"error","message":"failed to serialize frame"}"#.to_string()
        })
    }
}
