//! Deterministic mock backend.
//!
//! Emits five fixed tokens at a fixed cadence, then a final record. Useful
//! for exercising the full run pipeline without an external process. The
//! stream is lazy: dropping it between emissions stops further output.

use std::time::Duration;

use futures_util::StreamExt;
use futures_util::stream;
use serde_json::Map;
use tokio::time::sleep;

use crate::backends::shared::{BackendEvent, BackendStream};
use crate::backends::{Backend, BackendFuture, ChatRequest};

/// Number of incremental tokens before the final record.
pub const MOCK_TOKEN_COUNT: u64 = 5;

/// Content of the mock final record.
pub const MOCK_FINAL_CONTENT: &str = "This is the final content.";

/// Pause between consecutive emissions.
const DEFAULT_CADENCE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct MockBackend {
    cadence: Duration,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            cadence: DEFAULT_CADENCE,
        }
    }

    /// Overrides the emission cadence (tests use a short one).
    #[must_use]
    pub fn with_cadence(mut self, cadence: Duration) -> Self {
        self.cadence = cadence;
        self
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for MockBackend {
    fn check_auth(&self) -> BackendFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    fn stream_chat(&self, _request: ChatRequest) -> BackendFuture<'_, BackendStream> {
        let cadence = self.cadence;
        Box::pin(async move {
            let stream = stream::unfold(0u64, move |idx| async move {
                if idx > MOCK_TOKEN_COUNT {
                    return None;
                }
                // First token is immediate; every later emission waits one
                // cadence, so dropping the stream mid-wait cancels cleanly.
                if idx > 0 {
                    sleep(cadence).await;
                }
                let event = if idx == MOCK_TOKEN_COUNT {
                    BackendEvent::Final {
                        content: MOCK_FINAL_CONTENT.to_string(),
                        metrics: Map::new(),
                    }
                } else {
                    BackendEvent::Token {
                        data: format!("token-{idx} "),
                        chunk_index: idx,
                        is_final: false,
                    }
                };
                Some((Ok(event), idx + 1))
            });
            Ok(stream.boxed())
        })
    }

    fn embeddings(&self, _text: String) -> BackendFuture<'_, Vec<f32>> {
        Box::pin(async { Ok(vec![0.1, 0.2, 0.3]) })
    }
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;
    use runflow_types::run::RunSettings;

    use super::*;

    fn request() -> ChatRequest {
        ChatRequest {
            run_id: "run-mock".to_string(),
            model: "mock-model".to_string(),
            input: "hello".to_string(),
            settings: RunSettings::default(),
        }
    }

    /// Verifies the fixed emission sequence: five tokens then one final.
    #[tokio::test]
    async fn test_emits_five_tokens_then_final() {
        let backend = MockBackend::new().with_cadence(Duration::from_millis(1));
        let mut stream = backend.stream_chat(request()).await.unwrap();

        let mut events = Vec::new();
        while let Some(result) = stream.next().await {
            events.push(result.unwrap());
        }

        assert_eq!(events.len(), 6);
        for (i, event) in events.iter().take(5).enumerate() {
            assert_eq!(
                *event,
                BackendEvent::Token {
                    data: format!("token-{i} "),
                    chunk_index: i as u64,
                    is_final: false,
                }
            );
        }
        assert!(matches!(
            &events[5],
            BackendEvent::Final { content, .. } if content == MOCK_FINAL_CONTENT
        ));
    }

    #[tokio::test]
    async fn test_check_auth_always_succeeds() {
        let backend = MockBackend::new();
        backend.check_auth().await.unwrap();
    }

    #[tokio::test]
    async fn test_embeddings_are_fixed() {
        let backend = MockBackend::new();
        let vector = backend.embeddings("anything".to_string()).await.unwrap();
        assert_eq!(vector, vec![0.1, 0.2, 0.3]);
    }
}
