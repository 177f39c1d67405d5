//! HTTP generation client
//!
//! Talks to the language generation service. The conversation goes over
//! the wire as an ordered role/content list followed by the grounding
//! passages; the service answers with plain generated text. Streaming to
//! the end caller, if any, is a transport concern and not handled here.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::{BackendError, BackendResult, GenerationBackend, GenerationRequest};

pub struct HttpGeneration {
    base_url: String,
    client: Client,
}

impl HttpGeneration {
    /// Create a new generation client
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: Client::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    text: String,
}

#[async_trait]
impl GenerationBackend for HttpGeneration {
    fn name(&self) -> &str {
        "generation"
    }

    async fn call(&self, request: GenerationRequest, deadline: Duration) -> BackendResult<String> {
        let url = format!("{}/generate", self.base_url);

        let turns: Vec<_> = request
            .turns
            .iter()
            .map(|turn| {
                json!({
                    "role": turn.role.to_string(),
                    "content": turn.content,
                })
            })
            .collect();

        let passages: Vec<_> = request
            .passages
            .iter()
            .map(|p| {
                json!({
                    "document_id": p.document_id,
                    "chunk_id": p.chunk_id,
                    "text": p.text,
                })
            })
            .collect();

        tracing::debug!(
            "Generation request: turns={}, passages={}",
            turns.len(),
            passages.len()
        );

        let payload = json!({
            "turns": turns,
            "passages": passages,
        });

        let response = self
            .client
            .post(&url)
            .timeout(deadline)
            .json(&payload)
            .send()
            .await
            .map_err(BackendError::from_reqwest)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::from_status(status, body));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Fatal(format!("malformed generation response: {}", e)))?;

        Ok(parsed.text)
    }
}
