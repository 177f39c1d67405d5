//! HTTP synthesis client
//!
//! Talks to the text-to-speech service. The request is JSON; the response
//! body is the raw audio (audio/mpeg), returned to the caller untouched.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;

use super::{BackendError, BackendResult, SynthesisBackend, SynthesisRequest};

pub struct HttpSynthesis {
    base_url: String,
    client: Client,
}

impl HttpSynthesis {
    /// Create a new synthesis client
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: Client::new(),
        }
    }
}

#[async_trait]
impl SynthesisBackend for HttpSynthesis {
    fn name(&self) -> &str {
        "synthesis"
    }

    async fn call(&self, request: SynthesisRequest, deadline: Duration) -> BackendResult<Vec<u8>> {
        let url = format!("{}/synthesize", self.base_url);

        tracing::debug!("Synthesis request: {} chars", request.text.len());

        let mut payload = json!({ "text": request.text });
        if let Some(voice_id) = &request.voice_id {
            payload["voice_id"] = json!(voice_id);
        }

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

        let audio = response
            .bytes()
            .await
            .map_err(BackendError::from_reqwest)?
            .to_vec();

        if audio.is_empty() {
            return Err(BackendError::Fatal(
                "synthesis backend returned empty audio".to_string(),
            ));
        }

        Ok(audio)
    }
}
