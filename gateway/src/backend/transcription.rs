//! HTTP transcription client
//!
//! Talks to the speech-to-text service. Audio is shipped base64-encoded in
//! a JSON body together with a container format hint; the service answers
//! with the transcribed text and, when it can tell, the detected language.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::{BackendError, BackendResult, TranscribeRequest, Transcript, TranscriptionBackend};

pub struct HttpTranscription {
    base_url: String,
    client: Client,
}

impl HttpTranscription {
    /// Create a new transcription client
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: Client::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TranscribeResponse {
    text: String,
    #[serde(default)]
    language: Option<String>,
}

#[async_trait]
impl TranscriptionBackend for HttpTranscription {
    fn name(&self) -> &str {
        "transcription"
    }

    async fn call(
        &self,
        request: TranscribeRequest,
        deadline: Duration,
    ) -> BackendResult<Transcript> {
        let url = format!("{}/transcribe", self.base_url);

        tracing::debug!(
            "Transcription request: {} bytes of {} audio",
            request.audio.len(),
            request.format
        );

        let payload = json!({
            "audio": BASE64.encode(&request.audio),
            "format": request.format.to_string(),
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

        let parsed: TranscribeResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Fatal(format!("malformed transcription response: {}", e)))?;

        Ok(Transcript {
            text: parsed.text,
            language: parsed.language,
        })
    }
}
