//! Backend client abstraction layer
//!
//! This module provides the typed contracts for the four external services
//! the gateway orchestrates: transcription (speech-to-text), retrieval
//! (vector search), generation (language model) and synthesis
//! (text-to-speech). Each contract is a single-capability trait, so any
//! backend can be substituted or mocked without touching the orchestrator.
//!
//! Every call carries a deadline and fails with either a `Transient` error
//! (timeout, connection refused, 5xx; eligible for retry) or a `Fatal`
//! error (malformed request, backend-side auth rejection; never retried).

use async_trait::async_trait;
use sdk::types::{AudioFormat, RetrievedPassage, Turn};
use std::time::Duration;

pub mod generation;
pub mod retrieval;
pub mod synthesis;
pub mod transcription;

pub use generation::HttpGeneration;
pub use retrieval::HttpRetrieval;
pub use synthesis::HttpSynthesis;
pub use transcription::HttpTranscription;

/// Result type for backend calls
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Errors produced by backend calls
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Retry-eligible failure: timeout, unreachable backend, 5xx
    #[error("transient backend failure: {0}")]
    Transient(String),

    /// Permanent failure: malformed request, backend rejected the call
    #[error("fatal backend failure: {0}")]
    Fatal(String),
}

impl BackendError {
    /// Whether this failure is eligible for retry
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Transient(_))
    }

    /// Map a reqwest error to the transient/fatal taxonomy
    ///
    /// Timeouts and connection failures are transient; everything else
    /// that reqwest reports client-side (bad URL, decode failure) is fatal.
    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BackendError::Transient("deadline exceeded".to_string())
        } else if err.is_connect() {
            BackendError::Transient(format!("connection failed: {}", err))
        } else if err.is_decode() {
            BackendError::Fatal(format!("malformed response: {}", err))
        } else {
            BackendError::Transient(err.to_string())
        }
    }

    /// Classify a non-success HTTP status
    ///
    /// 5xx and 429 are transient; other 4xx mean the request itself is
    /// wrong and will not improve with retry.
    pub(crate) fn from_status(status: reqwest::StatusCode, body: String) -> Self {
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            BackendError::Transient(format!("backend error ({}): {}", status, body))
        } else {
            BackendError::Fatal(format!("backend rejected request ({}): {}", status, body))
        }
    }
}

/// Request to the transcription backend
#[derive(Debug, Clone)]
pub struct TranscribeRequest {
    /// Raw audio bytes
    pub audio: Vec<u8>,

    /// Container format hint
    pub format: AudioFormat,
}

/// Transcription result
#[derive(Debug, Clone)]
pub struct Transcript {
    /// Transcribed text
    pub text: String,

    /// Detected language, if the backend reports one
    pub language: Option<String>,
}

/// Request to the retrieval backend
#[derive(Debug, Clone)]
pub struct RetrievalRequest {
    /// Search query assembled from the new input and recent history
    pub query: String,

    /// Number of passages requested
    pub top_k: usize,
}

/// Request to the generation backend
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Ordered conversation turns, oldest first, ending with the new user turn
    pub turns: Vec<Turn>,

    /// Grounding passages, in rank order; may be empty
    pub passages: Vec<RetrievedPassage>,
}

/// Request to the synthesis backend
#[derive(Debug, Clone)]
pub struct SynthesisRequest {
    /// Text to speak
    pub text: String,

    /// Optional voice identifier
    pub voice_id: Option<String>,
}

/// Speech-to-text capability
#[async_trait]
pub trait TranscriptionBackend: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &str;

    /// Transcribe audio within the given deadline
    async fn call(&self, request: TranscribeRequest, deadline: Duration)
        -> BackendResult<Transcript>;
}

/// Vector search capability
#[async_trait]
pub trait RetrievalBackend: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &str;

    /// Retrieve ranked passages within the given deadline
    async fn call(
        &self,
        request: RetrievalRequest,
        deadline: Duration,
    ) -> BackendResult<Vec<RetrievedPassage>>;
}

/// Language generation capability
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &str;

    /// Generate an answer within the given deadline
    async fn call(&self, request: GenerationRequest, deadline: Duration) -> BackendResult<String>;
}

/// Speech synthesis capability
#[async_trait]
pub trait SynthesisBackend: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &str;

    /// Synthesize speech within the given deadline
    async fn call(&self, request: SynthesisRequest, deadline: Duration) -> BackendResult<Vec<u8>>;
}

/// Order passages by score descending, ties broken by earliest chunk id
///
/// Retrieval backends are expected to return ranked results already; this
/// makes the ordering authoritative on our side of the wire.
pub fn rank_passages(mut passages: Vec<RetrievedPassage>) -> Vec<RetrievedPassage> {
    passages.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    passages
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passage(document_id: &str, chunk_id: u32, score: f32) -> RetrievedPassage {
        RetrievedPassage {
            document_id: document_id.to_string(),
            chunk_id,
            text: String::new(),
            score,
        }
    }

    #[test]
    fn test_rank_passages_by_score() {
        let ranked = rank_passages(vec![
            passage("a", 1, 0.3),
            passage("b", 2, 0.9),
            passage("c", 3, 0.5),
        ]);

        let scores: Vec<f32> = ranked.iter().map(|p| p.score).collect();
        assert_eq!(scores, vec![0.9, 0.5, 0.3]);
    }

    #[test]
    fn test_rank_passages_tie_breaks_on_chunk_id() {
        let ranked = rank_passages(vec![
            passage("a", 7, 0.8),
            passage("a", 2, 0.8),
            passage("a", 4, 0.8),
        ]);

        let chunks: Vec<u32> = ranked.iter().map(|p| p.chunk_id).collect();
        assert_eq!(chunks, vec![2, 4, 7]);
    }

    #[test]
    fn test_transient_classification() {
        assert!(BackendError::Transient("timeout".to_string()).is_transient());
        assert!(!BackendError::Fatal("bad request".to_string()).is_transient());
    }

    #[test]
    fn test_status_classification() {
        let server_error =
            BackendError::from_status(reqwest::StatusCode::BAD_GATEWAY, String::new());
        assert!(server_error.is_transient());

        let throttled =
            BackendError::from_status(reqwest::StatusCode::TOO_MANY_REQUESTS, String::new());
        assert!(throttled.is_transient());

        let rejected = BackendError::from_status(reqwest::StatusCode::BAD_REQUEST, String::new());
        assert!(!rejected.is_transient());
    }
}
