//! Core conversation data model
//!
//! These types travel between the session store, the turn orchestrator and
//! the backend clients. A `Turn` is one user or assistant contribution to a
//! conversation; a `RetrievedPassage` is a document excerpt used to ground
//! an assistant turn. Turns are immutable once appended to a session's
//! history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Role of a conversation turn
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// User contribution (typed or transcribed)
    User,

    /// Assistant contribution
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// One contribution to a conversation
///
/// `sources` is always empty for user turns; for assistant turns it lists
/// the passages the answer was grounded on, in rank order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Turn {
    /// Who produced this turn
    pub role: Role,

    /// Turn text (transcribed if the original input was audio)
    pub content: String,

    /// Grounding passages behind an assistant turn
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<SourceRef>,

    /// When the turn was finalized
    pub created_at: DateTime<Utc>,
}

impl Turn {
    /// Create a new user turn
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            sources: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Create a new assistant turn grounded on the given sources
    pub fn assistant(content: impl Into<String>, sources: Vec<SourceRef>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            sources,
            created_at: Utc::now(),
        }
    }
}

/// Stable reference to a retrieved passage
///
/// Only the reference is persisted inside a turn; the passage text itself
/// lives no longer than the turn that used it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceRef {
    /// Document the passage came from
    pub document_id: String,

    /// Chunk index within the document
    pub chunk_id: u32,
}

/// A document excerpt returned by the retrieval backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievedPassage {
    /// Document the passage came from
    pub document_id: String,

    /// Chunk index within the document
    pub chunk_id: u32,

    /// Passage text
    pub text: String,

    /// Similarity score, higher is more relevant
    pub score: f32,
}

impl RetrievedPassage {
    /// The persistable reference to this passage
    pub fn source_ref(&self) -> SourceRef {
        SourceRef {
            document_id: self.document_id.clone(),
            chunk_id: self.chunk_id,
        }
    }
}

/// Audio container format hint for transcription
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Wav,
    Mp3,
    Ogg,
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioFormat::Wav => write!(f, "wav"),
            AudioFormat::Mp3 => write!(f, "mp3"),
            AudioFormat::Ogg => write!(f, "ogg"),
        }
    }
}

/// User input for a single turn
#[derive(Debug, Clone)]
pub enum TurnInput {
    /// Typed text
    Text(String),

    /// Recorded audio that must be transcribed before the pipeline can run
    Audio {
        /// Raw audio bytes
        data: Vec<u8>,
        /// Container format hint for the transcription backend
        format: AudioFormat,
    },
}

/// Outcome of a completed (possibly degraded) turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnResult {
    /// Generated answer text
    pub text: String,

    /// Passages the answer was grounded on, in rank order
    pub sources: Vec<SourceRef>,

    /// Synthesized speech, present when voice output was requested and
    /// synthesis succeeded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<Vec<u8>>,

    /// Voice output was requested but synthesis was unavailable
    #[serde(default)]
    pub voice_unavailable: bool,

    /// Retrieval was unavailable; the answer was generated without
    /// grounding passages
    #[serde(default)]
    pub ungrounded: bool,
}

/// Pipeline stage, used to name the failing stage in errors
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Transcribing,
    Retrieving,
    Generating,
    Synthesizing,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Transcribing => write!(f, "transcribing"),
            Stage::Retrieving => write!(f, "retrieving"),
            Stage::Generating => write!(f, "generating"),
            Stage::Synthesizing => write!(f, "synthesizing"),
        }
    }
}

/// Kind of external backend, used as the circuit breaker key
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Transcription,
    Retrieval,
    Generation,
    Synthesis,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Transcription => write!(f, "transcription"),
            BackendKind::Retrieval => write!(f, "retrieval"),
            BackendKind::Generation => write!(f, "generation"),
            BackendKind::Synthesis => write!(f, "synthesis"),
        }
    }
}
