//! Error types and handling
//!
//! This module provides the error taxonomy used throughout the Parley
//! gateway. All errors implement the `ParleyErrorExt` trait which provides
//! user-friendly hints and indicates whether errors are recoverable.
//!
//! Transient-versus-fatal classification of individual backend calls lives
//! with the backend clients; by the time an error reaches this taxonomy the
//! retry budget has already been spent and only the failing stage remains
//! visible to the caller.

use crate::types::Stage;
use thiserror::Error;

/// Trait for Parley error extensions
///
/// Provides additional context for errors: a hint that is safe to show to
/// end users, and whether the request can be retried as-is.
pub trait ParleyErrorExt {
    /// Returns a user-friendly hint for the error
    ///
    /// The hint never contains credentials, backend addresses or other
    /// internal detail.
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors can be retried by the caller. Non-recoverable
    /// errors require corrected input or operator intervention.
    fn is_recoverable(&self) -> bool;
}

/// Main gateway error type
///
/// # Error Categories
///
/// - **Authentication**: rejected credential or access key, both terminal
///   for the request
/// - **Pipeline**: a busy session, or a stage that failed after its retry
///   budget was exhausted
/// - **Session**: unknown session identifier
/// - **Configuration / Network / IO**: ambient failures outside the
///   pipeline itself
#[derive(Debug, Error)]
pub enum GatewayError {
    // Authentication errors
    #[error("Invalid credential")]
    InvalidCredential,

    #[error("Invalid access key")]
    InvalidAccessKey,

    // Pipeline errors
    #[error("Session is busy with another turn")]
    SessionBusy,

    #[error("Pipeline failed at {stage} stage: {cause}")]
    StageFailed { stage: Stage, cause: String },

    // Session errors
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ParleyErrorExt for GatewayError {
    fn user_hint(&self) -> &str {
        match self {
            Self::InvalidCredential => "Sign in again to obtain a fresh token",
            Self::InvalidAccessKey => "Check the configured access key",

            Self::SessionBusy => "A previous question is still being answered. Try again shortly",
            Self::StageFailed { .. } => "A backend service is unavailable. Try again shortly",

            Self::SessionNotFound(_) => "Start a new conversation",

            Self::Config(_) => "Check your config.toml file for errors",
            Self::Network(_) => "Network operation failed. Check your connection",
            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            // Rejected credentials stay rejected until the caller fixes them
            Self::InvalidCredential | Self::InvalidAccessKey | Self::Config(_) => false,

            // All other errors are potentially recoverable
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_errors_not_recoverable() {
        assert!(!GatewayError::InvalidCredential.is_recoverable());
        assert!(!GatewayError::InvalidAccessKey.is_recoverable());
    }

    #[test]
    fn test_pipeline_errors_recoverable() {
        assert!(GatewayError::SessionBusy.is_recoverable());
        assert!(GatewayError::StageFailed {
            stage: Stage::Generating,
            cause: "timeout".to_string(),
        }
        .is_recoverable());
    }

    #[test]
    fn test_stage_failed_display_names_stage() {
        let err = GatewayError::StageFailed {
            stage: Stage::Transcribing,
            cause: "deadline exceeded".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("transcribing"));
        assert!(message.contains("deadline exceeded"));
    }

    #[test]
    fn test_user_hints_are_scrubbed() {
        // Hints must never leak the cause detail
        let err = GatewayError::StageFailed {
            stage: Stage::Generating,
            cause: "http://10.0.0.3:50053 refused connection".to_string(),
        };
        assert!(!err.user_hint().contains("10.0.0.3"));
    }
}
