//! Access gate
//!
//! Every request passes two checks before it can touch a session: a static
//! shared-secret access key compared for equality against the configured
//! value, and a bearer token validated by the external identity provider.
//! Both failures are terminal for the request; neither is retried.
//!
//! On success the gate resolves (or creates) the caller's session, keyed by
//! the stable subject identity the provider reports, and refreshes the
//! session's activity timestamp.

use async_trait::async_trait;
use reqwest::Client;
use sdk::errors::GatewayError;
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::session::SessionStore;

/// Caller-supplied credential pair
#[derive(Debug, Clone)]
pub struct Credential {
    /// Bearer token for the identity provider
    pub bearer_token: String,

    /// Static shared-secret access key
    pub access_key: String,
}

/// Resolved session for an authenticated request
#[derive(Debug, Clone)]
pub struct SessionHandle {
    /// Session identifier for subsequent store and orchestrator calls
    pub session_id: String,

    /// Subject identity reported by the identity provider
    pub subject: String,
}

/// Errors from the identity provider
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    /// The provider examined the token and rejected it
    #[error("token rejected: {0}")]
    Rejected(String),

    /// The provider could not be reached or answered garbage
    #[error("identity provider unavailable: {0}")]
    Unavailable(String),
}

/// Identity provider contract
///
/// Accepts a bearer token and returns the stable subject identity behind
/// it. Treated as a black box beyond a consistent failure mode for
/// invalid or expired tokens.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Provider name for logging
    fn name(&self) -> &str;

    /// Validate a bearer token and return the subject identity
    async fn validate(&self, token: &str) -> Result<String, IdentityError>;
}

/// SHA-256 hash of a credential, hex encoded
///
/// Stored on the session instead of the credential itself.
pub fn credential_hash(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// The access gate: shared-secret check, token validation, session binding
pub struct AccessGate {
    access_key: String,
    provider: Arc<dyn IdentityProvider>,
    store: Arc<SessionStore>,
}

impl AccessGate {
    /// Create a new gate
    pub fn new(
        access_key: impl Into<String>,
        provider: Arc<dyn IdentityProvider>,
        store: Arc<SessionStore>,
    ) -> Self {
        Self {
            access_key: access_key.into(),
            provider,
            store,
        }
    }

    /// Authenticate a credential and bind it to a session
    ///
    /// # Errors
    ///
    /// - `InvalidAccessKey` when the shared-secret key mismatches
    /// - `InvalidCredential` when the identity provider rejects the token
    /// - `Network` when the identity provider cannot be reached
    pub async fn authenticate(&self, credential: &Credential) -> Result<SessionHandle, GatewayError> {
        if credential.access_key != self.access_key {
            warn!("Invalid access key provided");
            return Err(GatewayError::InvalidAccessKey);
        }

        let subject = match self.provider.validate(&credential.bearer_token).await {
            Ok(subject) => subject,
            Err(IdentityError::Rejected(reason)) => {
                warn!("Identity provider rejected token: {}", reason);
                return Err(GatewayError::InvalidCredential);
            }
            Err(IdentityError::Unavailable(reason)) => {
                return Err(GatewayError::Network(reason));
            }
        };

        let hash = credential_hash(&credential.bearer_token);
        let session_id = self.store.resolve(&subject, &hash);
        debug!("Authenticated subject {} on session {}", subject, session_id);

        Ok(SessionHandle {
            session_id,
            subject,
        })
    }
}

/// Token-introspection identity provider
///
/// POSTs the token to the provider's introspection endpoint and accepts it
/// when the provider marks it active.
pub struct HttpIdentityProvider {
    base_url: String,
    timeout: Duration,
    client: Client,
}

impl HttpIdentityProvider {
    /// Create a new provider client
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into(),
            timeout,
            client: Client::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct IntrospectResponse {
    active: bool,
    #[serde(default)]
    sub: Option<String>,
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    fn name(&self) -> &str {
        "introspection"
    }

    async fn validate(&self, token: &str) -> Result<String, IdentityError> {
        let url = format!("{}/introspect", self.base_url);

        let response = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(&json!({ "token": token }))
            .send()
            .await
            .map_err(|e| IdentityError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(IdentityError::Rejected(format!("status {}", status)));
        }
        if !status.is_success() {
            return Err(IdentityError::Unavailable(format!("status {}", status)));
        }

        let parsed: IntrospectResponse = response
            .json()
            .await
            .map_err(|e| IdentityError::Unavailable(format!("malformed response: {}", e)))?;

        if !parsed.active {
            return Err(IdentityError::Rejected("token inactive".to_string()));
        }

        parsed
            .sub
            .ok_or_else(|| IdentityError::Unavailable("active token without subject".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticProvider {
        accept: bool,
    }

    #[async_trait]
    impl IdentityProvider for StaticProvider {
        fn name(&self) -> &str {
            "static"
        }

        async fn validate(&self, token: &str) -> Result<String, IdentityError> {
            if self.accept {
                Ok(format!("subject-{}", token))
            } else {
                Err(IdentityError::Rejected("expired".to_string()))
            }
        }
    }

    fn gate(accept: bool) -> (AccessGate, Arc<SessionStore>) {
        let store = Arc::new(SessionStore::new(20));
        let gate = AccessGate::new(
            "secret-key",
            Arc::new(StaticProvider { accept }),
            Arc::clone(&store),
        );
        (gate, store)
    }

    fn credential(access_key: &str) -> Credential {
        Credential {
            bearer_token: "token-1".to_string(),
            access_key: access_key.to_string(),
        }
    }

    #[test]
    fn test_credential_hash_is_stable() {
        assert_eq!(credential_hash("abc"), credential_hash("abc"));
        assert_ne!(credential_hash("abc"), credential_hash("abd"));
        // Hex-encoded SHA-256
        assert_eq!(credential_hash("abc").len(), 64);
    }

    #[tokio::test]
    async fn test_authenticate_success_binds_session() {
        let (gate, store) = gate(true);

        let handle = gate.authenticate(&credential("secret-key")).await.unwrap();
        assert_eq!(handle.subject, "subject-token-1");

        let snapshot = store.get(&handle.session_id).unwrap();
        assert_eq!(snapshot.credential_hash, credential_hash("token-1"));
    }

    #[tokio::test]
    async fn test_authenticate_same_subject_same_session() {
        let (gate, _store) = gate(true);

        let first = gate.authenticate(&credential("secret-key")).await.unwrap();
        let second = gate.authenticate(&credential("secret-key")).await.unwrap();

        assert_eq!(first.session_id, second.session_id);
    }

    #[tokio::test]
    async fn test_wrong_access_key() {
        let (gate, store) = gate(true);

        let result = gate.authenticate(&credential("wrong")).await;
        assert!(matches!(result, Err(GatewayError::InvalidAccessKey)));
        // No session is created for a rejected request
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_rejected_token() {
        let (gate, store) = gate(false);

        let result = gate.authenticate(&credential("secret-key")).await;
        assert!(matches!(result, Err(GatewayError::InvalidCredential)));
        assert!(store.is_empty());
    }
}
