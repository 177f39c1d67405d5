//! HTTP transport layer
//!
//! Exposes the orchestration core over REST:
//!
//! - `GET /health` - liveness probe
//! - `POST /turn` - run one conversation turn (text or base64 audio)
//! - `POST /session/clear` - empty the caller's conversation history
//! - `GET /session/status` - session metadata
//!
//! Every endpoint except `/health` authenticates through the access gate
//! using the `Authorization: Bearer` header and the `x-access-key` header.
//! Conversation clear and status talk straight to the session store; only
//! `/turn` involves the pipeline.

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use sdk::errors::{GatewayError, ParleyErrorExt};
use sdk::types::{AudioFormat, SourceRef, TurnInput};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::auth::{AccessGate, Credential, HttpIdentityProvider};
use crate::backend::{HttpGeneration, HttpRetrieval, HttpSynthesis, HttpTranscription};
use crate::config::Config;
use crate::health::HealthTracker;
use crate::orchestrator::{Backends, OrchestratorOptions, TurnOrchestrator};
use crate::session::SessionStore;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub gate: Arc<AccessGate>,
    pub store: Arc<SessionStore>,
    pub orchestrator: Arc<TurnOrchestrator>,
}

/// Wire up the production state from configuration
pub fn build_state(config: &Config) -> AppState {
    let store = Arc::new(SessionStore::new(config.session.max_history_turns));
    let health = Arc::new(HealthTracker::new(
        config.breaker.failure_threshold,
        config.breaker.cooldown(),
    ));

    let provider = Arc::new(HttpIdentityProvider::new(
        config.auth.identity_base_url.clone(),
        Duration::from_secs(config.auth.timeout_secs),
    ));
    let gate = Arc::new(AccessGate::new(
        config.auth.access_key.clone(),
        provider,
        Arc::clone(&store),
    ));

    let backends = Backends {
        transcription: Arc::new(HttpTranscription::new(
            config.backends.transcription.base_url.clone(),
        )),
        retrieval: Arc::new(HttpRetrieval::new(config.backends.retrieval.base_url.clone())),
        generation: Arc::new(HttpGeneration::new(
            config.backends.generation.base_url.clone(),
        )),
        synthesis: Arc::new(HttpSynthesis::new(config.backends.synthesis.base_url.clone())),
    };

    let orchestrator = Arc::new(TurnOrchestrator::new(
        Arc::clone(&store),
        health,
        backends,
        OrchestratorOptions::from_config(config),
    ));

    AppState {
        gate,
        store,
        orchestrator,
    }
}

/// Build the router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/turn", post(turn_handler))
        .route("/session/clear", post(clear_handler))
        .route("/session/status", get(status_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Run the gateway server until the process is stopped
///
/// Starts the periodic idle-session eviction sweep alongside the HTTP
/// listener.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let state = build_state(&config);

    // Idle sessions are collected on a timer, not per-request
    let store = Arc::clone(&state.store);
    let idle_ttl = config.session.idle_ttl();
    let mut interval =
        tokio::time::interval(Duration::from_secs(config.session.evict_interval_secs));
    tokio::spawn(async move {
        loop {
            interval.tick().await;
            store.evict_idle(idle_ttl);
        }
    });

    let app = router(state);
    let addr = format!("{}:{}", config.server.bind, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Gateway listening on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}

/// Error wrapper that knows how to render itself as an HTTP response
#[derive(Debug)]
enum ApiError {
    Gateway(GatewayError),
    BadRequest(String),
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        ApiError::Gateway(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, hint) = match &self {
            ApiError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                message.clone(),
                "Provide either text or audio_b64 with a format".to_string(),
            ),
            ApiError::Gateway(err) => (status_for(err), err.to_string(), err.user_hint().to_string()),
        };

        let body = Json(json!({
            "error": message,
            "hint": hint,
        }));

        (status, body).into_response()
    }
}

fn status_for(err: &GatewayError) -> StatusCode {
    match err {
        GatewayError::InvalidCredential | GatewayError::InvalidAccessKey => {
            StatusCode::UNAUTHORIZED
        }
        GatewayError::SessionBusy => StatusCode::CONFLICT,
        GatewayError::SessionNotFound(_) => StatusCode::NOT_FOUND,
        GatewayError::StageFailed { .. } | GatewayError::Network(_) => StatusCode::BAD_GATEWAY,
        GatewayError::Config(_) | GatewayError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Pull the bearer token and access key out of the request headers
fn extract_credential(headers: &HeaderMap) -> Result<Credential, GatewayError> {
    let bearer_token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .filter(|token| !token.is_empty())
        .ok_or(GatewayError::InvalidCredential)?;

    let access_key = headers
        .get("x-access-key")
        .and_then(|value| value.to_str().ok())
        .filter(|key| !key.is_empty())
        .ok_or(GatewayError::InvalidAccessKey)?;

    Ok(Credential {
        bearer_token: bearer_token.to_string(),
        access_key: access_key.to_string(),
    })
}

#[derive(Debug, Deserialize)]
struct TurnRequest {
    /// Typed question
    text: Option<String>,

    /// Base64-encoded audio, alternative to `text`
    audio_b64: Option<String>,

    /// Audio container format hint
    format: Option<AudioFormat>,

    /// Request synthesized speech alongside the text answer
    #[serde(default)]
    wants_voice: bool,
}

impl TurnRequest {
    fn into_input(self) -> Result<TurnInput, ApiError> {
        if let Some(text) = self.text {
            if text.trim().is_empty() {
                return Err(ApiError::BadRequest("text must not be empty".to_string()));
            }
            return Ok(TurnInput::Text(text));
        }

        if let Some(audio_b64) = self.audio_b64 {
            let data = BASE64
                .decode(audio_b64.as_bytes())
                .map_err(|e| ApiError::BadRequest(format!("invalid audio_b64: {}", e)))?;
            return Ok(TurnInput::Audio {
                data,
                format: self.format.unwrap_or(AudioFormat::Wav),
            });
        }

        Err(ApiError::BadRequest(
            "either text or audio_b64 is required".to_string(),
        ))
    }
}

#[derive(Debug, Serialize)]
struct TurnResponse {
    text: String,
    sources: Vec<SourceRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    audio_b64: Option<String>,
    voice_unavailable: bool,
    ungrounded: bool,
}

#[derive(Debug, Serialize)]
struct SessionStatusResponse {
    session_id: String,
    turns: usize,
    in_flight: bool,
    created_at: DateTime<Utc>,
    last_active_at: DateTime<Utc>,
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "healthy", "service": "gateway" }))
}

async fn turn_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<TurnRequest>,
) -> Result<Json<TurnResponse>, ApiError> {
    let credential = extract_credential(&headers)?;
    let handle = state.gate.authenticate(&credential).await?;

    let wants_voice = request.wants_voice;
    let input = request.into_input()?;

    let result = state
        .orchestrator
        .handle_turn(&handle.session_id, input, wants_voice)
        .await?;

    Ok(Json(TurnResponse {
        text: result.text,
        sources: result.sources,
        audio_b64: result.audio.map(|bytes| BASE64.encode(bytes)),
        voice_unavailable: result.voice_unavailable,
        ungrounded: result.ungrounded,
    }))
}

async fn clear_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let credential = extract_credential(&headers)?;
    let handle = state.gate.authenticate(&credential).await?;

    state.store.clear(&handle.session_id)?;
    Ok(Json(json!({ "cleared": true })))
}

async fn status_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<SessionStatusResponse>, ApiError> {
    let credential = extract_credential(&headers)?;
    let handle = state.gate.authenticate(&credential).await?;

    let snapshot = state
        .store
        .get(&handle.session_id)
        .ok_or_else(|| GatewayError::SessionNotFound(handle.session_id.clone()))?;

    Ok(Json(SessionStatusResponse {
        session_id: snapshot.id,
        turns: snapshot.turn_count,
        in_flight: snapshot.in_flight,
        created_at: snapshot.created_at,
        last_active_at: snapshot.last_active_at,
    }))
}
