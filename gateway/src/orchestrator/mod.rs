//! Turn orchestration
//!
//! This module implements the pipeline controller that turns a single user
//! input (text or audio) into a coherent, context-aware answer by driving
//! the backend stages in order:
//!
//! 1. Acquire the session (at most one turn in flight per session)
//! 2. Transcribe, when the input is audio
//! 3. Retrieve grounding passages for the query plus recent history
//! 4. Generate the answer from bounded history and passages
//! 5. Synthesize speech, when voice output was requested
//! 6. Append the finalized user and assistant turns to history
//! 7. Release the session
//!
//! Transcription and generation failures abort the turn; retrieval and
//! synthesis failures degrade it (`ungrounded`, `voice_unavailable`)
//! instead. The circuit breaker is consulted before every backend call,
//! transient failures are retried with exponential backoff within a
//! bounded budget, and the session is released on every exit path.

use sdk::errors::GatewayError;
use sdk::types::{BackendKind, Stage, Turn, TurnInput, TurnResult};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::backend::{
    BackendError, BackendResult, GenerationBackend, GenerationRequest, RetrievalBackend,
    RetrievalRequest, SynthesisBackend, SynthesisRequest, TranscribeRequest, TranscriptionBackend,
};
use crate::config::Config;
use crate::health::{Gate, HealthTracker};
use crate::session::SessionStore;

/// The four backend clients the pipeline drives
pub struct Backends {
    pub transcription: Arc<dyn TranscriptionBackend>,
    pub retrieval: Arc<dyn RetrievalBackend>,
    pub generation: Arc<dyn GenerationBackend>,
    pub synthesis: Arc<dyn SynthesisBackend>,
}

/// Per-stage call deadlines
#[derive(Debug, Clone)]
pub struct StageDeadlines {
    pub transcription: Duration,
    pub retrieval: Duration,
    pub generation: Duration,
    pub synthesis: Duration,
}

/// Tunables for one orchestrator instance
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Retries per backend call after the first attempt
    pub retries: u32,

    /// Base backoff delay, doubled per retry
    pub backoff_base: Duration,

    /// Per-stage deadlines
    pub deadlines: StageDeadlines,

    /// Recent history turns included in the retrieval query
    pub context_turns: usize,

    /// Passages requested per retrieval
    pub top_k: usize,

    /// Voice passed through to the synthesis backend
    pub voice_id: Option<String>,
}

impl OrchestratorOptions {
    /// Build options from configuration
    pub fn from_config(config: &Config) -> Self {
        Self {
            retries: config.breaker.retries,
            backoff_base: config.breaker.backoff_base(),
            deadlines: StageDeadlines {
                transcription: Duration::from_secs(config.backends.transcription.timeout_secs),
                retrieval: Duration::from_secs(config.backends.retrieval.timeout_secs),
                generation: Duration::from_secs(config.backends.generation.timeout_secs),
                synthesis: Duration::from_secs(config.backends.synthesis.timeout_secs),
            },
            context_turns: config.session.context_turns,
            top_k: config.backends.retrieval.top_k,
            voice_id: config.backends.synthesis.voice_id.clone(),
        }
    }
}

/// Releases a session when the orchestration leaves scope, whatever the
/// exit path was.
struct ReleaseGuard<'a> {
    store: &'a SessionStore,
    session_id: &'a str,
}

impl Drop for ReleaseGuard<'_> {
    fn drop(&mut self) {
        self.store.release(self.session_id);
    }
}

/// The pipeline controller
///
/// One instance serves the whole gateway; many turns across distinct
/// sessions run concurrently through it, each independently suspending on
/// its own backend calls. Per-session exclusivity comes entirely from the
/// session store's acquire/release discipline.
pub struct TurnOrchestrator {
    store: Arc<SessionStore>,
    health: Arc<HealthTracker>,
    backends: Backends,
    options: OrchestratorOptions,
}

impl TurnOrchestrator {
    /// Create a new orchestrator
    pub fn new(
        store: Arc<SessionStore>,
        health: Arc<HealthTracker>,
        backends: Backends,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            store,
            health,
            backends,
            options,
        }
    }

    /// Run one turn through the pipeline
    ///
    /// Returns `SessionBusy` immediately when another turn is in flight for
    /// this session; the caller may retry. All other errors name the stage
    /// that failed. The session is released before this function returns,
    /// success or failure.
    pub async fn handle_turn(
        &self,
        session_id: &str,
        input: TurnInput,
        wants_voice: bool,
    ) -> Result<TurnResult, GatewayError> {
        if self.store.get(session_id).is_none() {
            return Err(GatewayError::SessionNotFound(session_id.to_string()));
        }

        if !self.store.try_acquire(session_id) {
            debug!("Session {} busy, rejecting turn", session_id);
            return Err(GatewayError::SessionBusy);
        }

        let _guard = ReleaseGuard {
            store: self.store.as_ref(),
            session_id,
        };

        self.run_pipeline(session_id, input, wants_voice).await
    }

    async fn run_pipeline(
        &self,
        session_id: &str,
        input: TurnInput,
        wants_voice: bool,
    ) -> Result<TurnResult, GatewayError> {
        let started = std::time::Instant::now();

        // Stage: transcribing (audio input only)
        let user_text = match input {
            TurnInput::Text(text) => text,
            TurnInput::Audio { data, format } => {
                let backend = Arc::clone(&self.backends.transcription);
                let deadline = self.options.deadlines.transcription;
                let request = TranscribeRequest {
                    audio: data,
                    format,
                };

                let transcript = self
                    .call_with_retry(BackendKind::Transcription, || {
                        let backend = Arc::clone(&backend);
                        let request = request.clone();
                        async move { backend.call(request, deadline).await }
                    })
                    .await
                    .map_err(|e| stage_failed(Stage::Transcribing, e))?;

                debug!(
                    "Session {}: transcribed {} chars",
                    session_id,
                    transcript.text.len()
                );
                transcript.text
            }
        };

        let history = self
            .store
            .history(session_id)
            .ok_or_else(|| GatewayError::SessionNotFound(session_id.to_string()))?;

        // Stage: retrieving. A failure here degrades the turn instead of
        // aborting it; the answer is just marked ungrounded.
        let query = self.build_query(&history, &user_text);
        let passages = {
            let backend = Arc::clone(&self.backends.retrieval);
            let deadline = self.options.deadlines.retrieval;
            let request = RetrievalRequest {
                query,
                top_k: self.options.top_k,
            };

            self.call_with_retry(BackendKind::Retrieval, || {
                let backend = Arc::clone(&backend);
                let request = request.clone();
                async move { backend.call(request, deadline).await }
            })
            .await
        };

        let (passages, ungrounded) = match passages {
            Ok(passages) => (passages, false),
            Err(e) => {
                warn!(
                    "Session {}: retrieval unavailable, answering ungrounded: {}",
                    session_id, e
                );
                (Vec::new(), true)
            }
        };

        // Stage: generating
        let user_turn = Turn::user(user_text);
        let answer = {
            let backend = Arc::clone(&self.backends.generation);
            let deadline = self.options.deadlines.generation;
            let mut turns = history.clone();
            turns.push(user_turn.clone());
            let request = GenerationRequest {
                turns,
                passages: passages.clone(),
            };

            self.call_with_retry(BackendKind::Generation, || {
                let backend = Arc::clone(&backend);
                let request = request.clone();
                async move { backend.call(request, deadline).await }
            })
            .await
            .map_err(|e| stage_failed(Stage::Generating, e))?
        };

        // Stage: synthesizing (voice output only). Failure degrades the
        // turn; the textual answer still stands.
        let (audio, voice_unavailable) = if wants_voice {
            let backend = Arc::clone(&self.backends.synthesis);
            let deadline = self.options.deadlines.synthesis;
            let request = SynthesisRequest {
                text: answer.clone(),
                voice_id: self.options.voice_id.clone(),
            };

            match self
                .call_with_retry(BackendKind::Synthesis, || {
                    let backend = Arc::clone(&backend);
                    let request = request.clone();
                    async move { backend.call(request, deadline).await }
                })
                .await
            {
                Ok(audio) => (Some(audio), false),
                Err(e) => {
                    warn!(
                        "Session {}: synthesis unavailable, returning text only: {}",
                        session_id, e
                    );
                    (None, true)
                }
            }
        } else {
            (None, false)
        };

        // Both turns are final now; persist them in order.
        let sources: Vec<_> = passages.iter().map(|p| p.source_ref()).collect();
        self.store.append_turn(session_id, user_turn)?;
        self.store
            .append_turn(session_id, Turn::assistant(answer.clone(), sources.clone()))?;

        info!(
            "Session {}: turn completed in {}ms (sources={}, ungrounded={}, voice_unavailable={})",
            session_id,
            started.elapsed().as_millis(),
            sources.len(),
            ungrounded,
            voice_unavailable
        );

        Ok(TurnResult {
            text: answer,
            sources,
            audio,
            voice_unavailable,
            ungrounded,
        })
    }

    /// Dispatch a backend call under the circuit breaker and retry policy
    ///
    /// An open circuit fails the stage immediately without dispatching.
    /// Transient failures are retried up to the budget with exponential
    /// backoff; fatal failures propagate on the first attempt. Every
    /// dispatched attempt is reported to the health tracker.
    async fn call_with_retry<T, F, Fut>(
        &self,
        kind: BackendKind,
        mut attempt: F,
    ) -> BackendResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = BackendResult<T>>,
    {
        let mut tries: u32 = 0;

        loop {
            if self.health.before_call(kind) == Gate::CircuitOpen {
                return Err(BackendError::Transient(format!(
                    "{} circuit open, call skipped",
                    kind
                )));
            }

            let result = attempt().await;
            self.health.record(kind, result.is_ok());

            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && tries < self.options.retries => {
                    tries += 1;
                    let delay = self.options.backoff_base * 2u32.saturating_pow(tries - 1);
                    warn!(
                        "{} call failed (attempt {}/{}), retrying in {:?}: {}",
                        kind,
                        tries,
                        self.options.retries + 1,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Assemble the retrieval query from the new input and recent turns
    ///
    /// Recent history is included so follow-up questions ("what about for
    /// members?") retrieve against their resolved meaning, not the bare
    /// pronouns.
    fn build_query(&self, history: &[Turn], user_text: &str) -> String {
        let context_start = history.len().saturating_sub(self.options.context_turns);
        let mut query = String::new();
        for turn in &history[context_start..] {
            query.push_str(&turn.content);
            query.push('\n');
        }
        query.push_str(user_text);
        query
    }
}

fn stage_failed(stage: Stage, error: BackendError) -> GatewayError {
    GatewayError::StageFailed {
        stage,
        cause: error.to_string(),
    }
}
