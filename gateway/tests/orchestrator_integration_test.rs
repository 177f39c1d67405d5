//! Integration tests for the turn pipeline over real HTTP clients
//!
//! Drives the orchestrator end to end against mock backend servers,
//! including circuit breaker behavior across consecutive turns.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use parley_gateway::backend::{HttpGeneration, HttpRetrieval, HttpSynthesis, HttpTranscription};
use parley_gateway::health::{CircuitState, HealthTracker};
use parley_gateway::orchestrator::{
    Backends, OrchestratorOptions, StageDeadlines, TurnOrchestrator,
};
use parley_gateway::session::SessionStore;
use sdk::errors::GatewayError;
use sdk::types::{BackendKind, TurnInput};

struct Harness {
    orchestrator: Arc<TurnOrchestrator>,
    store: Arc<SessionStore>,
    health: Arc<HealthTracker>,
    session_id: String,
}

fn options() -> OrchestratorOptions {
    OrchestratorOptions {
        retries: 0,
        backoff_base: Duration::from_millis(1),
        deadlines: StageDeadlines {
            transcription: Duration::from_secs(2),
            retrieval: Duration::from_secs(2),
            generation: Duration::from_secs(2),
            synthesis: Duration::from_secs(2),
        },
        context_turns: 6,
        top_k: 4,
        voice_id: None,
    }
}

/// Build an orchestrator whose four clients point at the given servers
fn harness(
    transcription: &MockServer,
    retrieval: &MockServer,
    generation: &MockServer,
    synthesis: &MockServer,
    failure_threshold: u32,
    cooldown: Duration,
) -> Harness {
    let store = Arc::new(SessionStore::new(20));
    let session_id = store.resolve("integration-tester", "hash");
    let health = Arc::new(HealthTracker::new(failure_threshold, cooldown));

    let backends = Backends {
        transcription: Arc::new(HttpTranscription::new(transcription.uri())),
        retrieval: Arc::new(HttpRetrieval::new(retrieval.uri())),
        generation: Arc::new(HttpGeneration::new(generation.uri())),
        synthesis: Arc::new(HttpSynthesis::new(synthesis.uri())),
    };

    let orchestrator = Arc::new(TurnOrchestrator::new(
        Arc::clone(&store),
        Arc::clone(&health),
        backends,
        options(),
    ));

    Harness {
        orchestrator,
        store,
        health,
        session_id,
    }
}

async fn mount_refund_backends(retrieval: &MockServer, generation: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "passages": [{
                "document_id": "doc1",
                "chunk_id": 3,
                "text": "You can request a refund within 30 days of purchase.",
                "score": 0.82
            }]
        })))
        .mount(retrieval)
        .await;

    Mock::given(method("POST"))
        .and(path("/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "text": "You can request a refund within 30 days of purchase."
        })))
        .mount(generation)
        .await;
}

#[tokio::test]
async fn test_text_turn_end_to_end() {
    let transcription = MockServer::start().await;
    let retrieval = MockServer::start().await;
    let generation = MockServer::start().await;
    let synthesis = MockServer::start().await;

    mount_refund_backends(&retrieval, &generation).await;

    let h = harness(
        &transcription,
        &retrieval,
        &generation,
        &synthesis,
        5,
        Duration::from_secs(30),
    );

    let result = h
        .orchestrator
        .handle_turn(
            &h.session_id,
            TurnInput::Text("What is the refund policy?".to_string()),
            false,
        )
        .await
        .unwrap();

    assert!(result.text.contains("refund"));
    assert_eq!(result.sources.len(), 1);
    assert_eq!(result.sources[0].document_id, "doc1");
    assert_eq!(result.sources[0].chunk_id, 3);
    assert!(!result.ungrounded);

    // Two turns persisted: the question and the grounded answer
    let history = h.store.history(&h.session_id).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].sources.len(), 1);

    // No transcription or synthesis traffic for a text-only turn
    assert!(transcription.received_requests().await.unwrap().is_empty());
    assert!(synthesis.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_voice_turn_end_to_end() {
    let transcription = MockServer::start().await;
    let retrieval = MockServer::start().await;
    let generation = MockServer::start().await;
    let synthesis = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/transcribe"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "text": "what is the refund policy"
        })))
        .mount(&transcription)
        .await;

    mount_refund_backends(&retrieval, &generation).await;

    Mock::given(method("POST"))
        .and(path("/synthesize"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8, 2, 3]))
        .mount(&synthesis)
        .await;

    let h = harness(
        &transcription,
        &retrieval,
        &generation,
        &synthesis,
        5,
        Duration::from_secs(30),
    );

    let result = h
        .orchestrator
        .handle_turn(
            &h.session_id,
            TurnInput::Audio {
                data: vec![0u8; 256],
                format: sdk::types::AudioFormat::Wav,
            },
            true,
        )
        .await
        .unwrap();

    assert!(!result.voice_unavailable);
    assert_eq!(result.audio.unwrap(), vec![1u8, 2, 3]);

    // The transcribed text became the persisted user turn
    let history = h.store.history(&h.session_id).unwrap();
    assert_eq!(history[0].content, "what is the refund policy");
}

#[tokio::test]
async fn test_retrieval_outage_degrades_turn() {
    let transcription = MockServer::start().await;
    let retrieval = MockServer::start().await;
    let generation = MockServer::start().await;
    let synthesis = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/query"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&retrieval)
        .await;

    Mock::given(method("POST"))
        .and(path("/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "text": "I could not consult the documents for this answer."
        })))
        .mount(&generation)
        .await;

    let h = harness(
        &transcription,
        &retrieval,
        &generation,
        &synthesis,
        5,
        Duration::from_secs(30),
    );

    let result = h
        .orchestrator
        .handle_turn(
            &h.session_id,
            TurnInput::Text("What is the refund policy?".to_string()),
            false,
        )
        .await
        .unwrap();

    assert!(result.ungrounded);
    assert!(result.sources.is_empty());
    assert!(!result.text.is_empty());
}

#[tokio::test]
async fn test_circuit_opens_and_rejects_without_dispatch() {
    let transcription = MockServer::start().await;
    let retrieval = MockServer::start().await;
    let generation = MockServer::start().await;
    let synthesis = MockServer::start().await;

    // Retrieval healthy, generation permanently down
    Mock::given(method("POST"))
        .and(path("/query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "passages": [] })))
        .mount(&retrieval)
        .await;

    Mock::given(method("POST"))
        .and(path("/generate"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&generation)
        .await;

    let h = harness(
        &transcription,
        &retrieval,
        &generation,
        &synthesis,
        3,
        Duration::from_secs(30),
    );

    // Three failing turns open the circuit (retries = 0, one call per turn)
    for _ in 0..3 {
        let result = h
            .orchestrator
            .handle_turn(&h.session_id, TurnInput::Text("hi".to_string()), false)
            .await;
        assert!(matches!(result, Err(GatewayError::StageFailed { .. })));
    }
    assert_eq!(
        h.health.circuit_state(BackendKind::Generation),
        CircuitState::Open
    );
    let dispatched = generation.received_requests().await.unwrap().len();
    assert_eq!(dispatched, 3);

    // Open circuit: the next turn fails without reaching the backend
    let result = h
        .orchestrator
        .handle_turn(&h.session_id, TurnInput::Text("hi".to_string()), false)
        .await;
    assert!(matches!(result, Err(GatewayError::StageFailed { .. })));
    assert_eq!(generation.received_requests().await.unwrap().len(), dispatched);
}

#[tokio::test]
async fn test_circuit_recovers_through_half_open_probe() {
    let transcription = MockServer::start().await;
    let retrieval = MockServer::start().await;
    let generation = MockServer::start().await;
    let synthesis = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "passages": [] })))
        .mount(&retrieval)
        .await;

    // Two failures, then the backend comes back
    Mock::given(method("POST"))
        .and(path("/generate"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&generation)
        .await;

    Mock::given(method("POST"))
        .and(path("/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "text": "recovered" })))
        .mount(&generation)
        .await;

    let h = harness(
        &transcription,
        &retrieval,
        &generation,
        &synthesis,
        2,
        Duration::from_millis(100),
    );

    for _ in 0..2 {
        let result = h
            .orchestrator
            .handle_turn(&h.session_id, TurnInput::Text("hi".to_string()), false)
            .await;
        assert!(result.is_err());
    }
    assert_eq!(
        h.health.circuit_state(BackendKind::Generation),
        CircuitState::Open
    );

    // After the cooldown, the next turn is the half-open probe; the
    // backend has recovered, so the probe closes the circuit
    tokio::time::sleep(Duration::from_millis(150)).await;

    let result = h
        .orchestrator
        .handle_turn(&h.session_id, TurnInput::Text("hi".to_string()), false)
        .await
        .unwrap();
    assert_eq!(result.text, "recovered");
    assert_eq!(
        h.health.circuit_state(BackendKind::Generation),
        CircuitState::Closed
    );
}

#[tokio::test]
async fn test_concurrent_turns_on_one_session() {
    let transcription = MockServer::start().await;
    let retrieval = MockServer::start().await;
    let generation = MockServer::start().await;
    let synthesis = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "passages": [] })))
        .mount(&retrieval)
        .await;

    Mock::given(method("POST"))
        .and(path("/generate"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "text": "slow answer" }))
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&generation)
        .await;

    let h = harness(
        &transcription,
        &retrieval,
        &generation,
        &synthesis,
        5,
        Duration::from_secs(30),
    );

    let tasks: Vec<_> = (0..3)
        .map(|_| {
            let orchestrator = Arc::clone(&h.orchestrator);
            let session_id = h.session_id.clone();
            tokio::spawn(async move {
                orchestrator
                    .handle_turn(&session_id, TurnInput::Text("hi".to_string()), false)
                    .await
            })
        })
        .collect();

    let mut completed = 0;
    let mut busy = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => completed += 1,
            Err(GatewayError::SessionBusy) => busy += 1,
            Err(other) => panic!("Unexpected error: {}", other),
        }
    }

    assert_eq!(completed, 1);
    assert_eq!(busy, 2);
    assert!(!h.store.get(&h.session_id).unwrap().in_flight);
    // Only the winning turn persisted anything
    assert_eq!(h.store.history(&h.session_id).unwrap().len(), 2);
}
