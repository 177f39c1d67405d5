//! HTTP retrieval client
//!
//! Talks to the vector search service. The service returns passages with
//! document/chunk identifiers and similarity scores; ordering is
//! re-established locally so rank is authoritative on this side.

use async_trait::async_trait;
use reqwest::Client;
use sdk::types::RetrievedPassage;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::{rank_passages, BackendError, BackendResult, RetrievalBackend, RetrievalRequest};

pub struct HttpRetrieval {
    base_url: String,
    client: Client,
}

impl HttpRetrieval {
    /// Create a new retrieval client
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: Client::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    passages: Vec<RetrievedPassage>,
}

#[async_trait]
impl RetrievalBackend for HttpRetrieval {
    fn name(&self) -> &str {
        "retrieval"
    }

    async fn call(
        &self,
        request: RetrievalRequest,
        deadline: Duration,
    ) -> BackendResult<Vec<RetrievedPassage>> {
        let url = format!("{}/query", self.base_url);

        tracing::debug!(
            "Retrieval request: top_k={}, query_chars={}",
            request.top_k,
            request.query.len()
        );

        let payload = json!({
            "query": request.query,
            "top_k": request.top_k,
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

        let parsed: QueryResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Fatal(format!("malformed retrieval response: {}", e)))?;

        let mut passages = rank_passages(parsed.passages);
        passages.truncate(request.top_k);
        Ok(passages)
    }
}
