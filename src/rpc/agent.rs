//! Client for the agent service: control enrichment and per-candidate
//! reasoning.
//!
//! Enrichment has a long latency tail (up to ~60 s); reasoning is fast.
//! Both are treated as idempotent, but neither is allowed to fail a
//! workflow: callers degrade to raw text or empty reasoning instead.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::AgentConfig;

use super::{check_status, classify_transport, with_retries, RpcError};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Serialize)]
pub struct EnrichRequest {
    pub framework_name: String,
    pub framework_version: String,
    pub short_id: String,
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnrichResponse {
    pub enriched_text: String,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReasonMapping {
    pub target_control_id: String,
    pub target_framework: String,
    pub text: String,
    pub similarity_score: f64,
    pub rerank_score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReasonRequest {
    pub source_control_id: String,
    pub source_text: String,
    pub mapping: ReasonMapping,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReasonResponse {
    pub reasoning: String,
    #[serde(default)]
    pub status: String,
}

#[derive(Clone)]
pub struct AgentClient {
    client: reqwest::Client,
    base_url: String,
    max_retries: u32,
    base_backoff: Duration,
    total_timeout: Duration,
}

impl AgentClient {
    pub fn new(config: &AgentConfig) -> Result<Self, RpcError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(Duration::from_secs(config.read_timeout_secs))
            .build()
            .map_err(|e| RpcError::Permanent(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
            base_backoff: Duration::from_millis(config.retry_backoff_ms),
            total_timeout: Duration::from_secs(config.total_timeout_secs),
        })
    }

    /// Expand a control description into retrieval-friendly text.
    pub async fn enrich(&self, request: &EnrichRequest) -> Result<EnrichResponse, RpcError> {
        let url = format!("{}/enrich", self.base_url);
        self.deadline("enrich", with_retries("enrich", self.max_retries, self.base_backoff, || {
            let builder = self.client.post(&url).json(request);
            async move {
                let response = builder.send().await.map_err(classify_transport)?;
                check_status(response)?
                    .json::<EnrichResponse>()
                    .await
                    .map_err(classify_transport)
            }
        }))
        .await
    }

    /// Produce a human-readable rationale for one candidate mapping.
    pub async fn reason(&self, request: &ReasonRequest) -> Result<ReasonResponse, RpcError> {
        let url = format!("{}/reason", self.base_url);
        self.deadline("reason", with_retries("reason", self.max_retries, self.base_backoff, || {
            let builder = self.client.post(&url).json(request);
            async move {
                let response = builder.send().await.map_err(classify_transport)?;
                check_status(response)?
                    .json::<ReasonResponse>()
                    .await
                    .map_err(classify_transport)
            }
        }))
        .await
    }

    async fn deadline<T>(
        &self,
        what: &'static str,
        fut: impl Future<Output = Result<T, RpcError>>,
    ) -> Result<T, RpcError> {
        match tokio::time::timeout(self.total_timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(what, timeout = ?self.total_timeout, "RPC deadline exceeded");
                Err(RpcError::DeadlineExceeded(self.total_timeout))
            }
        }
    }
}
