//! Client for the GPU inference service: embed, retrieve, rerank.
//!
//! All three operations are idempotent and side-effect free, so transient
//! failures are retried freely. Returned vectors must be unit-norm at the
//! configured dimension; anything else is treated as a service fault.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ScienceConfig;

use super::{check_status, classify_transport, with_retries, RpcError};

/// Unit-norm tolerance for embedding vectors
pub const NORM_EPSILON: f64 = 1e-6;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    control_id: &'a str,
    text: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbedResponse {
    pub vector: Vec<f32>,
    #[serde(default)]
    pub cache_hit: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedItem {
    pub id: String,
    pub text: String,
}

#[derive(Debug, Serialize)]
struct EmbedBatchRequest<'a> {
    items: &'a [EmbedItem],
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchEmbedding {
    pub id: String,
    pub vector: Vec<f32>,
    #[serde(default)]
    pub cache_hit: bool,
}

#[derive(Debug, Deserialize)]
struct EmbedBatchResponse {
    embeddings: Vec<BatchEmbedding>,
}

#[derive(Debug, Serialize)]
struct RetrieveRequest<'a> {
    source_vector: &'a [f32],
    target_vectors: &'a [Vec<f32>],
    top_k: usize,
}

/// One retrieval hit; `index` points into the submitted target list and
/// `similarity` is cosine in [-1, 1].
#[derive(Debug, Clone, Deserialize)]
pub struct RetrieveHit {
    pub index: usize,
    pub similarity: f64,
}

#[derive(Debug, Deserialize)]
struct RetrieveResponse {
    results: Vec<RetrieveHit>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RerankCandidate {
    pub id: String,
    pub text: String,
}

#[derive(Debug, Serialize)]
struct RerankRequest<'a> {
    source_text: &'a str,
    candidates: &'a [RerankCandidate],
}

#[derive(Debug, Clone, Deserialize)]
pub struct RerankScore {
    pub id: String,
    pub score: f64,
}

#[derive(Debug, Deserialize)]
struct RerankResponse {
    results: Vec<RerankScore>,
}

#[derive(Clone)]
pub struct ScienceClient {
    client: reqwest::Client,
    base_url: String,
    max_retries: u32,
    base_backoff: Duration,
    total_timeout: Duration,
}

impl ScienceClient {
    pub fn new(config: &ScienceConfig) -> Result<Self, RpcError> {
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

    /// Embed a single control text.
    pub async fn embed(&self, control_id: &str, text: &str) -> Result<EmbedResponse, RpcError> {
        let url = format!("{}/embed", self.base_url);
        self.deadline("embed", with_retries("embed", self.max_retries, self.base_backoff, || {
            let request = self
                .client
                .post(&url)
                .json(&EmbedRequest { control_id, text });
            async move {
                let response = request.send().await.map_err(classify_transport)?;
                check_status(response)?
                    .json::<EmbedResponse>()
                    .await
                    .map_err(classify_transport)
            }
        }))
        .await
    }

    /// Embed a batch of texts in one call; order of results is not
    /// guaranteed, entries are matched back by id.
    pub async fn embed_batch(&self, items: &[EmbedItem]) -> Result<Vec<BatchEmbedding>, RpcError> {
        let url = format!("{}/embed_batch", self.base_url);
        debug!(count = items.len(), "Requesting batch embedding");
        let response = self
            .deadline("embed_batch", with_retries("embed_batch", self.max_retries, self.base_backoff, || {
                let request = self.client.post(&url).json(&EmbedBatchRequest { items });
                async move {
                    let response = request.send().await.map_err(classify_transport)?;
                    check_status(response)?
                        .json::<EmbedBatchResponse>()
                        .await
                        .map_err(classify_transport)
                }
            }))
            .await?;
        Ok(response.embeddings)
    }

    /// Rank target vectors against the source by similarity; at most
    /// `top_k` hits, ordered by similarity descending.
    pub async fn retrieve(
        &self,
        source_vector: &[f32],
        target_vectors: &[Vec<f32>],
        top_k: usize,
    ) -> Result<Vec<RetrieveHit>, RpcError> {
        let url = format!("{}/retrieve", self.base_url);
        let response = self
            .deadline("retrieve", with_retries("retrieve", self.max_retries, self.base_backoff, || {
                let request = self.client.post(&url).json(&RetrieveRequest {
                    source_vector,
                    target_vectors,
                    top_k,
                });
                async move {
                    let response = request.send().await.map_err(classify_transport)?;
                    check_status(response)?
                        .json::<RetrieveResponse>()
                        .await
                        .map_err(classify_transport)
                }
            }))
            .await?;
        Ok(response.results)
    }

    /// Cross-encoder scoring of (source, candidate) pairs; scores in [0, 1],
    /// ordered descending.
    pub async fn rerank(
        &self,
        source_text: &str,
        candidates: &[RerankCandidate],
    ) -> Result<Vec<RerankScore>, RpcError> {
        let url = format!("{}/rerank", self.base_url);
        let response = self
            .deadline("rerank", with_retries("rerank", self.max_retries, self.base_backoff, || {
                let request = self.client.post(&url).json(&RerankRequest {
                    source_text,
                    candidates,
                });
                async move {
                    let response = request.send().await.map_err(classify_transport)?;
                    check_status(response)?
                        .json::<RerankResponse>()
                        .await
                        .map_err(classify_transport)
                }
            }))
            .await?;
        Ok(response.results)
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

/// Reject vectors that are not unit-norm at the expected dimension.
pub fn validate_vector(vector: &[f32], expected_dim: usize) -> Result<(), RpcError> {
    if vector.len() != expected_dim {
        return Err(RpcError::Permanent(format!(
            "embedding has {} dimensions, expected {expected_dim}",
            vector.len()
        )));
    }
    let norm = vector.iter().map(|v| (*v as f64) * (*v as f64)).sum::<f64>().sqrt();
    if (norm - 1.0).abs() > NORM_EPSILON {
        return Err(RpcError::Permanent(format!(
            "embedding L2 norm {norm} is not unit within {NORM_EPSILON}"
        )));
    }
    Ok(())
}
