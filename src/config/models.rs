use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub science: ScienceConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub workers: WorkerConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    /// Root directory for the ledger and queue keyspaces
    #[serde(default = "default_data_path")]
    pub data_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            data_path: default_data_path(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    "0.0.0.0:8080".parse().unwrap()
}

fn default_data_path() -> PathBuf {
    PathBuf::from("data/crosswalk")
}

/// Mapping pipeline tuning
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Keys embedding-cache entries; changing it invalidates cached vectors
    #[serde(default = "default_model_version")]
    pub model_version: String,
    /// Keys enrichment-cache entries; changing it forces re-enrichment on read
    #[serde(default = "default_enrichment_version")]
    pub enrichment_version: String,
    /// Retrieval cut after embedding similarity
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Candidates reranked below this score are dropped
    #[serde(default = "default_rerank_min")]
    pub rerank_min: f64,
    /// Concurrency cap for per-candidate reasoning calls
    #[serde(default = "default_reasoning_concurrency")]
    pub reasoning_concurrency: usize,
    /// Chunk size for batched target embedding
    #[serde(default = "default_embed_batch_size")]
    pub embed_batch_size: usize,
    /// Expected embedding dimension; vectors of any other length are rejected
    #[serde(default = "default_embedding_dim")]
    pub embedding_dim: usize,
    /// Soft budget for one whole workflow run
    #[serde(default = "default_workflow_budget_secs")]
    pub workflow_budget_secs: u64,
}

impl PipelineConfig {
    pub fn workflow_budget(&self) -> Duration {
        Duration::from_secs(self.workflow_budget_secs)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model_version: default_model_version(),
            enrichment_version: default_enrichment_version(),
            top_k: default_top_k(),
            rerank_min: default_rerank_min(),
            reasoning_concurrency: default_reasoning_concurrency(),
            embed_batch_size: default_embed_batch_size(),
            embedding_dim: default_embedding_dim(),
            workflow_budget_secs: default_workflow_budget_secs(),
        }
    }
}

fn default_model_version() -> String {
    "v1".to_string()
}

fn default_enrichment_version() -> String {
    "v1".to_string()
}

fn default_top_k() -> usize {
    20
}

fn default_rerank_min() -> f64 {
    0.5
}

fn default_reasoning_concurrency() -> usize {
    5
}

fn default_embed_batch_size() -> usize {
    32
}

fn default_embedding_dim() -> usize {
    4096
}

fn default_workflow_budget_secs() -> u64 {
    540
}

/// Inference service endpoint and timeouts
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScienceConfig {
    #[serde(default = "default_science_base_url")]
    pub base_url: String,
    #[serde(default = "default_science_read_timeout_secs")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_rpc_total_timeout_secs")]
    pub total_timeout_secs: u64,
    #[serde(default = "default_science_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for ScienceConfig {
    fn default() -> Self {
        Self {
            base_url: default_science_base_url(),
            read_timeout_secs: default_science_read_timeout_secs(),
            total_timeout_secs: default_rpc_total_timeout_secs(),
            max_retries: default_science_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

fn default_science_base_url() -> String {
    "http://localhost:8091".to_string()
}

fn default_science_read_timeout_secs() -> u64 {
    30
}

fn default_rpc_total_timeout_secs() -> u64 {
    120
}

fn default_science_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    500
}

/// Agent service endpoint and timeouts
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentConfig {
    #[serde(default = "default_agent_base_url")]
    pub base_url: String,
    #[serde(default = "default_agent_read_timeout_secs")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_rpc_total_timeout_secs")]
    pub total_timeout_secs: u64,
    #[serde(default = "default_agent_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            base_url: default_agent_base_url(),
            read_timeout_secs: default_agent_read_timeout_secs(),
            total_timeout_secs: default_rpc_total_timeout_secs(),
            max_retries: default_agent_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

fn default_agent_base_url() -> String {
    "http://localhost:8092".to_string()
}

fn default_agent_read_timeout_secs() -> u64 {
    60
}

fn default_agent_max_retries() -> u32 {
    2
}

/// Request queue behavior
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    /// How long a received message stays invisible before redelivery
    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,
    /// Deliveries allowed before a message moves to the DLQ
    #[serde(default = "default_max_receive_count")]
    pub max_receive_count: u32,
    #[serde(default = "default_queue_retention_days")]
    pub retention_days: u32,
    #[serde(default = "default_dlq_retention_days")]
    pub dlq_retention_days: u32,
}

impl QueueConfig {
    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout_secs: default_visibility_timeout_secs(),
            max_receive_count: default_max_receive_count(),
            retention_days: default_queue_retention_days(),
            dlq_retention_days: default_dlq_retention_days(),
        }
    }
}

fn default_visibility_timeout_secs() -> u64 {
    360
}

fn default_max_receive_count() -> u32 {
    3
}

fn default_queue_retention_days() -> u32 {
    7
}

fn default_dlq_retention_days() -> u32 {
    14
}

/// In-process worker pool
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerConfig {
    #[serde(default = "default_worker_count")]
    pub count: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

fn default_worker_count() -> usize {
    4
}

fn default_poll_interval_ms() -> u64 {
    250
}

/// Retention and background maintenance
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetentionConfig {
    /// Job records expire this long after creation
    #[serde(default = "default_job_ttl_secs")]
    pub job_ttl_secs: u64,
    /// Enrichment and embedding cache entries expire this long after write
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Interval for the pending-job sweeper and retention pruning
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl RetentionConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            job_ttl_secs: default_job_ttl_secs(),
            cache_ttl_secs: default_cache_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

fn default_job_ttl_secs() -> u64 {
    604_800
}

fn default_cache_ttl_secs() -> u64 {
    2_592_000
}

fn default_sweep_interval_secs() -> u64 {
    300
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.server.bind_addr.to_string(), "0.0.0.0:8080");
        assert_eq!(config.pipeline.model_version, "v1");
        assert_eq!(config.pipeline.top_k, 20);
        assert_eq!(config.pipeline.rerank_min, 0.5);
        assert_eq!(config.pipeline.reasoning_concurrency, 5);
        assert_eq!(config.pipeline.embed_batch_size, 32);
        assert_eq!(config.pipeline.embedding_dim, 4096);
        assert_eq!(config.pipeline.workflow_budget_secs, 540);
        assert_eq!(config.science.read_timeout_secs, 30);
        assert_eq!(config.science.total_timeout_secs, 120);
        assert_eq!(config.agent.read_timeout_secs, 60);
        assert_eq!(config.queue.visibility_timeout_secs, 360);
        assert_eq!(config.queue.max_receive_count, 3);
        assert_eq!(config.retention.job_ttl_secs, 604_800);
    }
}
