use thiserror::Error;

use super::models::Config;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("pipeline.rerank_min must be within [0, 1], got {0}")]
    RerankMinOutOfRange(f64),
    #[error("pipeline.{0} must be at least 1")]
    ZeroPipelineValue(&'static str),
    #[error("pipeline.{0} must be non-empty and must not contain '|'")]
    InvalidVersionTag(&'static str),
    #[error("queue.max_receive_count must be at least 1")]
    ZeroMaxReceiveCount,
    #[error("workers.count must be at least 1")]
    ZeroWorkerCount,
    #[error("{0} base_url must start with http:// or https://")]
    InvalidBaseUrl(&'static str),
}

pub fn validate(config: &Config) -> Result<(), ValidationError> {
    let p = &config.pipeline;

    if !(0.0..=1.0).contains(&p.rerank_min) {
        return Err(ValidationError::RerankMinOutOfRange(p.rerank_min));
    }
    for (name, value) in [
        ("top_k", p.top_k),
        ("reasoning_concurrency", p.reasoning_concurrency),
        ("embed_batch_size", p.embed_batch_size),
        ("embedding_dim", p.embedding_dim),
    ] {
        if value == 0 {
            return Err(ValidationError::ZeroPipelineValue(name));
        }
    }
    // Version tags key cache records; '|' is the record-key separator
    for (name, value) in [
        ("model_version", &p.model_version),
        ("enrichment_version", &p.enrichment_version),
    ] {
        if value.is_empty() || value.contains('|') {
            return Err(ValidationError::InvalidVersionTag(name));
        }
    }

    if config.queue.max_receive_count == 0 {
        return Err(ValidationError::ZeroMaxReceiveCount);
    }
    if config.workers.count == 0 {
        return Err(ValidationError::ZeroWorkerCount);
    }

    for (name, url) in [
        ("science", &config.science.base_url),
        ("agent", &config.agent.base_url),
    ] {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ValidationError::InvalidBaseUrl(name));
        }
    }

    if config.queue.visibility_timeout_secs < config.pipeline.workflow_budget_secs {
        tracing::warn!(
            visibility = config.queue.visibility_timeout_secs,
            budget = config.pipeline.workflow_budget_secs,
            "Queue visibility timeout is shorter than the workflow budget; \
             overlapping deliveries are absorbed by idempotent terminal writes"
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::models::Config;

    #[test]
    fn default_config_validates() {
        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn rejects_out_of_range_rerank_min() {
        let mut config = Config::default();
        config.pipeline.rerank_min = 1.5;
        assert!(matches!(
            validate(&config),
            Err(ValidationError::RerankMinOutOfRange(_))
        ));
    }

    #[test]
    fn rejects_version_tag_with_separator() {
        let mut config = Config::default();
        config.pipeline.model_version = "v1|test".to_string();
        assert!(matches!(
            validate(&config),
            Err(ValidationError::InvalidVersionTag("model_version"))
        ));
    }

    #[test]
    fn rejects_zero_sizes() {
        let mut config = Config::default();
        config.pipeline.top_k = 0;
        assert!(validate(&config).is_err());

        let mut config = Config::default();
        config.workers.count = 0;
        assert!(matches!(
            validate(&config),
            Err(ValidationError::ZeroWorkerCount)
        ));
    }

    #[test]
    fn rejects_bad_base_url() {
        let mut config = Config::default();
        config.agent.base_url = "agent:8092".to_string();
        assert!(matches!(
            validate(&config),
            Err(ValidationError::InvalidBaseUrl("agent"))
        ));
    }
}
