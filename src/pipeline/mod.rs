//! The mapping workflow orchestrator.
//!
//! One `run` drives a single job through the full pipeline:
//!
//! 1. validate the source control exists
//! 2. resolve source text (enrichment cache, else live enrichment, else the
//!    raw description as a degraded fallback)
//! 3. embed the source (cache-first)
//! 4. collect and embed the candidate set, retrieve the top-K by similarity,
//!    rerank and threshold
//! 5. fan out per-candidate reasoning under a concurrency cap
//! 6. write the terminal job state
//!
//! The orchestrator is the only writer of terminal job state. Every internal
//! failure is classified into the fixed error taxonomy before that write;
//! retries and concurrent runs are absorbed by the job store's conditional
//! writes.

pub mod candidates;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::ledger::{
    Candidate, ControlRecord, EmbeddingEntry, EnrichmentEntry, Ledger, LedgerError,
};
use crate::observability::Metrics;
use crate::queue::MappingMessage;
use crate::rpc::science::validate_vector;
use crate::rpc::{
    AgentClient, EmbedItem, EnrichRequest, ReasonMapping, ReasonRequest, RerankCandidate,
    ScienceClient,
};

use candidates::{clamp_unit, sort_candidates};

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("source control not found")]
    SourceMissing,
    #[error("inference service unavailable")]
    ScienceUnavailable,
    #[error("workflow budget exceeded")]
    Timeout,
    #[error("internal error: {0}")]
    Internal(String),
}

impl WorkflowError {
    /// The fixed client-visible message set for FAILED jobs.
    pub fn public_message(&self) -> &'static str {
        match self {
            WorkflowError::SourceMissing => "SourceMissing",
            WorkflowError::ScienceUnavailable => "ScienceUnavailable",
            WorkflowError::Timeout => "WorkflowTimeout",
            WorkflowError::Internal(_) => "InternalError",
        }
    }
}

fn internal(error: impl std::fmt::Display) -> WorkflowError {
    WorkflowError::Internal(error.to_string())
}

/// Restrict a candidate set to an explicit control-id subset. An absent or
/// empty subset means no filter.
pub fn filter_candidates(
    mut controls: Vec<ControlRecord>,
    target_control_ids: Option<&[String]>,
) -> Vec<ControlRecord> {
    match target_control_ids {
        Some(ids) if !ids.is_empty() => {
            let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
            controls.retain(|c| wanted.contains(c.key.control_id()));
            controls
        }
        _ => controls,
    }
}

pub struct Orchestrator {
    ledger: Ledger,
    science: ScienceClient,
    agent: AgentClient,
    config: PipelineConfig,
    cache_ttl_secs: u64,
    metrics: Arc<Metrics>,
}

impl Orchestrator {
    pub fn new(
        ledger: Ledger,
        science: ScienceClient,
        agent: AgentClient,
        config: PipelineConfig,
        cache_ttl_secs: u64,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            ledger,
            science,
            agent,
            config,
            cache_ttl_secs,
            metrics,
        }
    }

    /// Run the workflow for one queued message and write the terminal job
    /// state. Returns `Err` only when the terminal write itself could not be
    /// performed; callers should leave the message unacked in that case.
    pub async fn run(&self, message: &MappingMessage) -> Result<(), LedgerError> {
        let job_id = message.job_id;
        let budget = self.config.workflow_budget();

        let result = match tokio::time::timeout(budget, self.execute(message)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(%job_id, ?budget, "Workflow budget exceeded, aborting");
                Err(WorkflowError::Timeout)
            }
        };

        match result {
            Ok(mappings) => {
                info!(%job_id, mappings = mappings.len(), "Workflow completed");
                match self.ledger.jobs().mark_completed(&job_id, mappings) {
                    Ok(_) => {
                        self.metrics.job_completed();
                        Ok(())
                    }
                    Err(error) => self.absorb_terminal_conflict(&job_id, error),
                }
            }
            Err(error) => {
                warn!(%job_id, %error, "Workflow failed");
                match self.ledger.jobs().mark_failed(&job_id, error.public_message()) {
                    Ok(_) => {
                        self.metrics.job_failed();
                        Ok(())
                    }
                    Err(error) => self.absorb_terminal_conflict(&job_id, error),
                }
            }
        }
    }

    /// A conflicting or orphaned terminal write means another run already
    /// settled the job (or the record was pruned); either way there is
    /// nothing left for this run to do.
    fn absorb_terminal_conflict(
        &self,
        job_id: &uuid::Uuid,
        error: LedgerError,
    ) -> Result<(), LedgerError> {
        match error {
            LedgerError::Conflict { status, .. } => {
                info!(%job_id, ?status, "Terminal write absorbed; job already settled");
                Ok(())
            }
            LedgerError::JobNotFound(_) => {
                warn!(%job_id, "Job record missing at terminal write");
                Ok(())
            }
            other => Err(other),
        }
    }

    async fn execute(&self, message: &MappingMessage) -> Result<Vec<Candidate>, WorkflowError> {
        // S1: the source control must still exist
        let source = self
            .ledger
            .catalog()
            .get_control(&message.source_control_key)
            .map_err(internal)?
            .ok_or(WorkflowError::SourceMissing)?;

        // S2/S3: resolve source text
        let (source_text, degraded) = self.prepare_source_text(&source).await?;
        if degraded {
            self.metrics.enrichment_degraded();
        }

        // S4.1: source embedding
        let source_vector = self.source_embedding(&source, &source_text).await?;

        // S4.2: candidate set
        let controls = self
            .ledger
            .catalog()
            .list_controls(&message.target_framework_key)
            .map_err(internal)?;
        let candidates = filter_candidates(controls, message.target_control_ids.as_deref());
        if candidates.is_empty() {
            debug!(job_id = %message.job_id, "Empty candidate set");
            return Ok(Vec::new());
        }

        // S4.3: target embeddings
        let embedded = self.target_embeddings(candidates).await?;
        if embedded.is_empty() {
            return Ok(Vec::new());
        }

        // S4.4: retrieval
        let top_k = self.config.top_k.min(embedded.len());
        let target_vectors: Vec<Vec<f32>> = embedded.iter().map(|(_, v)| v.clone()).collect();
        let hits = self
            .science
            .retrieve(&source_vector, &target_vectors, top_k)
            .await
            .map_err(|error| {
                warn!(%error, "Retrieval failed");
                WorkflowError::ScienceUnavailable
            })?;

        let mut shortlist: Vec<(&ControlRecord, f64)> = Vec::new();
        for hit in hits.into_iter().take(top_k) {
            match embedded.get(hit.index) {
                Some((record, _)) => shortlist.push((record, hit.similarity)),
                None => warn!(index = hit.index, "Retrieval hit out of range, skipping"),
            }
        }

        // S4.5: rerank and threshold
        let rerank_inputs: Vec<RerankCandidate> = shortlist
            .iter()
            .map(|(record, _)| RerankCandidate {
                id: record.key.to_string(),
                text: record.description.clone(),
            })
            .collect();
        let scores = self
            .science
            .rerank(&source_text, &rerank_inputs)
            .await
            .map_err(|error| {
                warn!(%error, "Rerank failed");
                WorkflowError::ScienceUnavailable
            })?;
        let score_by_id: HashMap<String, f64> =
            scores.into_iter().map(|s| (s.id, s.score)).collect();

        let surviving: Vec<(&ControlRecord, f64, f64)> = shortlist
            .into_iter()
            .filter_map(|(record, similarity)| {
                let rerank = *score_by_id.get(&record.key.to_string())?;
                (rerank >= self.config.rerank_min).then_some((record, similarity, rerank))
            })
            .collect();
        debug!(
            job_id = %message.job_id,
            surviving = surviving.len(),
            "Rerank threshold applied"
        );

        // S5: per-candidate reasoning, bounded fan-out
        let reasonings = self.reasoning_fanout(&source, &source_text, &surviving).await;

        let mut mappings: Vec<Candidate> = surviving
            .into_iter()
            .zip(reasonings)
            .map(|((record, similarity, rerank), reasoning)| Candidate {
                target_control_key: record.key.clone(),
                target_control_id: record.key.control_id().to_string(),
                similarity_score: clamp_unit(similarity),
                rerank_score: clamp_unit(rerank),
                reasoning,
            })
            .collect();
        sort_candidates(&mut mappings);
        Ok(mappings)
    }

    /// S2/S3: cached enriched text, else live enrichment, else the raw
    /// description. The fallback degrades the run but never fails it.
    async fn prepare_source_text(
        &self,
        source: &ControlRecord,
    ) -> Result<(String, bool), WorkflowError> {
        let cache = self.ledger.enrichment();
        let version = &self.config.enrichment_version;

        if let Some(entry) = cache.get(&source.key, version).map_err(internal)? {
            return Ok((entry.enriched_text, false));
        }

        let request = EnrichRequest {
            framework_name: source.key.framework().name().to_string(),
            framework_version: source.key.framework().version().to_string(),
            short_id: source.key.control_id().to_string(),
            title: source.title.clone(),
            description: source.description.clone(),
        };

        match self.agent.enrich(&request).await {
            Ok(response) => {
                let entry =
                    EnrichmentEntry::new(response.enriched_text, version, self.cache_ttl_secs);
                cache.put(&source.key, &entry).map_err(internal)?;
                // Re-read to tolerate a lost update: a concurrent enrichment
                // of the same control may have won; either value is valid.
                let text = cache
                    .get(&source.key, version)
                    .map_err(internal)?
                    .map(|e| e.enriched_text)
                    .unwrap_or(entry.enriched_text);
                Ok((text, false))
            }
            Err(error) => {
                warn!(control = %source.key, %error, enrichment_degraded = true, "Enrichment failed, using raw description");
                Ok((source.description.clone(), true))
            }
        }
    }

    /// S4.1: cache-first source embedding.
    async fn source_embedding(
        &self,
        source: &ControlRecord,
        text: &str,
    ) -> Result<Vec<f32>, WorkflowError> {
        let model_version = &self.config.model_version;
        if let Some(entry) = self
            .ledger
            .embeddings()
            .get(&source.key, model_version)
            .map_err(internal)?
        {
            return Ok(entry.vector);
        }

        let response = self
            .science
            .embed(source.key.control_id(), text)
            .await
            .map_err(|error| {
                warn!(%error, "Source embedding failed");
                WorkflowError::ScienceUnavailable
            })?;
        validate_vector(&response.vector, self.config.embedding_dim).map_err(|error| {
            warn!(%error, "Source embedding rejected");
            WorkflowError::ScienceUnavailable
        })?;

        self.ledger
            .embeddings()
            .put(
                &source.key,
                model_version,
                &EmbeddingEntry::new(response.vector.clone(), self.cache_ttl_secs),
            )
            .map_err(internal)?;
        Ok(response.vector)
    }

    /// S4.3: resolve candidate vectors cache-first, batch-embedding the
    /// misses. A candidate whose embedding cannot be obtained (one batch
    /// attempt plus one per-item retry) is dropped; losing more than half
    /// the candidate set fails the workflow.
    async fn target_embeddings(
        &self,
        candidates: Vec<ControlRecord>,
    ) -> Result<Vec<(ControlRecord, Vec<f32>)>, WorkflowError> {
        let model_version = &self.config.model_version;
        let cache = self.ledger.embeddings();
        let total = candidates.len();

        let mut resolved: Vec<Option<Vec<f32>>> = vec![None; total];
        let mut misses: Vec<usize> = Vec::new();
        for (i, candidate) in candidates.iter().enumerate() {
            match cache.get(&candidate.key, model_version).map_err(internal)? {
                Some(entry) => resolved[i] = Some(entry.vector),
                None => misses.push(i),
            }
        }
        debug!(total, misses = misses.len(), "Target embedding cache scan");

        let mut dropped = 0usize;
        for chunk in misses.chunks(self.config.embed_batch_size) {
            let items: Vec<EmbedItem> = chunk
                .iter()
                .map(|&i| EmbedItem {
                    id: candidates[i].key.to_string(),
                    text: candidates[i].description.clone(),
                })
                .collect();

            let mut by_id: HashMap<String, Vec<f32>> = HashMap::new();
            match self.science.embed_batch(&items).await {
                Ok(embeddings) => {
                    for embedding in embeddings {
                        by_id.insert(embedding.id, embedding.vector);
                    }
                }
                Err(error) => {
                    warn!(%error, "Batch embedding failed, retrying per item");
                }
            }

            for &i in chunk {
                let candidate = &candidates[i];
                let id = candidate.key.to_string();

                let vector = match by_id.remove(&id) {
                    Some(v) if validate_vector(&v, self.config.embedding_dim).is_ok() => Some(v),
                    _ => self.embed_one_target(candidate).await,
                };

                match vector {
                    Some(v) => {
                        cache
                            .put(
                                &candidate.key,
                                model_version,
                                &EmbeddingEntry::new(v.clone(), self.cache_ttl_secs),
                            )
                            .map_err(internal)?;
                        resolved[i] = Some(v);
                    }
                    None => {
                        dropped += 1;
                        self.metrics.candidate_dropped();
                        warn!(control = %candidate.key, "Candidate dropped, embedding unavailable");
                    }
                }
            }
        }

        if dropped * 2 > total {
            warn!(dropped, total, "Too many candidate embeddings failed");
            return Err(WorkflowError::ScienceUnavailable);
        }

        Ok(candidates
            .into_iter()
            .zip(resolved)
            .filter_map(|(candidate, vector)| vector.map(|v| (candidate, v)))
            .collect())
    }

    /// Single per-item retry after a batch miss or an invalid batch vector.
    async fn embed_one_target(&self, candidate: &ControlRecord) -> Option<Vec<f32>> {
        match self
            .science
            .embed(candidate.key.control_id(), &candidate.description)
            .await
        {
            Ok(response)
                if validate_vector(&response.vector, self.config.embedding_dim).is_ok() =>
            {
                Some(response.vector)
            }
            Ok(_) => None,
            Err(error) => {
                warn!(control = %candidate.key, %error, "Per-item embedding retry failed");
                None
            }
        }
    }

    /// S5: one reasoning call per surviving candidate, at most
    /// `reasoning_concurrency` outstanding. An individual failure yields an
    /// empty rationale for that candidate.
    async fn reasoning_fanout(
        &self,
        source: &ControlRecord,
        source_text: &str,
        surviving: &[(&ControlRecord, f64, f64)],
    ) -> Vec<String> {
        let semaphore = Arc::new(Semaphore::new(self.config.reasoning_concurrency));
        let mut join_set = JoinSet::new();

        for (i, (record, similarity, rerank)) in surviving.iter().enumerate() {
            let request = ReasonRequest {
                source_control_id: source.key.control_id().to_string(),
                source_text: source_text.to_string(),
                mapping: ReasonMapping {
                    target_control_id: record.key.control_id().to_string(),
                    target_framework: record.key.framework().to_string(),
                    text: record.description.clone(),
                    similarity_score: *similarity,
                    rerank_score: *rerank,
                },
            };
            let agent = self.agent.clone();
            let semaphore = semaphore.clone();
            let metrics = self.metrics.clone();
            let control = record.key.clone();

            join_set.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (i, String::new());
                };
                match agent.reason(&request).await {
                    Ok(response) => (i, response.reasoning),
                    Err(error) => {
                        metrics.reasoning_failure();
                        warn!(%control, %error, "Reasoning failed, leaving rationale empty");
                        (i, String::new())
                    }
                }
            });
        }

        let mut reasonings = vec![String::new(); surviving.len()];
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((i, reasoning)) => reasonings[i] = reasoning,
                Err(error) => warn!(%error, "Reasoning task panicked"),
            }
        }
        reasonings
    }
}
