//! Fjall-based persistence layer for jobs, the catalog projection, and the
//! derived-artifact caches.
//!
//! One keyspace holds five partitions:
//!
//! - `jobs` / `job_index` — job lifecycle records with conditional writes
//!   plus status/source secondary lookups
//! - `catalog` — frameworks and controls (seeded out of band)
//! - `enrichment` — LLM-expanded control text, last-writer-wins per key
//! - `embeddings` — unit-norm vectors keyed by (model version, control key)
//!
//! The ledger runs inside the API/worker process. Retention is enforced by
//! `prune_expired`, driven from the maintenance loop.

pub mod catalog;
pub mod embeddings;
pub mod enrichment;
pub mod error;
pub mod jobs;
pub mod partitions;

use std::path::Path;

use fjall::{Config, Keyspace, PartitionCreateOptions};
use tracing::info;

pub use catalog::{Catalog, ControlRecord, FrameworkRecord};
pub use embeddings::{EmbeddingCache, EmbeddingEntry};
pub use enrichment::{EnrichmentCache, EnrichmentEntry};
pub use error::{LedgerError, Result};
pub use jobs::{Candidate, JobOutcome, JobRecord, JobStatus, JobStore};

/// Retention statistics from one pruning pass
#[derive(Debug, Default)]
pub struct PruneStats {
    pub jobs_pruned: usize,
    pub enrichment_pruned: usize,
    pub embeddings_pruned: usize,
}

#[derive(Clone)]
pub struct Ledger {
    keyspace: Keyspace,
    jobs: JobStore,
    catalog: Catalog,
    enrichment: EnrichmentCache,
    embeddings: EmbeddingCache,
}

impl Ledger {
    /// Open or create the ledger keyspace at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening ledger at: {}", path.display());

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let keyspace = Config::new(path).open()?;

        let jobs = keyspace.open_partition("jobs", PartitionCreateOptions::default())?;
        let job_index = keyspace.open_partition("job_index", PartitionCreateOptions::default())?;
        let catalog = keyspace.open_partition("catalog", PartitionCreateOptions::default())?;
        let enrichment = keyspace.open_partition("enrichment", PartitionCreateOptions::default())?;
        let embeddings = keyspace.open_partition("embeddings", PartitionCreateOptions::default())?;

        info!("Ledger opened");
        Ok(Self {
            keyspace,
            jobs: JobStore::new(jobs, job_index),
            catalog: Catalog::new(catalog),
            enrichment: EnrichmentCache::new(enrichment),
            embeddings: EmbeddingCache::new(embeddings),
        })
    }

    pub fn jobs(&self) -> &JobStore {
        &self.jobs
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn enrichment(&self) -> &EnrichmentCache {
        &self.enrichment
    }

    pub fn embeddings(&self) -> &EmbeddingCache {
        &self.embeddings
    }

    /// Delete expired jobs and cache entries
    pub fn prune_expired(&self) -> Result<PruneStats> {
        let now = chrono::Utc::now().timestamp();
        let stats = PruneStats {
            jobs_pruned: self.jobs.prune_expired(now)?,
            enrichment_pruned: self.enrichment.prune_expired(now)?,
            embeddings_pruned: self.embeddings.prune_expired(now)?,
        };
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        info!(
            jobs = stats.jobs_pruned,
            enrichment = stats.enrichment_pruned,
            embeddings = stats.embeddings_pruned,
            "Ledger pruning completed"
        );
        Ok(stats)
    }

    /// Persist all pending writes to disk
    pub fn persist(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn open_and_persist() {
        let temp_dir = TempDir::new().unwrap();
        let ledger = Ledger::open(temp_dir.path().join("ledger")).unwrap();
        ledger.persist().unwrap();
    }

    #[test]
    fn records_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("ledger");
        let id = uuid::Uuid::new_v4();

        {
            let ledger = Ledger::open(&path).unwrap();
            ledger
                .jobs()
                .create(JobRecord::new(
                    id,
                    "AWS.EC2#1.0#PR.1".parse().unwrap(),
                    "NIST#R5".parse().unwrap(),
                    None,
                    604_800,
                ))
                .unwrap();
            ledger.persist().unwrap();
        }

        let ledger = Ledger::open(&path).unwrap();
        let record = ledger.jobs().get(&id).unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Pending);
    }

    #[test]
    fn prune_covers_all_partitions() {
        let temp_dir = TempDir::new().unwrap();
        let ledger = Ledger::open(temp_dir.path().join("ledger")).unwrap();

        let key: crate::keys::ControlKey = "AWS.EC2#1.0#PR.1".parse().unwrap();
        let mut enrichment = EnrichmentEntry::new("text".to_string(), "v1", 3600);
        enrichment.expires_at = 0;
        ledger.enrichment().put(&key, &enrichment).unwrap();

        let mut embedding = EmbeddingEntry::new(vec![1.0], 3600);
        embedding.expires_at = 0;
        ledger.embeddings().put(&key, "v1", &embedding).unwrap();

        let stats = ledger.prune_expired().unwrap();
        assert_eq!(stats.enrichment_pruned, 1);
        assert_eq!(stats.embeddings_pruned, 1);
        assert_eq!(stats.jobs_pruned, 0);
    }
}
