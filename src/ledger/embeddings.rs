//! Cache of control-text embeddings, keyed by (model version, control key).
//!
//! Distinct model versions get distinct records, so a model rollout never
//! mixes vector spaces. A cache miss only costs a recomputation; retrieval
//! correctness never depends on cache warmth.

use chrono::{DateTime, Utc};
use fjall::PartitionHandle;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::keys::ControlKey;

use super::error::Result;
use super::partitions::encode_embedding_key;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingEntry {
    pub vector: Vec<f32>,
    pub created_at: DateTime<Utc>,
    /// Epoch seconds after which the entry reads as a miss
    pub expires_at: i64,
}

impl EmbeddingEntry {
    pub fn new(vector: Vec<f32>, ttl_secs: u64) -> Self {
        let now = Utc::now();
        Self {
            vector,
            created_at: now,
            expires_at: now.timestamp() + ttl_secs as i64,
        }
    }
}

#[derive(Clone)]
pub struct EmbeddingCache {
    partition: PartitionHandle,
}

impl EmbeddingCache {
    pub(super) fn new(partition: PartitionHandle) -> Self {
        Self { partition }
    }

    pub fn get(&self, key: &ControlKey, model_version: &str) -> Result<Option<EmbeddingEntry>> {
        match self.partition.get(encode_embedding_key(model_version, key))? {
            Some(value) => {
                let entry: EmbeddingEntry = serde_json::from_slice(&value)?;
                if entry.expires_at < Utc::now().timestamp() {
                    return Ok(None);
                }
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    pub fn put(&self, key: &ControlKey, model_version: &str, entry: &EmbeddingEntry) -> Result<()> {
        self.partition.insert(
            encode_embedding_key(model_version, key),
            serde_json::to_vec(entry)?,
        )?;
        debug!(control = %key, model_version, dims = entry.vector.len(), "Embedding cached");
        Ok(())
    }

    pub(super) fn prune_expired(&self, now_epoch: i64) -> Result<usize> {
        let mut expired = Vec::new();
        for item in self.partition.iter() {
            let (key, value) = item?;
            let entry: EmbeddingEntry = serde_json::from_slice(&value)?;
            if entry.expires_at < now_epoch {
                expired.push(key);
            }
        }
        let pruned = expired.len();
        for key in expired {
            self.partition.remove(key)?;
        }
        Ok(pruned)
    }
}
