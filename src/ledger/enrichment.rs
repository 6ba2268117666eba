//! Content-addressed cache of LLM-enriched control text.
//!
//! Keyed by control key. Entries carry the enrichment version they were
//! produced under; a version mismatch reads as a miss, so bumping
//! `enrichment_version` forces re-enrichment on new reads without touching
//! existing rows. Writes are last-writer-wins and a lost update is
//! harmless: the pipeline accepts whichever value a concurrent writer left.

use chrono::{DateTime, Utc};
use fjall::PartitionHandle;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::keys::ControlKey;

use super::error::Result;
use super::partitions::encode_enrichment_key;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentEntry {
    pub enriched_text: String,
    pub version: String,
    pub created_at: DateTime<Utc>,
    /// Epoch seconds after which the entry reads as a miss
    pub expires_at: i64,
}

impl EnrichmentEntry {
    pub fn new(enriched_text: String, version: &str, ttl_secs: u64) -> Self {
        let now = Utc::now();
        Self {
            enriched_text,
            version: version.to_string(),
            created_at: now,
            expires_at: now.timestamp() + ttl_secs as i64,
        }
    }
}

#[derive(Clone)]
pub struct EnrichmentCache {
    partition: PartitionHandle,
}

impl EnrichmentCache {
    pub(super) fn new(partition: PartitionHandle) -> Self {
        Self { partition }
    }

    /// A hit requires a live entry of the requested version.
    pub fn get(&self, key: &ControlKey, version: &str) -> Result<Option<EnrichmentEntry>> {
        match self.partition.get(encode_enrichment_key(key))? {
            Some(value) => {
                let entry: EnrichmentEntry = serde_json::from_slice(&value)?;
                if entry.version != version || entry.expires_at < Utc::now().timestamp() {
                    return Ok(None);
                }
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    pub fn put(&self, key: &ControlKey, entry: &EnrichmentEntry) -> Result<()> {
        self.partition
            .insert(encode_enrichment_key(key), serde_json::to_vec(entry)?)?;
        debug!(control = %key, version = entry.version, "Enrichment cached");
        Ok(())
    }

    pub(super) fn prune_expired(&self, now_epoch: i64) -> Result<usize> {
        let mut expired = Vec::new();
        for item in self.partition.iter() {
            let (key, value) = item?;
            let entry: EnrichmentEntry = serde_json::from_slice(&value)?;
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
