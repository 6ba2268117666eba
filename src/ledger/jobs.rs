//! Durable job records with conditional state transitions.
//!
//! A job moves along `PENDING -> RUNNING -> {COMPLETED, FAILED}` and never
//! backward. All writes are read-modify-write under a store-internal mutex,
//! which totally orders transitions per job id; concurrent workers racing on
//! the same job see their duplicate writes either absorbed (idempotent
//! retries) or rejected with `Conflict`. Terminal states are written at most
//! once with new content.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use fjall::PartitionHandle;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::keys::{ControlKey, FrameworkKey};

use super::error::{LedgerError, Result};
use super::partitions::{
    decode_index_job_id, encode_job_key, encode_source_index_key, encode_source_index_prefix,
    encode_status_index_key, encode_status_index_prefix,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    fn index_tag(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }
}

/// One ranked mapping candidate in a completed result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub target_control_key: ControlKey,
    pub target_control_id: String,
    pub similarity_score: f64,
    pub rerank_score: f64,
    pub reasoning: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    Completed { mappings: Vec<Candidate> },
    Failed { error_message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub source_control_key: ControlKey,
    pub target_framework_key: FrameworkKey,
    pub target_control_ids: Option<Vec<String>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub terminal_at: Option<DateTime<Utc>>,
    /// Workflow-run identifier of the worker attempt that moved the job to
    /// RUNNING; lets overlapping deliveries detect each other.
    pub execution_handle: Option<String>,
    pub outcome: Option<JobOutcome>,
    /// Epoch seconds after which the record may be deleted
    pub expires_at: i64,
}

impl JobRecord {
    pub fn new(
        job_id: Uuid,
        source_control_key: ControlKey,
        target_framework_key: FrameworkKey,
        target_control_ids: Option<Vec<String>>,
        ttl_secs: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            status: JobStatus::Pending,
            source_control_key,
            target_framework_key,
            target_control_ids,
            created_at: now,
            updated_at: now,
            terminal_at: None,
            execution_handle: None,
            outcome: None,
            expires_at: now.timestamp() + ttl_secs as i64,
        }
    }
}

/// Fjall-backed job store.
///
/// The mutex guards every read-modify-write; fjall itself only gives us
/// last-writer-wins per key.
#[derive(Clone)]
pub struct JobStore {
    jobs: PartitionHandle,
    index: PartitionHandle,
    write_lock: Arc<Mutex<()>>,
}

impl JobStore {
    pub(super) fn new(jobs: PartitionHandle, index: PartitionHandle) -> Self {
        Self {
            jobs,
            index,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Insert a fresh PENDING record; fails if the job id is taken.
    pub fn create(&self, record: JobRecord) -> Result<()> {
        let _guard = self.write_lock.lock().expect("job store lock poisoned");

        let key = encode_job_key(&record.job_id);
        if self.jobs.get(&key)?.is_some() {
            return Err(LedgerError::DuplicateJob(record.job_id));
        }

        self.jobs.insert(key, serde_json::to_vec(&record)?)?;
        self.index.insert(
            encode_status_index_key(record.status.index_tag(), &record.job_id),
            "",
        )?;
        self.index.insert(
            encode_source_index_key(&record.source_control_key, &record.job_id),
            "",
        )?;
        debug!(job_id = %record.job_id, "Job created");
        Ok(())
    }

    pub fn get(&self, job_id: &Uuid) -> Result<Option<JobRecord>> {
        match self.jobs.get(encode_job_key(job_id))? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    /// PENDING -> RUNNING, recording the worker's execution handle.
    ///
    /// A repeat call with the same handle succeeds idempotently; a different
    /// handle, or a terminal status, fails `Conflict` carrying the observed
    /// status so callers can decide whether the run is already settled.
    pub fn mark_running(&self, job_id: &Uuid, execution_handle: &str) -> Result<JobRecord> {
        let _guard = self.write_lock.lock().expect("job store lock poisoned");
        let mut record = self.load(job_id)?;

        match record.status {
            JobStatus::Pending => {
                self.move_status_index(&record, JobStatus::Running)?;
                record.status = JobStatus::Running;
                record.execution_handle = Some(execution_handle.to_string());
                self.persist_record(&mut record)?;
                debug!(job_id = %job_id, execution_handle, "Job running");
                Ok(record)
            }
            JobStatus::Running if record.execution_handle.as_deref() == Some(execution_handle) => {
                Ok(record)
            }
            status => Err(LedgerError::Conflict {
                job_id: *job_id,
                status,
            }),
        }
    }

    /// Terminal success write. Idempotent for byte-identical mappings;
    /// conflicting content on a terminal record is rejected.
    pub fn mark_completed(&self, job_id: &Uuid, mappings: Vec<Candidate>) -> Result<JobRecord> {
        let _guard = self.write_lock.lock().expect("job store lock poisoned");
        let mut record = self.load(job_id)?;

        match &record.status {
            JobStatus::Pending | JobStatus::Running => {
                self.move_status_index(&record, JobStatus::Completed)?;
                record.status = JobStatus::Completed;
                record.outcome = Some(JobOutcome::Completed { mappings });
                record.terminal_at = Some(Utc::now());
                self.persist_record(&mut record)?;
                debug!(job_id = %job_id, "Job completed");
                Ok(record)
            }
            JobStatus::Completed => {
                let same = match &record.outcome {
                    Some(JobOutcome::Completed { mappings: existing }) => {
                        serde_json::to_vec(existing)? == serde_json::to_vec(&mappings)?
                    }
                    _ => false,
                };
                if same {
                    Ok(record)
                } else {
                    Err(LedgerError::Conflict {
                        job_id: *job_id,
                        status: record.status,
                    })
                }
            }
            JobStatus::Failed => Err(LedgerError::Conflict {
                job_id: *job_id,
                status: record.status,
            }),
        }
    }

    /// Terminal failure write. A late failure never overwrites an existing
    /// COMPLETED result; repeating an identical failure is a no-op.
    pub fn mark_failed(&self, job_id: &Uuid, error_message: &str) -> Result<JobRecord> {
        let _guard = self.write_lock.lock().expect("job store lock poisoned");
        let mut record = self.load(job_id)?;

        match &record.status {
            JobStatus::Pending | JobStatus::Running => {
                self.move_status_index(&record, JobStatus::Failed)?;
                record.status = JobStatus::Failed;
                record.outcome = Some(JobOutcome::Failed {
                    error_message: error_message.to_string(),
                });
                record.terminal_at = Some(Utc::now());
                self.persist_record(&mut record)?;
                debug!(job_id = %job_id, error_message, "Job failed");
                Ok(record)
            }
            JobStatus::Completed => Ok(record),
            JobStatus::Failed => {
                let same = matches!(
                    &record.outcome,
                    Some(JobOutcome::Failed { error_message: existing })
                        if existing == error_message
                );
                if same {
                    Ok(record)
                } else {
                    Err(LedgerError::Conflict {
                        job_id: *job_id,
                        status: record.status,
                    })
                }
            }
        }
    }

    /// Job ids currently in `status`, for operational introspection and the
    /// pending-job sweeper.
    pub fn list_by_status(&self, status: JobStatus) -> Result<Vec<Uuid>> {
        let prefix = encode_status_index_prefix(status.index_tag());
        let mut ids = Vec::new();
        for item in self.index.prefix(prefix) {
            let (key, _) = item?;
            if let Some(id) = decode_index_job_id(&key) {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    /// Job ids ever submitted for `source`.
    pub fn list_by_source(&self, source: &ControlKey) -> Result<Vec<Uuid>> {
        let prefix = encode_source_index_prefix(source);
        let mut ids = Vec::new();
        for item in self.index.prefix(prefix) {
            let (key, _) = item?;
            if let Some(id) = decode_index_job_id(&key) {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    /// Delete expired records and their index entries. Returns the number
    /// of jobs pruned.
    pub(super) fn prune_expired(&self, now_epoch: i64) -> Result<usize> {
        let _guard = self.write_lock.lock().expect("job store lock poisoned");
        let mut pruned = 0;

        let mut expired = Vec::new();
        for item in self.jobs.iter() {
            let (key, value) = item?;
            let record: JobRecord = serde_json::from_slice(&value)?;
            if record.expires_at < now_epoch {
                expired.push((key, record));
            }
        }

        for (key, record) in expired {
            self.jobs.remove(key)?;
            self.index
                .remove(encode_status_index_key(record.status.index_tag(), &record.job_id))?;
            self.index
                .remove(encode_source_index_key(&record.source_control_key, &record.job_id))?;
            pruned += 1;
        }

        Ok(pruned)
    }

    fn load(&self, job_id: &Uuid) -> Result<JobRecord> {
        self.get(job_id)?.ok_or(LedgerError::JobNotFound(*job_id))
    }

    fn move_status_index(&self, record: &JobRecord, next: JobStatus) -> Result<()> {
        self.index
            .remove(encode_status_index_key(record.status.index_tag(), &record.job_id))?;
        self.index
            .insert(encode_status_index_key(next.index_tag(), &record.job_id), "")?;
        Ok(())
    }

    fn persist_record(&self, record: &mut JobRecord) -> Result<()> {
        // updated_at is monotone non-decreasing even under clock skew
        record.updated_at = Utc::now().max(record.updated_at);
        self.jobs
            .insert(encode_job_key(&record.job_id), serde_json::to_vec(record)?)?;
        Ok(())
    }
}
