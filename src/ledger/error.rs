use thiserror::Error;
use uuid::Uuid;

use super::jobs::JobStatus;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Fjall error: {0}")]
    Fjall(#[from] fjall::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Job already exists: {0}")]
    DuplicateJob(Uuid),

    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    #[error("Conflicting write for job {job_id} (current status {status:?})")]
    Conflict { job_id: Uuid, status: JobStatus },
}

pub type Result<T> = std::result::Result<T, LedgerError>;
