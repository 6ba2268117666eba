//! API models for the mapping intake and status endpoints.
//!
//! Request bodies use snake_case fields; responses use camelCase, matching
//! the public contract:
//!
//! ```json
//! POST /mappings
//! {
//!   "control_key": "AWS.EC2#1.0#PR.1",
//!   "target_framework_key": "NIST-SP-800-53#R5",
//!   "target_control_ids": ["AC-1", "AC-2"]
//! }
//! ```
//!
//! A 202 response carries the mapping id and a status URL; polling that URL
//! returns the job projection until it reaches COMPLETED or FAILED.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::keys::{ControlKey, FrameworkKey};
use crate::ledger::{Candidate, JobOutcome, JobRecord, JobStatus};

#[derive(Debug, Clone, Deserialize)]
pub struct MappingRequest {
    pub control_key: String,
    pub target_framework_key: String,
    #[serde(default)]
    pub target_control_ids: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingAccepted {
    pub mapping_id: Uuid,
    pub status: String,
    pub status_url: String,
    pub control_key: String,
    pub target_framework_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingResultBody {
    pub mappings: Vec<Candidate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingErrorBody {
    pub message: String,
}

/// Client-facing projection of a job record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingStatus {
    pub mapping_id: Uuid,
    pub status: JobStatus,
    pub source_control_key: ControlKey,
    pub target_framework_key: FrameworkKey,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<MappingResultBody>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<MappingErrorBody>,
}

impl From<JobRecord> for MappingStatus {
    fn from(record: JobRecord) -> Self {
        let (result, error) = match record.outcome {
            Some(JobOutcome::Completed { mappings }) => {
                (Some(MappingResultBody { mappings }), None)
            }
            Some(JobOutcome::Failed { error_message }) => (
                None,
                Some(MappingErrorBody {
                    message: error_message,
                }),
            ),
            None => (None, None),
        };
        Self {
            mapping_id: record.job_id,
            status: record.status,
            source_control_key: record.source_control_key,
            target_framework_key: record.target_framework_key,
            created_at: record.created_at,
            updated_at: record.updated_at,
            terminal_at: record.terminal_at,
            result,
            error,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestions: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, Deserialize, Default)]
pub struct RedriveParams {
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub max_messages: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub components: std::collections::HashMap<String, String>,
    pub version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_projection_separates_result_and_error() {
        let mut record = JobRecord::new(
            Uuid::new_v4(),
            "AWS.EC2#1.0#PR.1".parse().unwrap(),
            "NIST#R5".parse().unwrap(),
            None,
            604_800,
        );
        record.status = JobStatus::Failed;
        record.outcome = Some(JobOutcome::Failed {
            error_message: "ScienceUnavailable".to_string(),
        });
        record.terminal_at = Some(Utc::now());

        let status = MappingStatus::from(record);
        assert!(status.result.is_none());
        assert_eq!(status.error.as_ref().unwrap().message, "ScienceUnavailable");

        let json = serde_json::to_value(MappingStatus {
            error: None,
            ..status
        })
        .unwrap();
        assert_eq!(json["status"], "FAILED");
        assert!(json.get("result").is_none());
        assert!(json["mappingId"].is_string());
    }
}
