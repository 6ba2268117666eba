//! Key layout and encoding utilities for ledger partitions
//!
//! Partition structure:
//! - `jobs`:       job:{job_id} -> JobRecord (JSON)
//! - `job_index`:  status:{STATUS}|{job_id} and source:{controlKey}|{job_id} -> ()
//! - `catalog`:    fw:{frameworkKey} -> FrameworkRecord, ctl:{controlKey} -> ControlRecord
//! - `enrichment`: enr:{controlKey} -> EnrichmentEntry (JSON)
//! - `embeddings`: emb:{modelVersion}|{controlKey} -> EmbeddingEntry (JSON)
//!
//! `|` is safe as an index separator: control ids reject it, and model
//! versions are validated against it at config load.

use uuid::Uuid;

use crate::keys::{ControlKey, FrameworkKey};

pub fn encode_job_key(job_id: &Uuid) -> Vec<u8> {
    format!("job:{job_id}").into_bytes()
}

pub fn encode_status_index_key(status: &str, job_id: &Uuid) -> Vec<u8> {
    format!("status:{status}|{job_id}").into_bytes()
}

pub fn encode_status_index_prefix(status: &str) -> Vec<u8> {
    format!("status:{status}|").into_bytes()
}

pub fn encode_source_index_key(source: &ControlKey, job_id: &Uuid) -> Vec<u8> {
    format!("source:{source}|{job_id}").into_bytes()
}

pub fn encode_source_index_prefix(source: &ControlKey) -> Vec<u8> {
    format!("source:{source}|").into_bytes()
}

/// Extract the job id from an index key (the segment after the last `|`).
pub fn decode_index_job_id(key: &[u8]) -> Option<Uuid> {
    let key = std::str::from_utf8(key).ok()?;
    let (_, id) = key.rsplit_once('|')?;
    id.parse().ok()
}

pub fn encode_framework_key(key: &FrameworkKey) -> Vec<u8> {
    format!("fw:{key}").into_bytes()
}

pub const FRAMEWORK_PREFIX: &[u8] = b"fw:";

pub fn encode_control_key(key: &ControlKey) -> Vec<u8> {
    format!("ctl:{key}").into_bytes()
}

/// Prefix scanning all controls of one framework. The trailing `#` is the
/// separator in front of the control id, so `AWS#1.0` never matches
/// `AWS#1.0.1`.
pub fn encode_controls_prefix(framework: &FrameworkKey) -> Vec<u8> {
    format!("ctl:{framework}#").into_bytes()
}

pub fn encode_enrichment_key(key: &ControlKey) -> Vec<u8> {
    format!("enr:{key}").into_bytes()
}

pub fn encode_embedding_key(model_version: &str, key: &ControlKey) -> Vec<u8> {
    format!("emb:{model_version}|{key}").into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_key_encoding() {
        let id = Uuid::nil();
        assert_eq!(
            encode_job_key(&id),
            b"job:00000000-0000-0000-0000-000000000000"
        );
    }

    #[test]
    fn index_keys_round_trip_job_id() {
        let id = Uuid::new_v4();
        let source: ControlKey = "AWS.EC2#1.0#PR.1".parse().unwrap();

        let status_key = encode_status_index_key("PENDING", &id);
        assert!(status_key.starts_with(&encode_status_index_prefix("PENDING")));
        assert_eq!(decode_index_job_id(&status_key), Some(id));

        let source_key = encode_source_index_key(&source, &id);
        assert!(source_key.starts_with(&encode_source_index_prefix(&source)));
        assert_eq!(decode_index_job_id(&source_key), Some(id));
    }

    #[test]
    fn controls_prefix_does_not_match_longer_versions() {
        let fw: FrameworkKey = "AWS#1.0".parse().unwrap();
        let fw_longer: FrameworkKey = "AWS#1.0.1".parse().unwrap();
        let ctl: ControlKey = "AWS#1.0.1#PR.1".parse().unwrap();

        let key = encode_control_key(&ctl);
        assert!(key.starts_with(&encode_controls_prefix(&fw_longer)));
        assert!(!key.starts_with(&encode_controls_prefix(&fw)));
    }

    #[test]
    fn embedding_key_separates_model_versions() {
        let ctl: ControlKey = "AWS#1.0#PR.1".parse().unwrap();
        assert_ne!(
            encode_embedding_key("v1", &ctl),
            encode_embedding_key("v2", &ctl)
        );
    }
}
