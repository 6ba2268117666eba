//! Operator catalog ingestion from a JSON file.
//!
//! Framework and control CRUD lives outside this service; `crosswalk seed`
//! loads a catalog export so the pipeline has something to validate and map
//! against. Frameworks are inserted before controls, and every control must
//! belong to a known framework.

use std::path::Path;

use chrono::Utc;
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::keys::{ControlKey, FrameworkKey, KeyError};
use crate::ledger::{ControlRecord, FrameworkRecord, Ledger, LedgerError};

#[derive(Debug, Error)]
pub enum SeedError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid seed file: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Control {0} references unknown framework")]
    UnknownFramework(String),
}

#[derive(Debug, Deserialize)]
pub struct SeedFile {
    #[serde(default)]
    pub frameworks: Vec<SeedFramework>,
    #[serde(default)]
    pub controls: Vec<SeedControl>,
}

#[derive(Debug, Deserialize)]
pub struct SeedFramework {
    pub key: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub actor: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SeedControl {
    pub key: String,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub actor: Option<String>,
}

#[derive(Debug, Default)]
pub struct SeedStats {
    pub frameworks: usize,
    pub controls: usize,
}

pub fn seed_from_path(ledger: &Ledger, path: &Path) -> Result<SeedStats, SeedError> {
    let data = std::fs::read(path)?;
    let file: SeedFile = serde_json::from_slice(&data)?;
    seed(ledger, file)
}

pub fn seed(ledger: &Ledger, file: SeedFile) -> Result<SeedStats, SeedError> {
    let catalog = ledger.catalog();
    let mut stats = SeedStats::default();
    let now = Utc::now();

    for framework in file.frameworks {
        let key: FrameworkKey = framework.key.parse()?;
        catalog.put_framework(&FrameworkRecord {
            key,
            title: framework.title,
            actor: framework.actor,
            created_at: now,
        })?;
        stats.frameworks += 1;
    }

    for control in file.controls {
        let key: ControlKey = control.key.parse()?;
        if !catalog.framework_exists(key.framework())? {
            return Err(SeedError::UnknownFramework(control.key));
        }
        catalog.put_control(&ControlRecord {
            key,
            title: control.title,
            description: control.description,
            actor: control.actor,
            created_at: now,
        })?;
        stats.controls += 1;
    }

    info!(
        frameworks = stats.frameworks,
        controls = stats.controls,
        "Catalog seeded"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_ledger() -> (Ledger, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let ledger = Ledger::open(temp_dir.path().join("ledger")).unwrap();
        (ledger, temp_dir)
    }

    #[test]
    fn seeds_frameworks_and_controls() {
        let (ledger, _temp) = open_ledger();
        let file: SeedFile = serde_json::from_value(serde_json::json!({
            "frameworks": [
                {"key": "NIST-SP-800-53#R5", "title": "NIST SP 800-53"},
            ],
            "controls": [
                {"key": "NIST-SP-800-53#R5#AC-1", "title": "AC-1", "description": "Access control policy"},
                {"key": "NIST-SP-800-53#R5#AC-2", "title": "AC-2", "description": "Account management"},
            ]
        }))
        .unwrap();

        let stats = seed(&ledger, file).unwrap();
        assert_eq!(stats.frameworks, 1);
        assert_eq!(stats.controls, 2);

        let fw: FrameworkKey = "NIST-SP-800-53#R5".parse().unwrap();
        assert!(ledger.catalog().framework_exists(&fw).unwrap());
        assert_eq!(ledger.catalog().list_controls(&fw).unwrap().len(), 2);
    }

    #[test]
    fn rejects_control_without_framework() {
        let (ledger, _temp) = open_ledger();
        let file: SeedFile = serde_json::from_value(serde_json::json!({
            "controls": [
                {"key": "SOC2#2017#CC1.1", "title": "CC1.1", "description": "Control environment"},
            ]
        }))
        .unwrap();

        let err = seed(&ledger, file).unwrap_err();
        assert!(matches!(err, SeedError::UnknownFramework(_)));
    }

    #[test]
    fn rejects_malformed_keys() {
        let (ledger, _temp) = open_ledger();
        let file: SeedFile = serde_json::from_value(serde_json::json!({
            "frameworks": [{"key": "not-a-key"}]
        }))
        .unwrap();

        assert!(matches!(seed(&ledger, file).unwrap_err(), SeedError::Key(_)));
    }

    #[test]
    fn seed_from_file_round_trips() {
        let (ledger, temp) = open_ledger();
        let path = temp.path().join("catalog.json");
        std::fs::write(
            &path,
            serde_json::json!({
                "frameworks": [{"key": "PCI-DSS#4.0"}],
                "controls": [{"key": "PCI-DSS#4.0#1.1", "title": "1.1", "description": "Firewall standards"}]
            })
            .to_string(),
        )
        .unwrap();

        let stats = seed_from_path(&ledger, &path).unwrap();
        assert_eq!(stats.frameworks, 1);
        assert_eq!(stats.controls, 1);
    }
}
