//! Local projection of the framework/control catalog.
//!
//! The CRUD surface for frameworks and controls lives outside this service;
//! the pipeline only needs existence checks, description lookups, and
//! per-framework listings, which this store answers from fjall. Records are
//! loaded via the `seed` operator command.

use chrono::{DateTime, Utc};
use fjall::PartitionHandle;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::keys::{ControlKey, FrameworkKey};

use super::error::Result;
use super::partitions::{
    encode_control_key, encode_controls_prefix, encode_framework_key, FRAMEWORK_PREFIX,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameworkRecord {
    pub key: FrameworkKey,
    pub title: Option<String>,
    pub actor: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlRecord {
    pub key: ControlKey,
    pub title: String,
    pub description: String,
    pub actor: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct Catalog {
    partition: PartitionHandle,
}

impl Catalog {
    pub(super) fn new(partition: PartitionHandle) -> Self {
        Self { partition }
    }

    pub fn put_framework(&self, record: &FrameworkRecord) -> Result<()> {
        self.partition
            .insert(encode_framework_key(&record.key), serde_json::to_vec(record)?)?;
        debug!(framework = %record.key, "Framework upserted");
        Ok(())
    }

    pub fn get_framework(&self, key: &FrameworkKey) -> Result<Option<FrameworkRecord>> {
        match self.partition.get(encode_framework_key(key))? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    pub fn framework_exists(&self, key: &FrameworkKey) -> Result<bool> {
        Ok(self.partition.get(encode_framework_key(key))?.is_some())
    }

    pub fn put_control(&self, record: &ControlRecord) -> Result<()> {
        self.partition
            .insert(encode_control_key(&record.key), serde_json::to_vec(record)?)?;
        debug!(control = %record.key, "Control upserted");
        Ok(())
    }

    pub fn get_control(&self, key: &ControlKey) -> Result<Option<ControlRecord>> {
        match self.partition.get(encode_control_key(key))? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    /// All controls of one framework, in key order.
    pub fn list_controls(&self, framework: &FrameworkKey) -> Result<Vec<ControlRecord>> {
        let mut controls = Vec::new();
        for item in self.partition.prefix(encode_controls_prefix(framework)) {
            let (_, value) = item?;
            controls.push(serde_json::from_slice(&value)?);
        }
        Ok(controls)
    }

    /// Control keys of one framework as strings, for suggestion ranking.
    pub fn list_control_keys(&self, framework: &FrameworkKey) -> Result<Vec<String>> {
        Ok(self
            .list_controls(framework)?
            .into_iter()
            .map(|c| c.key.to_string())
            .collect())
    }

    /// All known framework keys as strings, for suggestion ranking.
    pub fn list_framework_keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for item in self.partition.prefix(FRAMEWORK_PREFIX) {
            let (_, value) = item?;
            let record: FrameworkRecord = serde_json::from_slice(&value)?;
            keys.push(record.key.to_string());
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::Ledger;
    use tempfile::TempDir;

    fn open_catalog() -> (Catalog, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let ledger = Ledger::open(temp_dir.path().join("ledger")).unwrap();
        (ledger.catalog().clone(), temp_dir)
    }

    fn framework(key: &str) -> FrameworkRecord {
        FrameworkRecord {
            key: key.parse().unwrap(),
            title: None,
            actor: Some("ops".to_string()),
            created_at: Utc::now(),
        }
    }

    fn control(key: &str, description: &str) -> ControlRecord {
        ControlRecord {
            key: key.parse().unwrap(),
            title: key.rsplit('#').next().unwrap().to_string(),
            description: description.to_string(),
            actor: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn framework_round_trip() {
        let (catalog, _temp) = open_catalog();
        let record = framework("NIST-SP-800-53#R5");
        catalog.put_framework(&record).unwrap();

        assert!(catalog.framework_exists(&record.key).unwrap());
        let got = catalog.get_framework(&record.key).unwrap().unwrap();
        assert_eq!(got.actor.as_deref(), Some("ops"));
        assert!(!catalog.framework_exists(&"SOC2#2017".parse().unwrap()).unwrap());
    }

    #[test]
    fn list_controls_scopes_to_framework() {
        let (catalog, _temp) = open_catalog();
        catalog.put_control(&control("NIST#R5#AC-1", "access control policy")).unwrap();
        catalog.put_control(&control("NIST#R5#AC-2", "account management")).unwrap();
        catalog.put_control(&control("SOC2#2017#CC1.1", "control environment")).unwrap();

        let nist: FrameworkKey = "NIST#R5".parse().unwrap();
        let listed = catalog.list_controls(&nist).unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|c| c.key.framework() == &nist));

        let keys = catalog.list_control_keys(&nist).unwrap();
        assert_eq!(keys, vec!["NIST#R5#AC-1", "NIST#R5#AC-2"]);
    }

    #[test]
    fn list_framework_keys_sees_all() {
        let (catalog, _temp) = open_catalog();
        catalog.put_framework(&framework("NIST#R5")).unwrap();
        catalog.put_framework(&framework("SOC2#2017")).unwrap();

        let mut keys = catalog.list_framework_keys().unwrap();
        keys.sort();
        assert_eq!(keys, vec!["NIST#R5", "SOC2#2017"]);
    }
}
