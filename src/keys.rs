//! Composite key canonicalization for frameworks, controls, and mappings.
//!
//! All composite keys use `#` as the field separator and never embed `#`
//! inside a field:
//!
//! - framework key: `<frameworkName>#<version>`
//! - control key:   `<frameworkName>#<version>#<controlId>`
//! - mapping key:   the two control keys of the pair, sorted, joined with `|`
//!
//! Framework name and version are restricted to `[A-Za-z0-9._-]`. Control ids
//! accept any non-empty UTF-8 except `#`, `|`, and newline (`|` is reserved
//! as the mapping-key separator).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("malformed key: {0}")]
    Malformed(String),
}

fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-'
}

fn validate_field(field: &str, what: &str) -> Result<(), KeyError> {
    if field.is_empty() {
        return Err(KeyError::Malformed(format!("{what} must not be empty")));
    }
    if let Some(bad) = field.chars().find(|c| !is_key_char(*c)) {
        return Err(KeyError::Malformed(format!(
            "{what} contains invalid character {bad:?}"
        )));
    }
    Ok(())
}

fn validate_control_id(id: &str) -> Result<(), KeyError> {
    if id.is_empty() {
        return Err(KeyError::Malformed("control id must not be empty".into()));
    }
    if let Some(bad) = id.chars().find(|c| matches!(c, '#' | '|' | '\n')) {
        return Err(KeyError::Malformed(format!(
            "control id contains reserved character {bad:?}"
        )));
    }
    Ok(())
}

/// Canonical `<frameworkName>#<version>` key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FrameworkKey {
    name: String,
    version: String,
}

impl FrameworkKey {
    pub fn new(name: &str, version: &str) -> Result<Self, KeyError> {
        validate_field(name, "framework name")?;
        validate_field(version, "framework version")?;
        Ok(Self {
            name: name.to_string(),
            version: version.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }
}

impl FromStr for FrameworkKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('#');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(name), Some(version), None) => FrameworkKey::new(name, version),
            _ => Err(KeyError::Malformed(format!(
                "expected <framework>#<version>, got {s:?}"
            ))),
        }
    }
}

impl fmt::Display for FrameworkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.version)
    }
}

impl TryFrom<String> for FrameworkKey {
    type Error = KeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FrameworkKey> for String {
    fn from(key: FrameworkKey) -> Self {
        key.to_string()
    }
}

/// Canonical `<frameworkName>#<version>#<controlId>` key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ControlKey {
    framework: FrameworkKey,
    control_id: String,
}

impl ControlKey {
    pub fn new(framework: FrameworkKey, control_id: &str) -> Result<Self, KeyError> {
        validate_control_id(control_id)?;
        Ok(Self {
            framework,
            control_id: control_id.to_string(),
        })
    }

    pub fn framework(&self) -> &FrameworkKey {
        &self.framework
    }

    pub fn control_id(&self) -> &str {
        &self.control_id
    }
}

impl FromStr for ControlKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, '#');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(name), Some(version), Some(control_id)) => {
                let framework = FrameworkKey::new(name, version)?;
                ControlKey::new(framework, control_id)
            }
            _ => Err(KeyError::Malformed(format!(
                "expected <framework>#<version>#<controlId>, got {s:?}"
            ))),
        }
    }
}

impl fmt::Display for ControlKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.framework, self.control_id)
    }
}

impl TryFrom<String> for ControlKey {
    type Error = KeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ControlKey> for String {
    fn from(key: ControlKey) -> Self {
        key.to_string()
    }
}

/// Canonical key for an unordered control pair.
///
/// The two keys are sorted lexicographically before joining, so the same
/// pair always yields the same mapping key regardless of argument order.
pub fn build_mapping_key(a: &ControlKey, b: &ControlKey) -> String {
    let (first, second) = if a <= b { (a, b) } else { (b, a) };
    format!("{first}|{second}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_framework_key() {
        let key: FrameworkKey = "NIST-SP-800-53#R5".parse().unwrap();
        assert_eq!(key.name(), "NIST-SP-800-53");
        assert_eq!(key.version(), "R5");
        assert_eq!(key.to_string(), "NIST-SP-800-53#R5");
    }

    #[test]
    fn rejects_malformed_framework_keys() {
        for bad in ["", "NIST", "NIST#R5#extra", "#R5", "NIST#", "NI ST#R5", "NIST#R|5"] {
            assert!(bad.parse::<FrameworkKey>().is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn control_key_round_trips_through_build() {
        let framework: FrameworkKey = "AWS.EC2#1.0".parse().unwrap();
        let key = ControlKey::new(framework.clone(), "PR.1").unwrap();
        let parsed: ControlKey = key.to_string().parse().unwrap();
        assert_eq!(parsed.framework(), &framework);
        assert_eq!(parsed.control_id(), "PR.1");
    }

    #[test]
    fn control_id_accepts_wide_charset() {
        let key: ControlKey = "AWS.EC2#1.0#PR 1 (a)/é".parse().unwrap();
        assert_eq!(key.control_id(), "PR 1 (a)/é");
    }

    #[test]
    fn control_id_rejects_reserved_characters() {
        for bad in ["AWS#1.0#", "AWS#1.0#a|b", "AWS#1.0#a\nb"] {
            assert!(bad.parse::<ControlKey>().is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn mapping_key_is_commutative() {
        let a: ControlKey = "AWS.EC2#1.0#PR.1".parse().unwrap();
        let b: ControlKey = "NIST-SP-800-53#R5#AC-2".parse().unwrap();
        assert_eq!(build_mapping_key(&a, &b), build_mapping_key(&b, &a));
        assert_eq!(
            build_mapping_key(&a, &b),
            "AWS.EC2#1.0#PR.1|NIST-SP-800-53#R5#AC-2"
        );
    }

    #[test]
    fn serde_uses_string_form() {
        let key: ControlKey = "AWS.EC2#1.0#PR.1".parse().unwrap();
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"AWS.EC2#1.0#PR.1\"");
        let back: ControlKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
        assert!(serde_json::from_str::<ControlKey>("\"nope\"").is_err());
    }
}
