//! Metadata documents
//!
//! Per-object metadata is published as JSON next to the payload; the
//! registry-wide settings live in a single document at the store root.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::materializer::default_materializers;

/// Physical location of one committed payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageRecord {
    /// Fresh identifier generated for every write
    pub uuid: String,
    /// Commit time of the payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Metadata published for one `(name, version)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    /// Object class tag
    pub class: String,
    /// Materializer used to write the payload
    pub materializer: String,
    /// Content hash of the payload
    #[serde(default)]
    pub hash: String,
    /// Payload files, relative to the storage record
    #[serde(rename = "_files", default)]
    pub files: Vec<String>,
    /// Storage record the metadata points at
    #[serde(rename = "_storage", default)]
    pub storage: StorageRecord,
    /// Caller-supplied fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ObjectMetadata {
    /// Draft metadata; push fills in hash, manifest and storage record
    pub fn new(class: impl Into<String>, materializer: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            materializer: materializer.into(),
            hash: String::new(),
            files: Vec::new(),
            storage: StorageRecord::default(),
            extra: Map::new(),
        }
    }

    /// Attach a caller-defined field
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
    }

    pub fn from_json(data: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(data)
    }
}

/// Registry-wide settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySettings {
    /// Whether existing versions may be overwritten
    #[serde(default)]
    pub mutable: bool,
    /// Whether saves without an explicit version create new versions
    #[serde(default = "default_true")]
    pub versioned: bool,
    /// Object class to materializer id
    #[serde(default = "default_materializers")]
    pub materializers: BTreeMap<String, String>,
}

fn default_true() -> bool {
    true
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            mutable: false,
            versioned: true,
            materializers: default_materializers(),
        }
    }
}

impl RegistrySettings {
    pub fn new(mutable: bool, versioned: bool) -> Self {
        Self {
            mutable,
            versioned,
            ..Self::default()
        }
    }

    /// Decode settings, filling in any built-in materializers missing from storage
    pub fn from_json(data: &[u8]) -> serde_json::Result<Self> {
        let mut settings: Self = serde_json::from_slice(data)?;
        for (class, id) in default_materializers() {
            settings.materializers.entry(class).or_insert(id);
        }
        Ok(settings)
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_wire_names() {
        let mut meta = ObjectMetadata::new("files", "builtin:files").with_field("owner", "ml-team");
        meta.hash = "abc".to_string();
        meta.files = vec!["w.bin".to_string()];
        meta.storage.uuid = "u-1".to_string();

        let value: Value = serde_json::from_slice(&meta.to_json().unwrap()).unwrap();
        assert_eq!(value["_files"][0], "w.bin");
        assert_eq!(value["_storage"]["uuid"], "u-1");
        assert_eq!(value["owner"], "ml-team");

        let back = ObjectMetadata::from_json(&meta.to_json().unwrap()).unwrap();
        assert_eq!(back, meta);
    }

    #[test]
    fn test_settings_always_carry_default_materializers() {
        let settings = RegistrySettings::from_json(br#"{"mutable": true}"#).unwrap();
        assert!(settings.mutable);
        assert!(settings.versioned);
        assert_eq!(settings.materializers, default_materializers());

        let custom = RegistrySettings::from_json(
            br#"{"materializers": {"json": "custom:gzip-json"}}"#,
        )
        .unwrap();
        assert_eq!(custom.materializers["json"], "custom:gzip-json");
        assert_eq!(custom.materializers["bytes"], "builtin:bytes");
    }
}
