//! Materializers
//!
//! An [`Artifact`] is the in-memory form of a registry object. A
//! [`Materializer`] turns it into a payload directory for push and back into
//! an artifact after pull. The class of an object selects the materializer
//! through the registry settings map; the id actually used is recorded in
//! the object's metadata so loads keep working after the map changes.

pub mod builtin;

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use serde_json::Value;

use crate::registry::{RegistryError, RegistryResult};

pub use builtin::{BytesMaterializer, FilesMaterializer, JsonMaterializer, TextMaterializer};

/// In-memory registry object
#[derive(Debug, Clone, PartialEq)]
pub enum Artifact {
    /// Opaque binary blob
    Bytes(Vec<u8>),
    /// UTF-8 text
    Text(String),
    /// JSON document
    Json(Value),
    /// Set of files keyed by relative path
    Files(BTreeMap<String, Vec<u8>>),
}

impl Artifact {
    /// Class tag recorded in metadata
    pub fn class(&self) -> &'static str {
        match self {
            Artifact::Bytes(_) => "bytes",
            Artifact::Text(_) => "text",
            Artifact::Json(_) => "json",
            Artifact::Files(_) => "files",
        }
    }
}

impl From<Vec<u8>> for Artifact {
    fn from(data: Vec<u8>) -> Self {
        Artifact::Bytes(data)
    }
}

impl From<String> for Artifact {
    fn from(text: String) -> Self {
        Artifact::Text(text)
    }
}

impl From<&str> for Artifact {
    fn from(text: &str) -> Self {
        Artifact::Text(text.to_string())
    }
}

impl From<Value> for Artifact {
    fn from(value: Value) -> Self {
        Artifact::Json(value)
    }
}

/// Serialization strategy between artifacts and payload directories
pub trait Materializer: Send + Sync {
    /// Identifier stored in metadata, e.g. `builtin:json`
    fn id(&self) -> &str;

    /// Write `artifact` into the empty directory `dir`
    fn materialize(&self, artifact: &Artifact, dir: &Path) -> anyhow::Result<()>;

    /// Rebuild the artifact from a pulled payload
    fn load(&self, dir: &Path, files: &[String]) -> anyhow::Result<Artifact>;
}

/// Class to materializer id for the built-in classes
pub fn default_materializers() -> BTreeMap<String, String> {
    [
        ("bytes", builtin::BYTES_ID),
        ("text", builtin::TEXT_ID),
        ("json", builtin::JSON_ID),
        ("files", builtin::FILES_ID),
    ]
    .into_iter()
    .map(|(class, id)| (class.to_string(), id.to_string()))
    .collect()
}

/// Materializer implementations available to a registry, by id
#[derive(Clone)]
pub struct MaterializerSet {
    by_id: HashMap<String, Arc<dyn Materializer>>,
}

impl MaterializerSet {
    /// Empty set
    pub fn empty() -> Self {
        Self {
            by_id: HashMap::new(),
        }
    }

    /// Set holding the four built-ins
    pub fn builtin() -> Self {
        let mut set = Self::empty();
        set.register(Arc::new(BytesMaterializer));
        set.register(Arc::new(TextMaterializer));
        set.register(Arc::new(JsonMaterializer));
        set.register(Arc::new(FilesMaterializer));
        set
    }

    /// Add or replace an implementation
    pub fn register(&mut self, materializer: Arc<dyn Materializer>) {
        self.by_id.insert(materializer.id().to_string(), materializer);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn get(&self, id: &str) -> RegistryResult<Arc<dyn Materializer>> {
        self.by_id
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::Materializer {
                id: id.to_string(),
                source: anyhow::anyhow!("no implementation registered"),
            })
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.by_id.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl Default for MaterializerSet {
    fn default() -> Self {
        Self::builtin()
    }
}

impl std::fmt::Debug for MaterializerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaterializerSet")
            .field("ids", &self.ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_class_tags() {
        assert_eq!(Artifact::from(vec![1u8]).class(), "bytes");
        assert_eq!(Artifact::from("hi").class(), "text");
        assert_eq!(Artifact::from(json!({"a": 1})).class(), "json");
        assert_eq!(Artifact::Files(BTreeMap::new()).class(), "files");
    }

    #[test]
    fn test_defaults_resolve_in_builtin_set() {
        let set = MaterializerSet::builtin();
        for id in default_materializers().values() {
            assert!(set.contains(id), "missing {}", id);
        }
        assert!(matches!(
            set.get("custom:missing"),
            Err(RegistryError::Materializer { .. })
        ));
    }
}
