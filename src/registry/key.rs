//! Object keys and the storage key layout
//!
//! Names are colon-separated namespaces (`proj:model`). Underscores are
//! forbidden so that flattening `:` to `_` stays reversible.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::errors::{RegistryError, RegistryResult};

/// Version sentinel resolving to the most recently published version
pub const LATEST: &str = "latest";

/// Registry-wide settings object
pub const REGISTRY_METADATA_KEY: &str = "registry_metadata.json";

const META_PREFIX: &str = "_meta_";
const META_SUFFIX: &str = ".json";
const LOCK_PREFIX: &str = "_lock_";
const OBJECTS_PREFIX: &str = "objects";

/// `(name, version)` address of one object
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub name: String,
    pub version: String,
}

impl ObjectKey {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    /// Key addressing the latest version of `name`
    pub fn latest(name: impl Into<String>) -> Self {
        Self::new(name, LATEST)
    }

    /// Parse `name` or `name@version`
    pub fn parse(key: &str) -> RegistryResult<Self> {
        let (name, version) = match key.split_once('@') {
            Some((name, version)) => (name, version),
            None => (key, LATEST),
        };
        validate_name(name)?;
        validate_version(version)?;
        Ok(Self::new(name, version))
    }

    pub fn is_latest(&self) -> bool {
        self.version == LATEST
    }

    /// Lock identifier, `{name}@{version}`
    pub fn lock_id(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }

    /// Storage key of the per-object metadata document
    pub fn meta_key(&self) -> String {
        format!(
            "{}{}@{}{}",
            META_PREFIX,
            flatten_name(&self.name),
            self.version,
            META_SUFFIX
        )
    }

    /// Storage key of the advisory lock record
    pub fn lock_key(&self) -> String {
        format!("{}{}@{}", LOCK_PREFIX, flatten_name(&self.name), self.version)
    }

    /// Prefix holding every storage record of this key
    pub fn payload_prefix(&self) -> String {
        format!("{}/{}/{}/", OBJECTS_PREFIX, self.name, self.version)
    }

    /// Storage key of one payload file under storage record `uuid`
    pub fn payload_key(&self, uuid: &str, relative: &str) -> String {
        format!("{}{}/{}", self.payload_prefix(), uuid, relative)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// Check that `name` is a valid namespaced identifier
pub fn validate_name(name: &str) -> RegistryResult<()> {
    if name.is_empty() {
        return Err(RegistryError::InvalidArgument("object name is empty".to_string()));
    }
    if name.contains('_') {
        return Err(RegistryError::InvalidArgument(format!(
            "object name '{}' must not contain underscores; use ':' to separate namespaces",
            name
        )));
    }
    for segment in name.split(':') {
        if segment.is_empty() {
            return Err(RegistryError::InvalidArgument(format!(
                "object name '{}' has an empty namespace segment",
                name
            )));
        }
        if is_dot_segment(segment) {
            return Err(RegistryError::InvalidArgument(format!(
                "object name '{}' has a relative path segment '{}'",
                name, segment
            )));
        }
        if let Some(c) = segment
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '.'))
        {
            return Err(RegistryError::InvalidArgument(format!(
                "object name '{}' contains invalid character '{}'",
                name, c
            )));
        }
    }
    Ok(())
}

/// Check that `version` can be embedded in storage keys
pub fn validate_version(version: &str) -> RegistryResult<()> {
    if version.is_empty() {
        return Err(RegistryError::InvalidArgument("version is empty".to_string()));
    }
    if is_dot_segment(version) {
        return Err(RegistryError::InvalidArgument(format!(
            "version '{}' is a relative path segment",
            version
        )));
    }
    if let Some(c) = version
        .chars()
        .find(|c| matches!(c, '/' | '@' | ':') || c.is_whitespace())
    {
        return Err(RegistryError::InvalidArgument(format!(
            "version '{}' contains invalid character '{}'",
            version, c
        )));
    }
    Ok(())
}

/// `.` and `..` would address a parent or the current directory on disk
fn is_dot_segment(segment: &str) -> bool {
    segment == "." || segment == ".."
}

/// Filesystem-safe form of a name
pub fn flatten_name(name: &str) -> String {
    name.replace(':', "_")
}

/// Inverse of [`flatten_name`]
pub fn unflatten_name(flat: &str) -> String {
    flat.replace('_', ":")
}

/// Parse a metadata storage key back into its object key
pub fn parse_meta_key(key: &str) -> Option<ObjectKey> {
    let body = key.strip_prefix(META_PREFIX)?.strip_suffix(META_SUFFIX)?;
    let (flat, version) = body.rsplit_once('@')?;
    if flat.is_empty() || version.is_empty() {
        return None;
    }
    Some(ObjectKey::new(unflatten_name(flat), version))
}

/// Listing prefix for every metadata document
pub fn meta_prefix() -> &'static str {
    META_PREFIX
}

/// Listing prefix for every advisory lock record
pub fn lock_prefix() -> &'static str {
    LOCK_PREFIX
}

/// Listing prefix for the metadata documents of one name
pub fn meta_prefix_for(name: &str) -> String {
    format!("{}{}@", META_PREFIX, flatten_name(name))
}

/// Compare two versions component-wise
///
/// Components are split on `.`; two numeric components compare as numbers,
/// anything else compares as text. Numeric components sort before text.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let mut left = a.split('.');
    let mut right = b.split('.');
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                let ord = match (x.parse::<u64>(), y.parse::<u64>()) {
                    (Ok(x), Ok(y)) => x.cmp(&y),
                    (Ok(_), Err(_)) => Ordering::Less,
                    (Err(_), Ok(_)) => Ordering::Greater,
                    (Err(_), Err(_)) => x.cmp(y),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

/// Sort versions ascending
pub fn sort_versions(versions: &mut [String]) {
    versions.sort_by(|a, b| compare_versions(a, b));
}

/// Version following `current`: bump its last numeric component
pub fn next_version(current: Option<&str>) -> RegistryResult<String> {
    let Some(current) = current else {
        return Ok("1".to_string());
    };
    let mut parts: Vec<String> = current.split('.').map(str::to_string).collect();
    let last = parts.last_mut().and_then(|p| p.parse::<u64>().ok().map(|n| (p, n)));
    match last {
        Some((slot, n)) => {
            *slot = (n + 1).to_string();
            Ok(parts.join("."))
        }
        None => Err(RegistryError::InvalidArgument(format!(
            "cannot derive a version after '{}'; pass an explicit version",
            current
        ))),
    }
}
