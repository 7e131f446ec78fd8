//! Configuration
//!
//! Connection and behavior settings read from `REGISTRY_*` environment
//! variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::registry::BackendOptions;
use crate::transport::s3::S3Settings;
use crate::transport::sigv4::Credentials;

const DEFAULT_REGION: &str = "us-east-1";
const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 30;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value {value:?} for {name}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Settings for one registry session
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    pub region: String,
    pub secure: bool,
    pub prefix: String,
    /// Explicit cache root; derived from the remote identity when unset
    pub cache_dir: Option<PathBuf>,
    pub lock_timeout: Duration,
    pub mutable: bool,
    pub versioned: bool,
    /// Whether the store honors `If-None-Match: *`
    pub conditional_writes: bool,
}

impl RegistryConfig {
    /// Read configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Read configuration through `lookup`
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let required = |name: &'static str| get(name).ok_or(ConfigError::Missing(name));

        let lock_timeout = match get("REGISTRY_LOCK_TIMEOUT_SECS") {
            Some(value) => value.trim().parse::<u64>().map_err(|e| ConfigError::Invalid {
                name: "REGISTRY_LOCK_TIMEOUT_SECS",
                value: value.clone(),
                reason: e.to_string(),
            })?,
            None => DEFAULT_LOCK_TIMEOUT_SECS,
        };

        Ok(Self {
            endpoint: required("REGISTRY_ENDPOINT")?,
            access_key: required("REGISTRY_ACCESS_KEY")?,
            secret_key: required("REGISTRY_SECRET_KEY")?,
            bucket: required("REGISTRY_BUCKET")?,
            region: get("REGISTRY_REGION").unwrap_or_else(|| DEFAULT_REGION.to_string()),
            secure: parse_flag("REGISTRY_SECURE", get("REGISTRY_SECURE"), true)?,
            prefix: get("REGISTRY_PREFIX").unwrap_or_default(),
            cache_dir: get("REGISTRY_CACHE_DIR").map(PathBuf::from),
            lock_timeout: Duration::from_secs(lock_timeout),
            mutable: parse_flag("REGISTRY_MUTABLE", get("REGISTRY_MUTABLE"), false)?,
            versioned: parse_flag("REGISTRY_VERSIONED", get("REGISTRY_VERSIONED"), true)?,
            conditional_writes: parse_flag(
                "REGISTRY_CONDITIONAL_WRITES",
                get("REGISTRY_CONDITIONAL_WRITES"),
                true,
            )?,
        })
    }

    /// Connection settings for the S3 transport
    pub fn s3_settings(&self) -> S3Settings {
        S3Settings {
            endpoint: self.endpoint.clone(),
            bucket: self.bucket.clone(),
            prefix: self.prefix.clone(),
            secure: self.secure,
            credentials: Credentials {
                access_key: self.access_key.clone(),
                secret_key: self.secret_key.clone(),
                region: self.region.clone(),
            },
        }
    }

    /// Options for opening the remote backend
    pub fn backend_options(&self) -> BackendOptions {
        BackendOptions {
            mutable: self.mutable,
            versioned: self.versioned,
            lock_timeout: self.lock_timeout,
        }
    }
}

fn parse_flag(name: &'static str, value: Option<String>, default: bool) -> Result<bool, ConfigError> {
    let Some(value) = value else {
        return Ok(default);
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            name,
            value,
            reason: "expected true or false".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    const REQUIRED: [(&str, &str); 4] = [
        ("REGISTRY_ENDPOINT", "localhost:9000"),
        ("REGISTRY_ACCESS_KEY", "minio"),
        ("REGISTRY_SECRET_KEY", "minio123"),
        ("REGISTRY_BUCKET", "artifacts"),
    ];

    #[test]
    fn test_defaults() {
        let config = RegistryConfig::from_lookup(lookup(&REQUIRED)).unwrap();
        assert_eq!(config.region, "us-east-1");
        assert!(config.secure);
        assert!(!config.mutable);
        assert!(config.versioned);
        assert!(config.conditional_writes);
        assert_eq!(config.lock_timeout, Duration::from_secs(30));
        assert!(config.cache_dir.is_none());

        let s3 = config.s3_settings();
        assert_eq!(s3.bucket, "artifacts");
        assert_eq!(s3.credentials.access_key, "minio");
    }

    #[test]
    fn test_overrides() {
        let mut vars = REQUIRED.to_vec();
        vars.extend([
            ("REGISTRY_SECURE", "false"),
            ("REGISTRY_MUTABLE", "yes"),
            ("REGISTRY_LOCK_TIMEOUT_SECS", "5"),
            ("REGISTRY_CACHE_DIR", "/tmp/reg-cache"),
            ("REGISTRY_PREFIX", "team-a"),
        ]);
        let config = RegistryConfig::from_lookup(lookup(&vars)).unwrap();
        assert!(!config.secure);
        assert!(config.mutable);
        assert_eq!(config.lock_timeout, Duration::from_secs(5));
        assert_eq!(config.cache_dir, Some(PathBuf::from("/tmp/reg-cache")));
        assert_eq!(config.backend_options().lock_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_errors() {
        assert!(matches!(
            RegistryConfig::from_lookup(lookup(&REQUIRED[..3])),
            Err(ConfigError::Missing("REGISTRY_BUCKET"))
        ));

        let mut vars = REQUIRED.to_vec();
        vars.push(("REGISTRY_MUTABLE", "maybe"));
        assert!(matches!(
            RegistryConfig::from_lookup(lookup(&vars)),
            Err(ConfigError::Invalid { name: "REGISTRY_MUTABLE", .. })
        ));
    }
}
