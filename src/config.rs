//! Configuration management for backup inventory
//!
//! Three layers:
//! - [`BackendKind`]: which provider adapter to use
//! - [`LocationConfig`]: the flat `key=value,key=value` backend configuration
//!   string attached to a backup storage location
//! - [`Settings`]: optional TOML file consumed by the binary; command-line
//!   flags and `BACKUP_INVENTORY_*` environment variables take precedence

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::errors::{InventoryError, Result};

/// Object storage provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// AWS S3 and S3-compatible stores (MinIO)
    Aws,
    /// Azure Blob Storage
    Azure,
    /// Google Cloud Storage
    Gcp,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Aws => "aws",
            BackendKind::Azure => "azure",
            BackendKind::Gcp => "gcp",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = InventoryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "aws" | "s3" | "minio" => Ok(BackendKind::Aws),
            "azure" => Ok(BackendKind::Azure),
            "gcp" | "gcs" | "google" => Ok(BackendKind::Gcp),
            _ => Err(InventoryError::Config(format!("Unknown backend type: {}", s))),
        }
    }
}

/// Backend-specific key/value configuration of a storage location.
///
/// Parsed from a single flat string such as
/// `region=minio,s3ForcePathStyle=true,s3Url=http://minio:9000`.
/// Entries are separated by `,`; each entry is split on its first `=`.
/// Empty entries are skipped, so an empty string yields an empty map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocationConfig {
    entries: BTreeMap<String, String>,
}

impl LocationConfig {
    pub const REGION: &'static str = "region";
    pub const S3_URL: &'static str = "s3Url";
    pub const S3_FORCE_PATH_STYLE: &'static str = "s3ForcePathStyle";
    pub const STORAGE_ACCOUNT: &'static str = "storageAccount";
    pub const PROJECT: &'static str = "project";

    pub fn parse(raw: &str) -> Result<Self> {
        let mut entries = BTreeMap::new();
        for part in raw.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (key, value) = part.split_once('=').ok_or_else(|| {
                InventoryError::Config(format!("error parsing {:?}: expected key=value", part))
            })?;
            let key = key.trim();
            if key.is_empty() {
                return Err(InventoryError::Config(format!(
                    "error parsing {:?}: empty key",
                    part
                )));
            }
            entries.insert(key.to_string(), value.trim().to_string());
        }
        Ok(Self { entries })
    }

    /// Value for `key`, treating an empty value as absent.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Value for `key`, or a configuration error naming the backend.
    pub fn require(&self, key: &str, backend: BackendKind) -> Result<&str> {
        self.get(key).ok_or_else(|| {
            InventoryError::Config(format!(
                "{} backend requires `{}` in the location config",
                backend, key
            ))
        })
    }

    pub fn flag(&self, key: &str) -> bool {
        self.get(key)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Layer `other` on top of `self`; keys of `other` win.
    pub fn merge(mut self, other: LocationConfig) -> Self {
        self.entries.extend(other.entries);
        self
    }
}

impl FromStr for LocationConfig {
    type Err = InventoryError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Bucket and prefix a backup lives under.
///
/// With a `subdir`, backups live under `<prefix>/<subdir>/<name>/`, which is
/// the layout of backup locations that keep several object kinds side by side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupLocation {
    pub bucket: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub subdir: Option<String>,
}

impl BackupLocation {
    pub fn new(bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            prefix: prefix.into(),
            subdir: None,
        }
    }

    pub fn with_subdir(mut self, subdir: impl Into<String>) -> Self {
        self.subdir = Some(subdir.into());
        self
    }

    /// Prefix the backup folders sit directly under, without surrounding `/`.
    pub fn effective_prefix(&self) -> String {
        let base = self.prefix.trim_matches('/');
        match self.subdir.as_deref().map(|s| s.trim_matches('/')) {
            Some(sub) if !sub.is_empty() && !base.is_empty() => format!("{}/{}", base, sub),
            Some(sub) if !sub.is_empty() => sub.to_string(),
            _ => base.to_string(),
        }
    }
}

/// Settings file loaded by the binary
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Settings {
    #[serde(default)]
    pub provider: Option<BackendKind>,

    #[serde(default)]
    pub credentials_file: Option<PathBuf>,

    #[serde(default)]
    pub bucket: Option<String>,

    #[serde(default)]
    pub prefix: Option<String>,

    #[serde(default)]
    pub subdir: Option<String>,

    /// Location config, as a table of keys
    #[serde(default)]
    pub config: LocationConfig,

    /// Per-command deadline in seconds, 0 for none (default: 600)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    600
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            provider: None,
            credentials_file: None,
            bucket: None,
            prefix: None,
            subdir: None,
            config: LocationConfig::default(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Settings {
    /// Load settings from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| {
            InventoryError::Config(format!("invalid settings file {}: {}", path.display(), e))
        })
    }
}
