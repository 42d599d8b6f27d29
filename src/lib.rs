//! backup-inventory - inventory and cleanup of backup objects in object storage
//!
//! Answers two questions about a named backup stored under a bucket and
//! prefix of a remote object store, and acts on the answer:
//! - does a backup folder whose name contains the identifier exist?
//! - delete every object of that backup
//!
//! Supported backends are AWS S3 (and S3-compatible stores such as MinIO),
//! Azure Blob Storage and Google Cloud Storage. The building blocks are
//! public for callers that need cancellation, sub-directories or polling:
//! [`storage::connect`], [`BackupLocator`], [`BackupPurger`],
//! [`BucketScanner`] and [`verify::wait_for_presence`].

pub mod config;
pub mod credentials;
pub mod errors;
pub mod locator;
pub mod metrics;
pub mod purger;
pub mod scanner;
pub mod storage;
pub mod verify;

use std::path::Path;

pub use config::{BackendKind, BackupLocation, LocationConfig, Settings};
pub use errors::{InventoryError, Result};
pub use locator::BackupLocator;
pub use purger::{full_prefix, BackupPurger, PurgeReport};
pub use scanner::BucketScanner;
pub use storage::{ObjectEntry, ObjectStoreBackend};

/// Whether a backup named like `backup_name` exists under `bucket`/`prefix`.
///
/// `config` is the flat `key=value,...` location configuration and
/// `credentials_file` the provider credential file, if any.
pub async fn is_objects_in_bucket(
    kind: BackendKind,
    credentials_file: Option<&Path>,
    bucket: &str,
    prefix: &str,
    config: &str,
    backup_name: &str,
) -> Result<bool> {
    let config = LocationConfig::parse(config)?;
    let backend = storage::connect(kind, credentials_file, &config).await?;
    BackupLocator::new(backend)
        .exists(&BackupLocation::new(bucket, prefix), backup_name)
        .await
}

/// Delete every object under `<prefix>/<backup_name>/` in `bucket`.
///
/// Succeeds without deleting anything when the backup has no objects.
pub async fn delete_objects_in_bucket(
    kind: BackendKind,
    credentials_file: Option<&Path>,
    bucket: &str,
    prefix: &str,
    config: &str,
    backup_name: &str,
) -> Result<()> {
    let config = LocationConfig::parse(config)?;
    let backend = storage::connect(kind, credentials_file, &config).await?;
    BackupPurger::new(backend)
        .purge(&BackupLocation::new(bucket, prefix), backup_name)
        .await?;
    Ok(())
}
