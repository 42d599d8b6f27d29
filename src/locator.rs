//! Backup presence lookup
//!
//! A backup is stored as a folder directly under the location prefix. The
//! locator lists that level with a `/` delimiter and matches the logical
//! folder names, so the cost is one listing of folder names rather than one of
//! every object.

use futures::TryStreamExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::config::BackupLocation;
use crate::errors::{InventoryError, Result};
use crate::metrics;
use crate::scanner::{BucketScanner, DELIMITER};
use crate::storage::{ListRequest, ObjectStoreBackend};

pub struct BackupLocator {
    backend: Arc<dyn ObjectStoreBackend>,
    cancel: CancellationToken,
}

impl BackupLocator {
    pub fn new(backend: Arc<dyn ObjectStoreBackend>) -> Self {
        Self {
            backend,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether a backup folder whose name contains `backup_name` exists.
    ///
    /// Matching is by substring: `mybackup` finds `mybackup-20210101`, and
    /// `backup1` also finds `backup10`. The listing stops at the first match.
    pub async fn exists(&self, location: &BackupLocation, backup_name: &str) -> Result<bool> {
        let timer = metrics::OPERATION_DURATION
            .with_label_values(&["exists"])
            .start_timer();
        let result = self.find(location, backup_name).await;
        timer.observe_duration();
        metrics::record_operation("exists", &result);
        result
    }

    async fn find(&self, location: &BackupLocation, backup_name: &str) -> Result<bool> {
        if backup_name.is_empty() {
            return Err(InventoryError::Config(
                "backup name must not be empty".to_string(),
            ));
        }

        self.backend.prepare_bucket(&location.bucket).await?;

        let folder_prefix = folder_prefix(&location.effective_prefix());
        let request = ListRequest::delimited(&location.bucket, folder_prefix.clone(), DELIMITER);
        let scanner =
            BucketScanner::new(self.backend.as_ref()).with_cancellation(self.cancel.clone());
        let mut entries = scanner.scan(&request);

        while let Some(entry) = entries.try_next().await? {
            if !entry.is_prefix {
                trace!(key = %entry.key, "Skipping object outside a backup folder");
                continue;
            }

            let name = logical_name(&entry.key, &folder_prefix);
            debug!(folder = name, "Inspecting backup folder");
            if name.contains(backup_name) {
                info!(
                    backup = backup_name,
                    folder = name,
                    bucket = %location.bucket,
                    prefix = %folder_prefix,
                    "Backup found"
                );
                return Ok(true);
            }
        }

        info!(
            backup = backup_name,
            bucket = %location.bucket,
            prefix = %folder_prefix,
            "Backup not found"
        );
        Ok(false)
    }
}

/// Listing prefix for the folders under `prefix`; the root stays empty.
fn folder_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}/", trimmed)
    }
}

/// Folder name of a common prefix, without the listing prefix and trailing `/`
pub fn logical_name<'k>(key: &'k str, folder_prefix: &str) -> &'k str {
    key.strip_prefix(folder_prefix)
        .unwrap_or(key)
        .trim_end_matches('/')
}
