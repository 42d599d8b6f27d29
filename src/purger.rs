//! Backup deletion
//!
//! Removes every object of one backup, i.e. everything under
//! `<prefix>/<backup name>/`. Objects are listed recursively and deleted in
//! batches sized for the backend while the listing continues. Deletion is best
//! effort: a failed batch stops the purge and whatever was removed before it
//! stays removed.

use futures::TryStreamExt;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::BackupLocation;
use crate::errors::{InventoryError, Result};
use crate::metrics;
use crate::scanner::BucketScanner;
use crate::storage::{ListRequest, ObjectStoreBackend};

/// Prefix holding every object of `backup_name`.
///
/// Both parts are trimmed of `/`; an empty prefix contributes nothing, so
/// `("backups/", "b1")` gives `backups/b1/` and `("", "b1")` gives `b1/`.
/// An empty name is rejected since the purge would cover the whole prefix.
pub fn full_prefix(prefix: &str, backup_name: &str) -> Result<String> {
    let name = backup_name.trim_matches('/');
    if name.is_empty() {
        return Err(InventoryError::Config(format!(
            "backup name {:?} is empty after trimming",
            backup_name
        )));
    }

    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        Ok(format!("{}/", name))
    } else {
        Ok(format!("{}/{}/", prefix, name))
    }
}

/// What a successful purge did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub bucket: String,
    pub full_prefix: String,
    /// Objects found under `full_prefix`
    pub matched: usize,
    pub deleted: usize,
}

pub struct BackupPurger {
    backend: Arc<dyn ObjectStoreBackend>,
    cancel: CancellationToken,
}

impl BackupPurger {
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

    /// Delete every object of `backup_name` under `location`
    pub async fn purge(&self, location: &BackupLocation, backup_name: &str) -> Result<PurgeReport> {
        let timer = metrics::OPERATION_DURATION
            .with_label_values(&["purge"])
            .start_timer();
        let result = self.run(location, backup_name).await;
        timer.observe_duration();
        metrics::record_operation("purge", &result);
        result
    }

    async fn run(&self, location: &BackupLocation, backup_name: &str) -> Result<PurgeReport> {
        let full_prefix = full_prefix(&location.effective_prefix(), backup_name)?;
        let bucket = location.bucket.as_str();

        self.backend.prepare_bucket(bucket).await?;

        let request = ListRequest::recursive(bucket, full_prefix.clone());
        let scanner =
            BucketScanner::new(self.backend.as_ref()).with_cancellation(self.cancel.clone());
        let mut pages = scanner.pages(&request);

        let batch_size = self.backend.max_delete_batch().max(1);
        let mut batch: Vec<String> = Vec::with_capacity(batch_size);
        let mut report = PurgeReport {
            bucket: bucket.to_string(),
            full_prefix: full_prefix.clone(),
            matched: 0,
            deleted: 0,
        };

        loop {
            let page = match pages.try_next().await {
                Ok(Some(page)) => page,
                Ok(None) => break,
                Err(e) => {
                    if report.deleted > 0 {
                        warn!(bucket, prefix = %full_prefix, deleted = report.deleted, "Purge stopped while listing");
                    }
                    return Err(e);
                }
            };

            for entry in page.entries {
                if entry.is_prefix || !entry.key.starts_with(&full_prefix) {
                    debug!(key = %entry.key, "Skipping entry outside the backup");
                    continue;
                }
                report.matched += 1;
                batch.push(entry.key);
                if batch.len() == batch_size {
                    report.deleted += self
                        .delete_batch(bucket, &full_prefix, &mut batch, report.deleted)
                        .await?;
                }
            }
        }
        if !batch.is_empty() {
            report.deleted += self
                .delete_batch(bucket, &full_prefix, &mut batch, report.deleted)
                .await?;
        }

        if report.matched == 0 {
            info!(bucket, prefix = %full_prefix, "No objects to delete");
        } else {
            info!(bucket, prefix = %full_prefix, deleted = report.deleted, "Deleted objects from bucket");
        }
        Ok(report)
    }

    /// Delete and drain `batch`, returning how many keys were removed
    async fn delete_batch(
        &self,
        bucket: &str,
        full_prefix: &str,
        batch: &mut Vec<String>,
        deleted_so_far: usize,
    ) -> Result<usize> {
        if self.cancel.is_cancelled() {
            warn!(bucket, prefix = %full_prefix, deleted = deleted_so_far, "Purge cancelled");
            return Err(InventoryError::Cancelled);
        }

        let keys = std::mem::take(batch);
        debug!(bucket, prefix = %full_prefix, keys = keys.len(), "Deleting batch");
        let outcome = self
            .backend
            .delete_objects(bucket, &keys)
            .await
            .map_err(|e| InventoryError::delete(bucket, full_prefix, deleted_so_far, e))?;

        metrics::OBJECTS_DELETED
            .with_label_values(&[self.backend.kind()])
            .inc_by(outcome.deleted as u64);

        if let Some(first) = outcome.failed.first() {
            let deleted = deleted_so_far + outcome.deleted;
            warn!(
                bucket,
                prefix = %full_prefix,
                deleted,
                failed = outcome.failed.len(),
                "Batch delete partially failed"
            );
            return Err(InventoryError::Delete {
                bucket: bucket.to_string(),
                prefix: full_prefix.to_string(),
                deleted,
                source: format!(
                    "{} of {} objects not deleted, first failure: {}",
                    outcome.failed.len(),
                    keys.len(),
                    first
                )
                .into(),
            });
        }
        Ok(outcome.deleted)
    }
}
