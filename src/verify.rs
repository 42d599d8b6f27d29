//! Waiting for a backup to appear in or disappear from a bucket
//!
//! Object stores and the tools writing to them are eventually consistent: a
//! backup that was just synced or deleted may take a while to show up in (or
//! vanish from) listings. The waiter polls the locator until the expected
//! state is seen. Errors from a lookup are returned immediately.

use std::time::Duration;
use tracing::{debug, info};

use crate::config::BackupLocation;
use crate::errors::{InventoryError, Result};
use crate::locator::BackupLocator;

/// How long to keep polling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresencePolicy {
    /// Lookups to perform (at least one is always made)
    pub attempts: u32,
    /// Pause between two lookups
    pub interval: Duration,
}

impl Default for PresencePolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            interval: Duration::from_secs(30),
        }
    }
}

/// Poll until the presence of `backup_name` equals `expected`.
///
/// Returns the number of lookups it took. Cancelling the locator's token
/// interrupts the pause between lookups.
pub async fn wait_for_presence(
    locator: &BackupLocator,
    location: &BackupLocation,
    backup_name: &str,
    expected: bool,
    policy: PresencePolicy,
) -> Result<u32> {
    let attempts = policy.attempts.max(1);

    for attempt in 1..=attempts {
        let present = locator.exists(location, backup_name).await?;
        if present == expected {
            info!(backup = backup_name, present, attempt, "Backup reached expected state");
            return Ok(attempt);
        }
        if attempt == attempts {
            break;
        }

        debug!(
            backup = backup_name,
            present,
            attempt,
            retry_in = ?policy.interval,
            "Backup not yet in expected state"
        );
        tokio::select! {
            _ = locator.cancellation().cancelled() => return Err(InventoryError::Cancelled),
            _ = tokio::time::sleep(policy.interval) => {}
        }
    }

    Err(InventoryError::PresenceTimeout {
        backup: backup_name.to_string(),
        expected,
        attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBackend;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn quick(attempts: u32) -> PresencePolicy {
        PresencePolicy {
            attempts,
            interval: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_present_on_first_attempt() {
        let backend = MemoryBackend::new().with_objects("bkt", ["velero/b1/x"]);
        let locator = BackupLocator::new(Arc::new(backend));
        let location = BackupLocation::new("bkt", "velero");

        let used = wait_for_presence(&locator, &location, "b1", true, quick(3))
            .await
            .unwrap();
        assert_eq!(used, 1);
    }

    #[tokio::test]
    async fn test_times_out_when_state_never_changes() {
        let backend = Arc::new(MemoryBackend::new().with_objects("bkt", ["velero/b1/x"]));
        let locator = BackupLocator::new(backend.clone());
        let location = BackupLocation::new("bkt", "velero");

        let err = wait_for_presence(&locator, &location, "b1", false, quick(3))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            InventoryError::PresenceTimeout { attempts: 3, expected: false, .. }
        ));
        assert_eq!(backend.list_calls(), 3);
    }

    #[tokio::test]
    async fn test_zero_attempts_still_looks_once() {
        let backend = MemoryBackend::new().with_objects("bkt", ["velero/other/x"]);
        let locator = BackupLocator::new(Arc::new(backend));
        let location = BackupLocation::new("bkt", "velero");

        let used = wait_for_presence(&locator, &location, "b1", false, quick(0))
            .await
            .unwrap();
        assert_eq!(used, 1);
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_wait() {
        let backend = MemoryBackend::new().with_objects("bkt", ["velero/b1/x"]);
        let cancel = CancellationToken::new();
        let locator = BackupLocator::new(Arc::new(backend)).with_cancellation(cancel.clone());
        let location = BackupLocation::new("bkt", "velero");
        let policy = PresencePolicy {
            attempts: 10,
            interval: Duration::from_secs(3600),
        };

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });
        let err = wait_for_presence(&locator, &location, "b1", false, policy)
            .await
            .unwrap_err();
        canceller.await.unwrap();
        assert!(matches!(err, InventoryError::Cancelled));
    }
}
