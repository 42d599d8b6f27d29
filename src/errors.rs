//! Error types for backup inventory operations
//!
//! Every failure is returned to the caller with enough context (stage,
//! bucket, prefix) to be diagnosed. Nothing in the library terminates the
//! process; that decision belongs to the binary.

use thiserror::Error;

/// Boxed provider error, as surfaced by the individual SDKs.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for inventory and cleanup operations
#[derive(Error, Debug)]
pub enum InventoryError {
    /// Missing or malformed configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Credential material could not be loaded
    #[error("Credentials error for {backend} backend: {message}")]
    Credentials {
        backend: &'static str,
        message: String,
    },

    /// Client construction failed
    #[error("failed to create session for {backend} backend: {source}")]
    Session {
        backend: &'static str,
        #[source]
        source: BoxError,
    },

    /// Bucket/container preparation failed
    #[error("failed to prepare bucket {bucket}: {source}")]
    PrepareBucket {
        bucket: String,
        #[source]
        source: BoxError,
    },

    /// Listing failed part-way through pagination
    #[error("failed to retrieve bucket items from {bucket} under prefix {prefix:?}: {source}")]
    List {
        bucket: String,
        prefix: String,
        #[source]
        source: BoxError,
    },

    /// Deletion failed; `deleted` objects were already removed and stay removed
    #[error("failed to delete objects from {bucket} under prefix {prefix:?} after deleting {deleted}: {source}")]
    Delete {
        bucket: String,
        prefix: String,
        deleted: usize,
        #[source]
        source: BoxError,
    },

    /// Raw provider failure, before listing/deletion context is attached
    #[error("Storage error: {0}")]
    Provider(#[source] BoxError),

    /// The caller's cancellation token fired
    #[error("Operation cancelled")]
    Cancelled,

    /// The expected presence state was never observed
    #[error("backup {backup} did not become {} after {attempts} attempts", presence_word(.expected))]
    PresenceTimeout {
        backup: String,
        expected: bool,
        attempts: u32,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn presence_word(expected: &bool) -> &'static str {
    if *expected {
        "present"
    } else {
        "absent"
    }
}

impl InventoryError {
    pub(crate) fn provider(source: impl Into<BoxError>) -> Self {
        Self::Provider(source.into())
    }

    pub(crate) fn session(backend: &'static str, source: impl Into<BoxError>) -> Self {
        Self::Session {
            backend,
            source: source.into(),
        }
    }

    pub(crate) fn credentials(backend: &'static str, message: impl Into<String>) -> Self {
        Self::Credentials {
            backend,
            message: message.into(),
        }
    }

    /// Attach the listing context to a provider error.
    ///
    /// Errors that already carry context (cancellation, a nested list error)
    /// pass through unchanged.
    pub(crate) fn list(bucket: &str, prefix: &str, source: InventoryError) -> Self {
        match source {
            Self::Provider(inner) => Self::List {
                bucket: bucket.to_string(),
                prefix: prefix.to_string(),
                source: inner,
            },
            other => other,
        }
    }

    /// Attach the deletion context, including what was already removed.
    pub(crate) fn delete(bucket: &str, prefix: &str, deleted: usize, source: InventoryError) -> Self {
        match source {
            Self::Provider(inner) => Self::Delete {
                bucket: bucket.to_string(),
                prefix: prefix.to_string(),
                deleted,
                source: inner,
            },
            other => other,
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, InventoryError>;
