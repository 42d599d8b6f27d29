//! Storage backend abstraction layer
//!
//! Every provider implements [`ObjectStoreBackend`], the `{list, delete}`
//! capability set the scanner, locator and purger are written against.
//! Listing is exposed as a stream of pages: each adapter drives its own
//! continuation protocol (continuation token, marker, page token) internally
//! and callers only ever see pages of [`ObjectEntry`].

mod aws;
mod azure;
mod gcp;
mod memory;

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::config::{BackendKind, LocationConfig};
use crate::credentials;
use crate::errors::Result;

pub use aws::S3Backend;
pub use azure::AzureBackend;
pub use gcp::GcsBackend;
pub use memory::MemoryBackend;

/// One listed key.
///
/// With a delimiter, keys sharing a prefix up to the next delimiter are
/// collapsed into a single entry with `is_prefix` set and a key ending in
/// the delimiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEntry {
    pub key: String,
    pub is_prefix: bool,
}

impl ObjectEntry {
    pub fn object(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            is_prefix: false,
        }
    }

    pub fn prefix(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            is_prefix: true,
        }
    }
}

/// Parameters of one listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListRequest {
    pub bucket: String,
    pub prefix: String,
    /// `None` lists recursively; `Some("/")` groups "subdirectories"
    pub delimiter: Option<String>,
}

impl ListRequest {
    pub fn recursive(bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            prefix: prefix.into(),
            delimiter: None,
        }
    }

    pub fn delimited(
        bucket: impl Into<String>,
        prefix: impl Into<String>,
        delimiter: impl Into<String>,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            prefix: prefix.into(),
            delimiter: Some(delimiter.into()),
        }
    }
}

/// Entries returned by one backend round trip
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub entries: Vec<ObjectEntry>,
}

/// Position of a paginated listing, shared by the token-driven adapters
#[derive(Debug, Clone)]
pub(crate) enum PageCursor {
    Start,
    Next(String),
    Done,
}

impl PageCursor {
    pub(crate) fn from_token(token: Option<String>) -> Self {
        token.map_or(PageCursor::Done, PageCursor::Next)
    }
}

/// A key the backend refused to delete
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteFailure {
    /// `None` when the provider error does not name the key
    pub key: Option<String>,
    pub reason: String,
}

impl std::fmt::Display for DeleteFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.key {
            Some(key) => write!(f, "{}: {}", key, self.reason),
            None => f.write_str(&self.reason),
        }
    }
}

/// Result of one delete batch
#[derive(Debug, Default)]
pub struct DeleteOutcome {
    pub deleted: usize,
    pub failed: Vec<DeleteFailure>,
}

/// Provider adapter
///
/// Implementations hold an authenticated client and must not keep state
/// between calls beyond it.
#[async_trait]
pub trait ObjectStoreBackend: Send + Sync {
    /// Short provider name used in logs and errors
    fn kind(&self) -> &'static str;

    /// Make sure the bucket/container exists. An already existing bucket is
    /// not an error.
    async fn prepare_bucket(&self, _bucket: &str) -> Result<()> {
        Ok(())
    }

    /// Lazily list `request`, one item per backend page, in backend order.
    ///
    /// Errors are reported as [`crate::InventoryError::Provider`]; the stream
    /// ends after the first error.
    fn list_pages<'a>(&'a self, request: &'a ListRequest) -> BoxStream<'a, Result<ListPage>>;

    /// Delete `keys` (at most [`Self::max_delete_batch`]) from `bucket`.
    ///
    /// A key that is already gone counts as deleted.
    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<DeleteOutcome>;

    /// Largest number of keys accepted by one [`Self::delete_objects`] call
    fn max_delete_batch(&self) -> usize;
}

/// Create a storage backend for `kind`
///
/// Resolves the provider-specific credentials from `credentials_file` and
/// `config`, then builds the client. No request is sent yet.
pub async fn connect(
    kind: BackendKind,
    credentials_file: Option<&Path>,
    config: &LocationConfig,
) -> Result<Arc<dyn ObjectStoreBackend>> {
    let backend: Arc<dyn ObjectStoreBackend> = match kind {
        BackendKind::Aws => {
            let params = credentials::resolve_s3(credentials_file, config)?;
            Arc::new(S3Backend::new(&params).await?)
        }
        BackendKind::Azure => {
            let params = credentials::resolve_azure(credentials_file, config)?;
            Arc::new(AzureBackend::new(&params)?)
        }
        BackendKind::Gcp => {
            let params = credentials::resolve_gcs(credentials_file, config)?;
            Arc::new(GcsBackend::new(params))
        }
    };
    info!(backend = backend.kind(), "Storage backend initialized");
    Ok(backend)
}
