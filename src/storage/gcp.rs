//! Google Cloud Storage backend implementation
//!
//! Uses object_store::gcp::GoogleCloudStorage with support for:
//! - Service account JSON key file
//! - Application Default Credentials when no file is given
//!
//! object_store drives the GCS page tokens internally. Delimited listings are
//! served in one page; recursive listings are cut into pages of
//! [`PAGE_SIZE`] objects, each page resuming after the last key of the
//! previous one.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use object_store::gcp::{GoogleCloudStorage, GoogleCloudStorageBuilder};
use object_store::path::Path;
use object_store::ObjectStore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::credentials::GcsParams;
use crate::errors::{InventoryError, Result};
use crate::storage::{
    DeleteFailure, DeleteOutcome, ListPage, ListRequest, ObjectEntry, ObjectStoreBackend, PageCursor,
};

const PAGE_SIZE: usize = 1000;

/// Google Cloud Storage backend
pub struct GcsBackend {
    params: GcsParams,
    stores: Mutex<HashMap<String, Arc<GoogleCloudStorage>>>,
}

impl GcsBackend {
    pub fn new(params: GcsParams) -> Self {
        Self {
            params,
            stores: Mutex::new(HashMap::new()),
        }
    }

    /// Client bound to `bucket`, built on first use
    fn store(&self, bucket: &str) -> Result<Arc<GoogleCloudStorage>> {
        let mut stores = self.stores.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(store) = stores.get(bucket) {
            return Ok(store.clone());
        }

        let mut builder = GoogleCloudStorageBuilder::from_env().with_bucket_name(bucket);
        if let Some(path) = &self.params.service_account_path {
            builder = builder.with_service_account_path(path.to_string_lossy());
        }
        let store = Arc::new(builder.build().map_err(|e| InventoryError::session("gcp", e))?);
        stores.insert(bucket.to_string(), store.clone());
        Ok(store)
    }

    async fn delimited_page(&self, request: &ListRequest) -> Result<ListPage> {
        let store = self.store(&request.bucket)?;
        let prefix = to_path(&request.prefix);
        let listing = store
            .list_with_delimiter(prefix.as_ref())
            .await
            .map_err(InventoryError::provider)?;

        let mut entries: Vec<ObjectEntry> = listing
            .common_prefixes
            .iter()
            .map(|p| ObjectEntry::prefix(format!("{}/", p)))
            .collect();
        entries.extend(
            listing
                .objects
                .iter()
                .map(|meta| ObjectEntry::object(meta.location.to_string())),
        );
        Ok(ListPage { entries })
    }

    async fn recursive_page(
        &self,
        request: &ListRequest,
        after: Option<String>,
    ) -> Result<(ListPage, Option<String>)> {
        let store = self.store(&request.bucket)?;
        let prefix = to_path(&request.prefix);
        let mut listing = match &after {
            Some(offset) => store.list_with_offset(prefix.as_ref(), &object_path(offset)?),
            None => store.list(prefix.as_ref()),
        };

        let mut entries = Vec::new();
        let mut truncated = false;
        while let Some(meta) = listing.next().await {
            let meta = meta.map_err(InventoryError::provider)?;
            if entries.len() == PAGE_SIZE {
                truncated = true;
                break;
            }
            entries.push(ObjectEntry::object(meta.location.to_string()));
        }

        let next = if truncated {
            entries.last().map(|e: &ObjectEntry| e.key.clone())
        } else {
            None
        };
        Ok((ListPage { entries }, next))
    }
}

/// Path of a key as returned by a listing.
///
/// Listed keys are already in their stored form; `Path::from` would
/// percent-encode characters such as `%` a second time and address a
/// different object.
fn object_path(key: &str) -> Result<Path> {
    Path::parse(key).map_err(InventoryError::provider)
}

/// object_store paths are segment based; `backups/` and `backups` are the
/// same directory and an empty prefix means the bucket root.
fn to_path(prefix: &str) -> Option<Path> {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        None
    } else {
        Some(Path::from(trimmed))
    }
}

#[async_trait]
impl ObjectStoreBackend for GcsBackend {
    fn kind(&self) -> &'static str {
        "gcp"
    }

    fn list_pages<'a>(&'a self, request: &'a ListRequest) -> BoxStream<'a, Result<ListPage>> {
        if request.delimiter.is_some() {
            return stream::once(self.delimited_page(request)).boxed();
        }

        stream::try_unfold(PageCursor::Start, move |cursor| async move {
            let after = match cursor {
                PageCursor::Done => return Ok(None),
                PageCursor::Start => None,
                PageCursor::Next(key) => Some(key),
            };
            let (page, next) = self.recursive_page(request, after).await?;
            Ok(Some((page, PageCursor::from_token(next))))
        })
        .boxed()
    }

    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<DeleteOutcome> {
        let store = self.store(bucket)?;
        let locations = keys
            .iter()
            .map(|key| object_path(key))
            .collect::<Result<Vec<Path>>>()?;
        let locations = stream::iter(locations.into_iter().map(Ok)).boxed();

        let mut outcome = DeleteOutcome::default();
        let mut results = store.delete_stream(locations);
        while let Some(result) = results.next().await {
            match result {
                Ok(_) | Err(object_store::Error::NotFound { .. }) => outcome.deleted += 1,
                Err(e) => outcome.failed.push(DeleteFailure {
                    key: None,
                    reason: e.to_string(),
                }),
            }
        }
        Ok(outcome)
    }

    fn max_delete_batch(&self) -> usize {
        PAGE_SIZE
    }
}
