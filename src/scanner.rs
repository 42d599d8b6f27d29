//! Paginated, delimiter-aware bucket enumeration
//!
//! [`BucketScanner`] turns a backend's page stream into a lazy stream of
//! [`ObjectEntry`]. Pages are fetched strictly one after another, in backend
//! order, and only when the consumer asks for more entries. Cancellation is
//! checked before every page fetch; a request already in flight runs to
//! completion.

use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::errors::{InventoryError, Result};
use crate::metrics;
use crate::storage::{ListPage, ListRequest, ObjectEntry, ObjectStoreBackend};

/// Separator of the hierarchical backup layout
pub const DELIMITER: &str = "/";

pub struct BucketScanner<'a> {
    backend: &'a dyn ObjectStoreBackend,
    cancel: CancellationToken,
}

impl<'a> BucketScanner<'a> {
    pub fn new(backend: &'a dyn ObjectStoreBackend) -> Self {
        Self {
            backend,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Lazily list every entry of `request`.
    ///
    /// The stream ends after the first error. Listing failures carry the
    /// bucket and prefix.
    pub fn scan<'s>(&'s self, request: &'s ListRequest) -> BoxStream<'s, Result<ObjectEntry>> {
        self.pages(request)
            .map_ok(|page| stream::iter(page.entries.into_iter().map(Ok)))
            .try_flatten()
            .boxed()
    }

    /// Page-level view of [`Self::scan`], for consumers that work in batches
    pub fn pages<'s>(&'s self, request: &'s ListRequest) -> BoxStream<'s, Result<ListPage>> {
        let backend = self.backend.kind();
        let pages = self.backend.list_pages(request);

        stream::try_unfold((pages, 0usize), move |(mut pages, fetched)| async move {
            if self.cancel.is_cancelled() {
                debug!(bucket = %request.bucket, prefix = %request.prefix, fetched, "Scan cancelled");
                return Err(InventoryError::Cancelled);
            }

            match pages.next().await {
                None => Ok(None),
                Some(Err(e)) => Err(InventoryError::list(&request.bucket, &request.prefix, e)),
                Some(Ok(page)) => {
                    let prefixes = page.entries.iter().filter(|e| e.is_prefix).count() as u64;
                    let objects = page.entries.len() as u64 - prefixes;
                    metrics::LIST_PAGES.with_label_values(&[backend]).inc();
                    metrics::LISTED_ENTRIES
                        .with_label_values(&[backend, "prefix"])
                        .inc_by(prefixes);
                    metrics::LISTED_ENTRIES
                        .with_label_values(&[backend, "object"])
                        .inc_by(objects);
                    debug!(
                        backend,
                        bucket = %request.bucket,
                        prefix = %request.prefix,
                        page = fetched,
                        entries = page.entries.len(),
                        "Listed page"
                    );
                    Ok(Some((page, (pages, fetched + 1))))
                }
            }
        })
        .boxed()
    }
}
