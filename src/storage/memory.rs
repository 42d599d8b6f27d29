//! In-memory storage backend
//!
//! Keeps keys in sorted sets per bucket and serves them with the same
//! delimiter and pagination semantics as the cloud providers: continuation is
//! key based (the next page starts after the last returned entry), so keys
//! deleted between two pages never shift the listing. Useful for testing
//! inventory and purge flows without a cloud account.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::errors::{InventoryError, Result};
use crate::storage::{DeleteOutcome, ListPage, ListRequest, ObjectEntry, ObjectStoreBackend, PageCursor};

const DEFAULT_PAGE_SIZE: usize = 1000;

/// In-memory object store
pub struct MemoryBackend {
    buckets: Mutex<BTreeMap<String, BTreeSet<String>>>,
    page_size: usize,
    max_delete_batch: usize,
    list_calls: AtomicUsize,
    delete_calls: AtomicUsize,
    fail_list_at_call: Option<usize>,
    fail_delete_at_call: Option<usize>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(BTreeMap::new()),
            page_size: DEFAULT_PAGE_SIZE,
            max_delete_batch: DEFAULT_PAGE_SIZE,
            list_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
            fail_list_at_call: None,
            fail_delete_at_call: None,
        }
    }

    /// Maximum entries per listed page (at least 1)
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Maximum keys per delete call (at least 1)
    pub fn with_max_delete_batch(mut self, max: usize) -> Self {
        self.max_delete_batch = max.max(1);
        self
    }

    /// Make the `call`-th page fetch (0-based, counted over the backend's
    /// lifetime) fail
    pub fn failing_list_at(mut self, call: usize) -> Self {
        self.fail_list_at_call = Some(call);
        self
    }

    /// Make the `call`-th delete call (0-based) fail without deleting anything
    pub fn failing_delete_at(mut self, call: usize) -> Self {
        self.fail_delete_at_call = Some(call);
        self
    }

    pub fn with_objects<I, K>(self, bucket: &str, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        for key in keys {
            self.insert(bucket, key);
        }
        self
    }

    pub fn insert(&self, bucket: &str, key: impl Into<String>) {
        self.lock()
            .entry(bucket.to_string())
            .or_default()
            .insert(key.into());
    }

    pub fn create_bucket(&self, bucket: &str) {
        self.lock().entry(bucket.to_string()).or_default();
    }

    pub fn has_bucket(&self, bucket: &str) -> bool {
        self.lock().contains_key(bucket)
    }

    /// All keys of `bucket`, sorted
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.lock()
            .get(bucket)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of pages served so far
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Number of delete calls received so far
    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, BTreeSet<String>>> {
        self.buckets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fetch_page(
        &self,
        request: &ListRequest,
        marker: Option<&str>,
    ) -> Result<(Vec<ObjectEntry>, Option<String>)> {
        let call = self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_list_at_call == Some(call) {
            return Err(InventoryError::provider("injected listing failure"));
        }

        let buckets = self.lock();
        let keys = buckets.get(&request.bucket).ok_or_else(|| {
            InventoryError::provider(format!("NoSuchBucket: {}", request.bucket))
        })?;

        let prefix = request.prefix.as_str();
        let mut entries: Vec<ObjectEntry> = Vec::new();
        let mut truncated = false;

        for key in keys.range::<str, _>((Bound::Included(prefix), Bound::Unbounded)) {
            if !key.starts_with(prefix) {
                break;
            }
            let entry = match request.delimiter.as_deref() {
                Some(delimiter) if !delimiter.is_empty() => {
                    match key[prefix.len()..].find(delimiter) {
                        Some(at) => ObjectEntry::prefix(&key[..prefix.len() + at + delimiter.len()]),
                        None => ObjectEntry::object(key.as_str()),
                    }
                }
                _ => ObjectEntry::object(key.as_str()),
            };
            if marker.is_some_and(|m| entry.key.as_str() <= m) {
                continue;
            }
            if entries.last() == Some(&entry) {
                continue;
            }
            if entries.len() == self.page_size {
                truncated = true;
                break;
            }
            entries.push(entry);
        }

        let next = if truncated {
            entries.last().map(|e| e.key.clone())
        } else {
            None
        };
        Ok((entries, next))
    }
}

#[async_trait]
impl ObjectStoreBackend for MemoryBackend {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn prepare_bucket(&self, bucket: &str) -> Result<()> {
        self.create_bucket(bucket);
        Ok(())
    }

    fn list_pages<'a>(&'a self, request: &'a ListRequest) -> BoxStream<'a, Result<ListPage>> {
        stream::try_unfold(PageCursor::Start, move |cursor| async move {
            let marker = match cursor {
                PageCursor::Done => return Ok(None),
                PageCursor::Start => None,
                PageCursor::Next(marker) => Some(marker),
            };
            let (entries, next) = self.fetch_page(request, marker.as_deref())?;
            Ok(Some((ListPage { entries }, PageCursor::from_token(next))))
        })
        .boxed()
    }

    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<DeleteOutcome> {
        let call = self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_delete_at_call == Some(call) {
            return Err(InventoryError::provider("injected delete failure"));
        }
        if keys.len() > self.max_delete_batch {
            return Err(InventoryError::provider(format!(
                "batch of {} keys exceeds the limit of {}",
                keys.len(),
                self.max_delete_batch
            )));
        }

        let mut buckets = self.lock();
        let stored = buckets
            .get_mut(bucket)
            .ok_or_else(|| InventoryError::provider(format!("NoSuchBucket: {}", bucket)))?;
        for key in keys {
            stored.remove(key);
        }
        Ok(DeleteOutcome {
            deleted: keys.len(),
            failed: Vec::new(),
        })
    }

    fn max_delete_batch(&self) -> usize {
        self.max_delete_batch
    }
}
