//! AWS S3 storage backend implementation
//!
//! Uses aws-sdk-s3 directly so listing can follow `ListObjectsV2`
//! continuation tokens page by page and deletion can use the batch
//! `DeleteObjects` call. Supports:
//! - AWS regions, with credentials from a shared credentials file or the
//!   default provider chain
//! - S3-compatible services (MinIO) through a custom endpoint with
//!   path-style addressing

use async_trait::async_trait;
use aws_config::profile::ProfileFileCredentialsProvider;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use aws_sdk_s3::Client;
use futures::stream::{self, BoxStream, StreamExt};
use tracing::debug;

use crate::credentials::S3Params;
use crate::errors::{InventoryError, Result};
use crate::storage::{DeleteFailure, DeleteOutcome, ListPage, ListRequest, ObjectEntry, ObjectStoreBackend, PageCursor};

/// `DeleteObjects` accepts at most 1000 keys per request
const MAX_DELETE_BATCH: usize = 1000;

/// AWS S3 storage backend
pub struct S3Backend {
    client: Client,
}

impl S3Backend {
    /// Create a new S3 backend
    ///
    /// With a credentials file, the `default` profile of that file is used;
    /// otherwise the default AWS credential chain applies (environment,
    /// IRSA, instance metadata).
    pub async fn new(params: &S3Params) -> Result<Self> {
        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(params.region.clone()));

        if let Some(path) = &params.credentials_file {
            if !path.is_file() {
                return Err(InventoryError::credentials(
                    "aws",
                    format!("shared credentials file {} does not exist", path.display()),
                ));
            }
            #[allow(deprecated)]
            let files = aws_config::profile::profile_file::ProfileFiles::builder()
                .with_file(aws_config::profile::profile_file::ProfileFileKind::Credentials, path)
                .build();
            let provider = ProfileFileCredentialsProvider::builder()
                .profile_files(files)
                .profile_name("default")
                .build();
            loader = loader.credentials_provider(provider);
        }

        let sdk_config = loader.load().await;
        let mut builder =
            aws_sdk_s3::config::Builder::from(&sdk_config).force_path_style(params.force_path_style);
        if let Some(endpoint) = &params.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        debug!(
            region = %params.region,
            endpoint = ?params.endpoint,
            path_style = params.force_path_style,
            "S3 client configured"
        );

        Ok(Self::with_client(Client::from_conf(builder.build())))
    }

    /// Wrap an already configured client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

fn sdk_error<E: std::error::Error>(err: E) -> InventoryError {
    InventoryError::provider(DisplayErrorContext(err).to_string())
}

#[async_trait]
impl ObjectStoreBackend for S3Backend {
    fn kind(&self) -> &'static str {
        "aws"
    }

    fn list_pages<'a>(&'a self, request: &'a ListRequest) -> BoxStream<'a, Result<ListPage>> {
        stream::try_unfold(PageCursor::Start, move |cursor| async move {
            let token = match cursor {
                PageCursor::Done => return Ok(None),
                PageCursor::Start => None,
                PageCursor::Next(token) => Some(token),
            };

            let mut req = self.client.list_objects_v2().bucket(&request.bucket);
            if !request.prefix.is_empty() {
                req = req.prefix(&request.prefix);
            }
            if let Some(delimiter) = &request.delimiter {
                req = req.delimiter(delimiter);
            }
            if let Some(token) = token {
                req = req.continuation_token(token);
            }
            let resp = req.send().await.map_err(sdk_error)?;

            let mut entries: Vec<ObjectEntry> = resp
                .common_prefixes()
                .iter()
                .filter_map(|p| p.prefix())
                .map(ObjectEntry::prefix)
                .collect();
            entries.extend(
                resp.contents()
                    .iter()
                    .filter_map(|o| o.key())
                    .map(ObjectEntry::object),
            );

            let next = if resp.is_truncated().unwrap_or(false) {
                resp.next_continuation_token().map(str::to_string)
            } else {
                None
            };
            Ok(Some((ListPage { entries }, PageCursor::from_token(next))))
        })
        .boxed()
    }

    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<DeleteOutcome> {
        if keys.is_empty() {
            return Ok(DeleteOutcome::default());
        }

        let objects = keys
            .iter()
            .map(|key| ObjectIdentifier::builder().key(key).build().map_err(sdk_error))
            .collect::<Result<Vec<_>>>()?;
        let delete = Delete::builder()
            .set_objects(Some(objects))
            .quiet(true)
            .build()
            .map_err(sdk_error)?;

        let resp = self
            .client
            .delete_objects()
            .bucket(bucket)
            .delete(delete)
            .send()
            .await
            .map_err(sdk_error)?;

        // Quiet mode only reports failures
        let failed: Vec<DeleteFailure> = resp
            .errors()
            .iter()
            .map(|e| DeleteFailure {
                key: e.key().map(str::to_string),
                reason: format!(
                    "{}: {}",
                    e.code().unwrap_or("Unknown"),
                    e.message().unwrap_or_default()
                ),
            })
            .collect();

        Ok(DeleteOutcome {
            deleted: keys.len().saturating_sub(failed.len()),
            failed,
        })
    }

    fn max_delete_batch(&self) -> usize {
        MAX_DELETE_BATCH
    }
}
