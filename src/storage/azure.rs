//! Azure Blob Storage backend implementation
//!
//! Uses azure_storage_blobs with either:
//! - a storage account access key
//! - a service principal (client secret) via azure_identity
//!
//! The bucket of a location maps to a blob container. Containers are created
//! on demand; an existing container is not an error. Blob storage has no
//! batch delete in this SDK, so blobs are deleted one by one.

use async_trait::async_trait;
use azure_core::error::ErrorKind;
use azure_core::StatusCode;
use azure_identity::{ClientSecretCredential, TokenCredentialOptions};
use azure_storage::{CloudLocation, StorageCredentials};
use azure_storage_blobs::container::operations::BlobItem;
use azure_storage_blobs::prelude::{BlobServiceClient, ClientBuilder, ContainerClient};
use futures::stream::{BoxStream, StreamExt};
use std::sync::Arc;
use tracing::{debug, info};

use crate::credentials::{AzureAuth, AzureCloud, AzureParams};
use crate::errors::{InventoryError, Result};
use crate::storage::{DeleteFailure, DeleteOutcome, ListPage, ListRequest, ObjectEntry, ObjectStoreBackend};

/// Keys handed to one `delete_objects` call; each key is its own request
const DELETE_BATCH: usize = 100;

const CONTAINER_ALREADY_EXISTS: &str = "ContainerAlreadyExists";

/// Azure Blob Storage backend
pub struct AzureBackend {
    service: BlobServiceClient,
}

impl AzureBackend {
    /// Create a new Azure Blob Storage backend
    pub fn new(params: &AzureParams) -> Result<Self> {
        let credentials = match &params.auth {
            AzureAuth::AccessKey(key) => {
                StorageCredentials::access_key(params.account.clone(), key.clone())
            }
            AzureAuth::ClientSecret {
                tenant_id,
                client_id,
                client_secret,
            } => {
                let authority = azure_core::Url::parse(params.cloud.authority_host())
                    .map_err(|e| InventoryError::session("azure", e))?;
                let credential = ClientSecretCredential::new(
                    azure_core::new_http_client(),
                    tenant_id.clone(),
                    client_id.clone(),
                    client_secret.clone(),
                    TokenCredentialOptions::new(authority),
                );
                StorageCredentials::token_credential(Arc::new(credential))
            }
        };

        let builder = match params.cloud {
            AzureCloud::Public => ClientBuilder::new(params.account.clone(), credentials),
            _ => ClientBuilder::with_location(
                CloudLocation::Custom {
                    account: params.account.clone(),
                    uri: params.blob_endpoint(),
                },
                credentials,
            ),
        };

        debug!(endpoint = %params.blob_endpoint(), "Azure blob client configured");

        Ok(Self::with_client(builder.blob_service_client()))
    }

    /// Wrap an already configured service client
    pub fn with_client(service: BlobServiceClient) -> Self {
        Self { service }
    }

    fn container(&self, bucket: &str) -> ContainerClient {
        self.service.container_client(bucket.to_string())
    }
}

fn is_http_error(err: &azure_core::Error, expected: StatusCode, code: Option<&str>) -> bool {
    match err.kind() {
        ErrorKind::HttpResponse { status, error_code } => {
            *status == expected && code.map_or(true, |c| error_code.as_deref() == Some(c))
        }
        _ => false,
    }
}

#[async_trait]
impl ObjectStoreBackend for AzureBackend {
    fn kind(&self) -> &'static str {
        "azure"
    }

    async fn prepare_bucket(&self, bucket: &str) -> Result<()> {
        match self.container(bucket).create().await {
            Ok(_) => {
                info!(container = %bucket, "Created blob container");
                Ok(())
            }
            Err(e) if is_http_error(&e, StatusCode::Conflict, Some(CONTAINER_ALREADY_EXISTS)) => {
                info!(container = %bucket, "Blob container already exists");
                Ok(())
            }
            Err(e) => Err(InventoryError::PrepareBucket {
                bucket: bucket.to_string(),
                source: Box::new(e),
            }),
        }
    }

    fn list_pages<'a>(&'a self, request: &'a ListRequest) -> BoxStream<'a, Result<ListPage>> {
        let mut builder = self.container(&request.bucket).list_blobs();
        if !request.prefix.is_empty() {
            builder = builder.prefix(request.prefix.clone());
        }
        if let Some(delimiter) = &request.delimiter {
            builder = builder.delimiter(delimiter.clone());
        }

        // The pageable follows `NextMarker` itself and fetches one page per poll
        builder
            .into_stream()
            .map(|page| {
                let page = page.map_err(InventoryError::provider)?;
                let entries = page
                    .blobs
                    .items
                    .into_iter()
                    .map(|item| match item {
                        BlobItem::Blob(blob) => ObjectEntry::object(blob.name),
                        BlobItem::BlobPrefix(prefix) => ObjectEntry::prefix(prefix.name),
                    })
                    .collect();
                Ok(ListPage { entries })
            })
            .boxed()
    }

    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<DeleteOutcome> {
        let container = self.container(bucket);
        let mut outcome = DeleteOutcome::default();

        for key in keys {
            match container.blob_client(key.clone()).delete().await {
                Ok(_) => outcome.deleted += 1,
                Err(e) if is_http_error(&e, StatusCode::NotFound, None) => {
                    debug!(blob = %key, "Blob already gone");
                    outcome.deleted += 1;
                }
                Err(e) => {
                    outcome.failed.push(DeleteFailure {
                        key: Some(key.clone()),
                        reason: e.to_string(),
                    });
                    break;
                }
            }
        }
        Ok(outcome)
    }

    fn max_delete_batch(&self) -> usize {
        DELETE_BATCH
    }
}
