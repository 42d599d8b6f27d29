//! Resolution of connection parameters per backend
//!
//! Turns a credentials file path and a [`LocationConfig`] into the parameters
//! each adapter needs before it can build a client. Nothing here talks to the
//! network.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::{BackendKind, LocationConfig};
use crate::errors::{InventoryError, Result};

/// Region value that selects a path-style, plain-HTTP MinIO endpoint.
pub const MINIO_REGION: &str = "minio";

const AZURE_STORAGE_ACCOUNT_ACCESS_KEY: &str = "AZURE_STORAGE_ACCOUNT_ACCESS_KEY";
const AZURE_TENANT_ID: &str = "AZURE_TENANT_ID";
const AZURE_CLIENT_ID: &str = "AZURE_CLIENT_ID";
const AZURE_CLIENT_SECRET: &str = "AZURE_CLIENT_SECRET";
const AZURE_CLOUD_NAME: &str = "AZURE_CLOUD_NAME";

/// Connection parameters for S3 and S3-compatible stores
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Params {
    pub region: String,
    /// Custom endpoint URL (MinIO and other S3-compatible services)
    pub endpoint: Option<String>,
    pub force_path_style: bool,
    /// Shared credentials file; `None` uses the default provider chain
    pub credentials_file: Option<PathBuf>,
}

pub fn resolve_s3(credentials_file: Option<&Path>, config: &LocationConfig) -> Result<S3Params> {
    let region = config
        .require(LocationConfig::REGION, BackendKind::Aws)?
        .to_string();

    let mut force_path_style = config.flag(LocationConfig::S3_FORCE_PATH_STYLE);
    let endpoint = if region == MINIO_REGION {
        let url = config.require(LocationConfig::S3_URL, BackendKind::Aws)?;
        force_path_style = true;
        Some(with_default_scheme(url))
    } else {
        config.get(LocationConfig::S3_URL).map(with_default_scheme)
    };

    Ok(S3Params {
        region,
        endpoint,
        force_path_style,
        credentials_file: credentials_file.map(Path::to_path_buf),
    })
}

/// MinIO endpoints are configured without TLS; a bare host gets `http://`.
fn with_default_scheme(url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("http://{}", url)
    }
}

/// Azure sovereign cloud, selected by `AZURE_CLOUD_NAME`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AzureCloud {
    Public,
    China,
    UsGovernment,
    Germany,
}

impl AzureCloud {
    /// Parse a cloud name; an empty name falls back to the public cloud.
    pub fn from_name(name: &str) -> Result<Self> {
        match name.trim().to_uppercase().as_str() {
            "" | "AZURECLOUD" | "AZUREPUBLICCLOUD" => Ok(AzureCloud::Public),
            "AZURECHINACLOUD" => Ok(AzureCloud::China),
            "AZUREUSGOVERNMENT" | "AZUREUSGOVERNMENTCLOUD" => Ok(AzureCloud::UsGovernment),
            "AZUREGERMANCLOUD" => Ok(AzureCloud::Germany),
            _ => Err(InventoryError::Config(format!(
                "unable to parse azure cloud name {:?}",
                name
            ))),
        }
    }

    pub fn storage_suffix(&self) -> &'static str {
        match self {
            AzureCloud::Public => "core.windows.net",
            AzureCloud::China => "core.chinacloudapi.cn",
            AzureCloud::UsGovernment => "core.usgovcloudapi.net",
            AzureCloud::Germany => "core.cloudapi.de",
        }
    }

    pub fn authority_host(&self) -> &'static str {
        match self {
            AzureCloud::Public => "https://login.microsoftonline.com",
            AzureCloud::China => "https://login.chinacloudapi.cn",
            AzureCloud::UsGovernment => "https://login.microsoftonline.us",
            AzureCloud::Germany => "https://login.microsoftonline.de",
        }
    }
}

/// How the Azure adapter authenticates against the storage account
#[derive(Clone, PartialEq, Eq)]
pub enum AzureAuth {
    AccessKey(String),
    ClientSecret {
        tenant_id: String,
        client_id: String,
        client_secret: String,
    },
}

impl std::fmt::Debug for AzureAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AzureAuth::AccessKey(_) => f.write_str("AccessKey(<redacted>)"),
            AzureAuth::ClientSecret {
                tenant_id,
                client_id,
                ..
            } => f
                .debug_struct("ClientSecret")
                .field("tenant_id", tenant_id)
                .field("client_id", client_id)
                .finish_non_exhaustive(),
        }
    }
}

/// Connection parameters for Azure Blob Storage
///
/// `subscriptionId` and `resourceGroup` in the location config only matter for
/// looking up account keys through the management plane, which is not done
/// here; they are accepted and ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AzureParams {
    pub account: String,
    pub auth: AzureAuth,
    pub cloud: AzureCloud,
}

impl AzureParams {
    pub fn blob_endpoint(&self) -> String {
        format!("https://{}.blob.{}", self.account, self.cloud.storage_suffix())
    }
}

/// Resolve Azure parameters.
///
/// The credentials file uses `KEY=VALUE` lines. Values in the file win over
/// the process environment. An account access key is preferred; otherwise a
/// service principal (tenant, client id, secret) must be present.
pub fn resolve_azure(credentials_file: Option<&Path>, config: &LocationConfig) -> Result<AzureParams> {
    resolve_azure_with(credentials_file, config, |key| std::env::var(key).ok())
}

/// [`resolve_azure`] with `env` standing in for the process environment
pub fn resolve_azure_with<F>(
    credentials_file: Option<&Path>,
    config: &LocationConfig,
    env: F,
) -> Result<AzureParams>
where
    F: Fn(&str) -> Option<String>,
{
    let account = config
        .get(LocationConfig::STORAGE_ACCOUNT)
        .ok_or_else(|| {
            InventoryError::Config(
                "azure backend requires `storageAccount` (the storage account name) in the location config"
                    .to_string(),
            )
        })?
        .to_string();

    let vars = EnvFile::load(credentials_file, env)?;
    let cloud = AzureCloud::from_name(vars.get(AZURE_CLOUD_NAME).unwrap_or_default().as_str())?;

    let auth = if let Some(key) = vars.get(AZURE_STORAGE_ACCOUNT_ACCESS_KEY) {
        AzureAuth::AccessKey(key)
    } else {
        match (
            vars.get(AZURE_TENANT_ID),
            vars.get(AZURE_CLIENT_ID),
            vars.get(AZURE_CLIENT_SECRET),
        ) {
            (Some(tenant_id), Some(client_id), Some(client_secret)) => AzureAuth::ClientSecret {
                tenant_id,
                client_id,
                client_secret,
            },
            _ => {
                return Err(InventoryError::credentials(
                    "azure",
                    format!(
                        "credentials should contain {} or {}, {} and {}",
                        AZURE_STORAGE_ACCOUNT_ACCESS_KEY,
                        AZURE_TENANT_ID,
                        AZURE_CLIENT_ID,
                        AZURE_CLIENT_SECRET
                    ),
                ))
            }
        }
    };

    debug!(account = %account, cloud = ?cloud, "Resolved Azure storage parameters");

    Ok(AzureParams {
        account,
        auth,
        cloud,
    })
}

/// Connection parameters for Google Cloud Storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcsParams {
    /// Service account JSON key; `None` uses application default credentials
    pub service_account_path: Option<PathBuf>,
    pub project: Option<String>,
}

pub fn resolve_gcs(credentials_file: Option<&Path>, config: &LocationConfig) -> Result<GcsParams> {
    if let Some(path) = credentials_file {
        if !path.is_file() {
            return Err(InventoryError::credentials(
                "gcp",
                format!("service account file {} does not exist", path.display()),
            ));
        }
    }
    Ok(GcsParams {
        service_account_path: credentials_file.map(Path::to_path_buf),
        project: config.get(LocationConfig::PROJECT).map(str::to_string),
    })
}

/// `KEY=VALUE` credentials file layered over an environment lookup.
struct EnvFile<F> {
    file: HashMap<String, String>,
    env: F,
}

impl<F: Fn(&str) -> Option<String>> EnvFile<F> {
    fn load(path: Option<&Path>, env: F) -> Result<Self> {
        let mut file = HashMap::new();
        if let Some(path) = path {
            let iter = dotenvy::from_path_iter(path).map_err(|e| {
                InventoryError::credentials(
                    "azure",
                    format!("error loading credentials file {}: {}", path.display(), e),
                )
            })?;
            for item in iter {
                let (key, value) = item.map_err(|e| {
                    InventoryError::credentials(
                        "azure",
                        format!("error parsing credentials file {}: {}", path.display(), e),
                    )
                })?;
                file.insert(key, value);
            }
        }
        Ok(Self { file, env })
    }

    fn get(&self, key: &str) -> Option<String> {
        self.file
            .get(key)
            .cloned()
            .or_else(|| (self.env)(key))
            .filter(|v| !v.is_empty())
    }
}
