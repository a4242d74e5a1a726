use crate::config::ArtifactDefaults;
use crate::error::UploadError;
use crate::rest::ApiClient;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, instrument};

/// Firmware registration endpoint
pub const FIRMWARES_PATH: &str = "/api/v1/firmwares";

/// Caller-supplied description of the artifact.
///
/// None of these are derived from the artifact bytes; `checksum` in
/// particular is passed through unchecked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactDescriptor {
    pub version: String,
    pub model: String,
    pub checksum: String,
    pub signed_by: String,
}

impl From<&ArtifactDefaults> for ArtifactDescriptor {
    fn from(defaults: &ArtifactDefaults) -> Self {
        Self {
            version: defaults.version.clone(),
            model: defaults.model.clone(),
            checksum: defaults.checksum.clone(),
            signed_by: defaults.signed_by.clone(),
        }
    }
}

/// Registration body sent once the artifact is stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FirmwareMetadata {
    pub version: String,
    pub model: String,
    pub blob_url: String,
    pub checksum: String,
    pub size: u64,
    pub signed_by: String,
}

impl FirmwareMetadata {
    pub fn new(descriptor: &ArtifactDescriptor, final_url: &str, size: u64) -> Self {
        Self {
            version: descriptor.version.clone(),
            model: descriptor.model.clone(),
            blob_url: final_url.to_string(),
            checksum: descriptor.checksum.clone(),
            size,
            signed_by: descriptor.signed_by.clone(),
        }
    }
}

/// Backend that records stored artifacts
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetadataRegistry: Send + Sync {
    /// Register the artifact; the returned record is opaque
    async fn register(&self, metadata: FirmwareMetadata) -> Result<Value, UploadError>;
}

/// Registration through the REST client
pub struct ApiMetadataRegistry {
    api: ApiClient,
}

impl ApiMetadataRegistry {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }
}

#[async_trait]
impl MetadataRegistry for ApiMetadataRegistry {
    #[instrument(skip(self, metadata), fields(blob_url = %metadata.blob_url, size = metadata.size))]
    async fn register(&self, metadata: FirmwareMetadata) -> Result<Value, UploadError> {
        let record = self.api.post(FIRMWARES_PATH, &metadata).await?;
        info!(version = %metadata.version, model = %metadata.model, "Firmware registered");
        Ok(record)
    }
}
