use crate::error::UploadError;
use crate::rest::ApiClient;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

/// Presign endpoint on the firmware API
pub const PRESIGN_PATH: &str = "/api/v1/firmwares/presign";

/// Presign request body
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PresignRequest {
    pub filename: String,
    pub content_type: String,
    pub size: u64,
}

/// Server-issued upload destination.
///
/// `upload_url` is single-use and time-limited; a grant is consumed by one
/// transfer attempt and never reused.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PresignGrant {
    /// Destination for the raw PUT
    pub upload_url: String,
    /// Where the artifact is reachable once stored
    #[serde(rename = "blob_url")]
    pub final_url: String,
}

/// Source of presigned upload destinations
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PresignService: Send + Sync {
    /// Request a destination for an artifact of known name, type and size
    async fn request_presign(
        &self,
        name: &str,
        content_type: &str,
        size_bytes: u64,
    ) -> Result<PresignGrant, UploadError>;
}

/// Presign requests sent through the REST client
pub struct ApiPresignService {
    api: ApiClient,
}

impl ApiPresignService {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }
}

#[async_trait]
impl PresignService for ApiPresignService {
    #[instrument(skip(self))]
    async fn request_presign(
        &self,
        name: &str,
        content_type: &str,
        size_bytes: u64,
    ) -> Result<PresignGrant, UploadError> {
        let request = PresignRequest {
            filename: name.to_string(),
            content_type: content_type.to_string(),
            size: size_bytes,
        };

        let response = self.api.post(PRESIGN_PATH, &request).await?;
        let grant: PresignGrant = serde_json::from_value(response)?;

        info!(final_url = %grant.final_url, "Presigned upload granted");
        Ok(grant)
    }
}
