//! Authenticated JSON-over-HTTP client for the firmware API.

use crate::config::ApiConfig;
use crate::credentials::CredentialStore;
use crate::error::UploadError;
use reqwest::{header, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// REST client bound to one API base URL.
///
/// The session token is looked up on every request; requests without a
/// token are still sent and left for the server to reject. Nothing is
/// cached or retried here.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Arc<dyn CredentialStore>,
}

impl ApiClient {
    /// Create a new client from the API configuration
    pub fn new(
        config: &ApiConfig,
        credentials: Arc<dyn CredentialStore>,
    ) -> Result<Self, UploadError> {
        let mut builder = reqwest::Client::builder().connect_timeout(config.connect_timeout());
        if let Some(timeout) = config.request_timeout() {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            http: builder.build()?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Join an API path onto the base URL
    pub fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    /// GET a JSON document. A 204 response yields `None`.
    #[instrument(skip(self))]
    pub async fn get(&self, path: &str) -> Result<Option<Value>, UploadError> {
        let request = self.authorize(self.http.get(self.url(path))).await?;
        let response = request.send().await?;

        if response.status() == StatusCode::NO_CONTENT {
            debug!(path = %path, "No content");
            return Ok(None);
        }

        let response = ensure_success(response).await?;
        Ok(Some(parse_json(response).await?))
    }

    /// POST a JSON body and return the JSON response.
    #[instrument(skip(self, body))]
    pub async fn post<B>(&self, path: &str, body: &B) -> Result<Value, UploadError>
    where
        B: Serialize + ?Sized + Sync,
    {
        let payload = serde_json::to_vec(body)?;
        let request = self
            .http
            .post(self.url(path))
            .header(header::CONTENT_TYPE, "application/json")
            .body(payload);
        let response = self.authorize(request).await?.send().await?;

        let response = ensure_success(response).await?;
        parse_json(response).await
    }

    async fn authorize(&self, request: RequestBuilder) -> Result<RequestBuilder, UploadError> {
        match self.credentials.get().await? {
            Some(token) => Ok(request.bearer_auth(token)),
            None => {
                debug!("No session token; sending unauthenticated request");
                Ok(request)
            }
        }
    }
}

/// Map a non-2xx response to `UploadError::Request` carrying its body
async fn ensure_success(response: Response) -> Result<Response, UploadError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    warn!(status = status.as_u16(), body = %body, "API request rejected");
    Err(UploadError::Request {
        status: status.as_u16(),
        body,
    })
}

/// Parse a JSON body. An empty 2xx body parses as `null`.
async fn parse_json(response: Response) -> Result<Value, UploadError> {
    let bytes = response.bytes().await?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_slice(&bytes)?)
}
