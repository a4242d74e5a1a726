use thiserror::Error;

/// Errors raised by the upload workflow and its collaborators.
#[derive(Debug, Error)]
pub enum UploadError {
    /// Non-2xx REST response; `body` is the raw response text.
    #[error("{status} {body}")]
    Request { status: u16, body: String },

    /// The REST call produced no response at all.
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected response body: {0}")]
    Decode(#[from] serde_json::Error),

    /// The presigned PUT failed. `status` is `None` when no response arrived.
    #[error("{}", transfer_message(.status, .message))]
    Transfer {
        status: Option<u16>,
        message: String,
    },

    #[error("an upload is already in progress")]
    AlreadyInProgress,

    /// Source selection was abandoned. Not surfaced as a failure.
    #[error("source selection cancelled")]
    SourceSelectionCancelled,

    #[error("failed to read artifact: {0}")]
    Source(#[source] std::io::Error),

    #[error("credential store error: {0}")]
    Credentials(#[source] std::io::Error),
}

fn transfer_message(status: &Option<u16>, message: &str) -> String {
    match status {
        Some(code) => format!("Upload failed with status {code}"),
        None => format!("Upload error: {message}"),
    }
}

impl UploadError {
    /// Whether a fresh workflow run has a reasonable chance of succeeding.
    pub fn is_transient(&self) -> bool {
        match self {
            UploadError::Request { status, .. } => *status >= 500,
            UploadError::Http(_) => true,
            UploadError::Transfer { status: None, .. } => true,
            UploadError::Transfer {
                status: Some(code), ..
            } => *code >= 500,
            _ => false,
        }
    }

    /// HTTP status attached to the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            UploadError::Request { status, .. } => Some(*status),
            UploadError::Transfer { status, .. } => *status,
            _ => None,
        }
    }
}
