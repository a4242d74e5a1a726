//! Session token persistence.
//!
//! At most one token is held per device. It is written on login, read on
//! every authenticated request and removed on logout.

use crate::error::UploadError;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Storage for the opaque session token
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Current token, or `None` when logged out
    async fn get(&self) -> Result<Option<String>, UploadError>;

    /// Replace the stored token
    async fn save(&self, token: &str) -> Result<(), UploadError>;

    /// Remove the stored token. Succeeds when nothing is stored.
    async fn clear(&self) -> Result<(), UploadError>;
}

/// Token kept in a single file that survives process restarts
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn get(&self) -> Result<Option<String>, UploadError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => {
                let token = contents.trim();
                if token.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(token.to_string()))
                }
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(UploadError::Credentials(e)),
        }
    }

    async fn save(&self, token: &str) -> Result<(), UploadError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(UploadError::Credentials)?;
        }

        tokio::fs::write(&self.path, token)
            .await
            .map_err(UploadError::Credentials)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))
                .await
                .map_err(UploadError::Credentials)?;
        }

        info!(path = %self.path.display(), "Session token saved");
        Ok(())
    }

    async fn clear(&self) -> Result<(), UploadError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                info!(path = %self.path.display(), "Session token removed");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No session token to remove");
                Ok(())
            }
            Err(e) => Err(UploadError::Credentials(e)),
        }
    }
}

/// Process-local token store
#[derive(Default)]
pub struct MemoryCredentialStore {
    token: RwLock<Option<String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(Some(token.into())),
        }
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get(&self) -> Result<Option<String>, UploadError> {
        Ok(self.token.read().clone())
    }

    async fn save(&self, token: &str) -> Result<(), UploadError> {
        *self.token.write() = Some(token.to_string());
        Ok(())
    }

    async fn clear(&self) -> Result<(), UploadError> {
        *self.token.write() = None;
        Ok(())
    }
}
