//! Artifact selection.
//!
//! A selector either yields an [`ArtifactSource`] or reports that the user
//! backed out, which ends the workflow run without an error.

use crate::error::UploadError;
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Readable artifact bytes
pub type ContentHandle = Box<dyn AsyncRead + Send + Sync + Unpin>;

const DEFAULT_NAME: &str = "firmware.bin";
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// An artifact picked for upload
pub struct ArtifactSource {
    pub name: String,
    pub content_type: String,
    pub size_bytes: u64,
    pub content: ContentHandle,
}

impl ArtifactSource {
    /// Build a source from an already-open handle. Empty names and content
    /// types fall back to `firmware.bin` and `application/octet-stream`.
    pub fn new(
        name: impl Into<String>,
        content_type: impl Into<String>,
        size_bytes: u64,
        content: ContentHandle,
    ) -> Self {
        let name = non_empty_or(name.into(), DEFAULT_NAME);
        let content_type = non_empty_or(content_type.into(), DEFAULT_CONTENT_TYPE);
        Self {
            name,
            content_type,
            size_bytes,
            content,
        }
    }

    /// Open a file on disk as an artifact
    pub async fn from_path(path: &Path) -> Result<Self, UploadError> {
        let file = tokio::fs::File::open(path)
            .await
            .map_err(UploadError::Source)?;
        let size_bytes = file.metadata().await.map_err(UploadError::Source)?.len();

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let content_type = get_content_type(path);

        debug!(
            path = %path.display(),
            size_bytes = size_bytes,
            content_type = %content_type,
            "Opened artifact"
        );

        Ok(Self::new(name, content_type, size_bytes, Box::new(file)))
    }
}

impl fmt::Debug for ArtifactSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtifactSource")
            .field("name", &self.name)
            .field("content_type", &self.content_type)
            .field("size_bytes", &self.size_bytes)
            .finish_non_exhaustive()
    }
}

fn non_empty_or(value: String, fallback: &str) -> String {
    if value.trim().is_empty() {
        fallback.to_string()
    } else {
        value
    }
}

/// Get content type for a firmware file extension
fn get_content_type(path: &Path) -> String {
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "zip" => "application/zip".to_string(),
        "gz" | "tgz" => "application/gzip".to_string(),
        "tar" => "application/x-tar".to_string(),
        "hex" | "ihex" => "text/x-hex".to_string(),
        "json" => "application/json".to_string(),
        "elf" => "application/x-elf".to_string(),
        _ => DEFAULT_CONTENT_TYPE.to_string(),
    }
}

/// Picks the artifact for a workflow run
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SourceSelector: Send + Sync {
    /// `Ok(None)` means the selection was cancelled
    async fn select(&self) -> Result<Option<ArtifactSource>, UploadError>;
}

/// Selects a fixed file. No path means there is nothing to upload.
pub struct PathSelector {
    path: Option<PathBuf>,
}

impl PathSelector {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }
}

#[async_trait]
impl SourceSelector for PathSelector {
    async fn select(&self) -> Result<Option<ArtifactSource>, UploadError> {
        match &self.path {
            Some(path) => ArtifactSource::from_path(path).await.map(Some),
            None => Ok(None),
        }
    }
}

/// Asks for a path on an interactive reader. A blank line or end of input
/// cancels.
pub struct PromptSelector<R> {
    reader: Mutex<R>,
}

impl<R> PromptSelector<R>
where
    R: AsyncBufRead + Send + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader: Mutex::new(reader),
        }
    }
}

#[async_trait]
impl<R> SourceSelector for PromptSelector<R>
where
    R: AsyncBufRead + Send + Unpin,
{
    async fn select(&self) -> Result<Option<ArtifactSource>, UploadError> {
        eprint!("Firmware file (leave empty to cancel): ");

        let mut line = String::new();
        let read = self
            .reader
            .lock()
            .await
            .read_line(&mut line)
            .await
            .map_err(UploadError::Source)?;

        let path = line.trim();
        if read == 0 || path.is_empty() {
            info!("No firmware file chosen");
            return Ok(None);
        }

        ArtifactSource::from_path(Path::new(path)).await.map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_get_content_type() {
        assert_eq!(get_content_type(Path::new("fw.bin")), "application/octet-stream");
        assert_eq!(get_content_type(Path::new("fw.ZIP")), "application/zip");
        assert_eq!(get_content_type(Path::new("fw.tar.gz")), "application/gzip");
        assert_eq!(get_content_type(Path::new("fw.hex")), "text/x-hex");
        assert_eq!(get_content_type(Path::new("firmware")), "application/octet-stream");
    }

    #[test]
    fn test_empty_fields_fall_back() {
        let source = ArtifactSource::new("", " ", 0, Box::new(tokio::io::empty()));
        assert_eq!(source.name, "firmware.bin");
        assert_eq!(source.content_type, "application/octet-stream");
    }

    #[tokio::test]
    async fn test_from_path() {
        let mut file = tempfile::Builder::new().suffix(".zip").tempfile().unwrap();
        file.write_all(&[7u8; 300]).unwrap();

        let source = ArtifactSource::from_path(file.path()).await.unwrap();
        assert_eq!(source.size_bytes, 300);
        assert_eq!(source.content_type, "application/zip");
        assert!(source.name.ends_with(".zip"));
    }

    #[tokio::test]
    async fn test_missing_file_is_source_error() {
        let result = ArtifactSource::from_path(Path::new("/definitely/not/here.bin")).await;
        assert!(matches!(result, Err(UploadError::Source(_))));
    }

    #[tokio::test]
    async fn test_path_selector_without_path_cancels() {
        let selector = PathSelector::new(None);
        assert!(selector.select().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_prompt_selector_blank_line_cancels() {
        let selector = PromptSelector::new(&b"\n"[..]);
        assert!(selector.select().await.unwrap().is_none());

        let eof = PromptSelector::new(&b""[..]);
        assert!(eof.select().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_prompt_selector_opens_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"firmware").unwrap();
        let input = format!("{}\n", file.path().display());

        let selector = PromptSelector::new(std::io::Cursor::new(input.into_bytes()));
        let source = selector.select().await.unwrap().unwrap();
        assert_eq!(source.size_bytes, 8);
    }
}
