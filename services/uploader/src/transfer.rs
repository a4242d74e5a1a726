use crate::config::TransferConfig;
use crate::error::UploadError;
use crate::source::ContentHandle;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use reqwest::header;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, instrument, warn};

/// First local read error hit while streaming the body
type ReadFailure = Arc<Mutex<Option<std::io::Error>>>;

/// Receives fractional transfer progress in `[0.0, 1.0]`
pub trait ProgressSink: Send + Sync {
    fn report(&self, fraction: f64);
}

impl<F> ProgressSink for F
where
    F: Fn(f64) + Send + Sync,
{
    fn report(&self, fraction: f64) {
        self(fraction)
    }
}

/// Progress forwarded over a channel. A closed receiver is ignored.
pub struct ChannelProgress(pub mpsc::UnboundedSender<f64>);

impl ProgressSink for ChannelProgress {
    fn report(&self, fraction: f64) {
        let _ = self.0.send(fraction);
    }
}

/// Discards progress
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _fraction: f64) {}
}

/// Writes artifact bytes to a presigned destination
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TransferEngine: Send + Sync {
    /// PUT the whole content to `destination_url`.
    ///
    /// Progress is reported only when `total_bytes` is known and non-zero.
    /// Each call is independent; a retry needs a fresh destination.
    async fn transfer(
        &self,
        destination_url: &str,
        content: ContentHandle,
        content_type: &str,
        total_bytes: Option<u64>,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<(), UploadError>;
}

/// Streams artifacts to storage with a raw HTTP PUT
pub struct HttpTransferEngine {
    client: reqwest::Client,
    chunk_size: usize,
}

impl HttpTransferEngine {
    /// Create a new transfer engine
    pub fn new(config: &TransferConfig) -> Result<Self, UploadError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.timeout() {
            builder = builder.timeout(timeout);
        }

        let client = builder.build().map_err(|e| UploadError::Transfer {
            status: None,
            message: e.to_string(),
        })?;

        Ok(Self {
            client,
            chunk_size: config.chunk_size_bytes.max(1),
        })
    }
}

#[async_trait]
impl TransferEngine for HttpTransferEngine {
    #[instrument(skip(self, content, progress))]
    async fn transfer(
        &self,
        destination_url: &str,
        content: ContentHandle,
        content_type: &str,
        total_bytes: Option<u64>,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<(), UploadError> {
        let read_failure = ReadFailure::default();
        let body = progress_body(
            content,
            self.chunk_size,
            total_bytes,
            progress,
            read_failure.clone(),
        );

        let mut request = self
            .client
            .put(destination_url)
            .header(header::CONTENT_TYPE, content_type)
            .body(body);
        if let Some(total) = total_bytes {
            request = request.header(header::CONTENT_LENGTH, total);
        }

        debug!(total_bytes = ?total_bytes, "Starting presigned PUT");

        let sent = request.send().await;

        // A broken local read is not a transport fault, whatever the server made of it
        if let Some(e) = read_failure.lock().take() {
            warn!(error = %e, "Artifact read failed during PUT");
            return Err(UploadError::Source(e));
        }

        let response = sent.map_err(|e| {
            warn!(error = %e, "Presigned PUT got no response");
            UploadError::Transfer {
                status: None,
                message: e.to_string(),
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %message, "Presigned PUT rejected");
            return Err(UploadError::Transfer {
                status: Some(status.as_u16()),
                message,
            });
        }

        info!(status = status.as_u16(), "Artifact stored");
        Ok(())
    }
}

/// Wrap the content in a streaming body that reports the fraction of bytes
/// handed to the transport so far.
fn progress_body(
    content: ContentHandle,
    chunk_size: usize,
    total_bytes: Option<u64>,
    progress: Arc<dyn ProgressSink>,
    read_failure: ReadFailure,
) -> reqwest::Body {
    reqwest::Body::wrap_stream(progress_stream(
        content,
        chunk_size,
        total_bytes,
        progress,
        read_failure,
    ))
}

fn progress_stream(
    content: ContentHandle,
    chunk_size: usize,
    total_bytes: Option<u64>,
    progress: Arc<dyn ProgressSink>,
    read_failure: ReadFailure,
) -> impl Stream<Item = std::io::Result<Bytes>> + Send + Sync + 'static {
    let total = total_bytes.filter(|t| *t > 0);
    let mut sent: u64 = 0;

    ReaderStream::with_capacity(content, chunk_size).map(move |chunk: std::io::Result<Bytes>| {
        match (&chunk, total) {
            (Ok(bytes), Some(total)) => {
                sent += bytes.len() as u64;
                progress.report((sent as f64 / total as f64).min(1.0));
            }
            (Ok(_), None) => {}
            (Err(e), _) => {
                read_failure
                    .lock()
                    .get_or_insert_with(|| std::io::Error::new(e.kind(), e.to_string()));
            }
        }
        chunk
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};

    /// Reader whose device goes away
    struct BrokenReader;

    impl AsyncRead for BrokenReader {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            Poll::Ready(Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "device removed",
            )))
        }
    }

    fn recorder() -> (Arc<Mutex<Vec<f64>>>, Arc<dyn ProgressSink>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        let sink: Arc<dyn ProgressSink> = Arc::new(move |p: f64| sink_seen.lock().push(p));
        (seen, sink)
    }

    async fn collect_len(
        stream: impl Stream<Item = std::io::Result<Bytes>>,
    ) -> usize {
        stream
            .map(|chunk| chunk.unwrap().len())
            .fold(0, |acc, n| async move { acc + n })
            .await
    }

    #[test]
    fn test_closure_is_progress_sink() {
        let (seen, sink) = recorder();
        sink.report(0.25);
        sink.report(0.5);
        assert_eq!(*seen.lock(), vec![0.25, 0.5]);
    }

    #[tokio::test]
    async fn test_channel_progress() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = ChannelProgress(tx);
        sink.report(0.75);
        assert_eq!(rx.recv().await, Some(0.75));

        drop(rx);
        // Closed channel must not panic
        sink.report(1.0);
    }

    #[tokio::test]
    async fn test_progress_is_monotonic_and_complete() {
        let (seen, sink) = recorder();
        let content: ContentHandle = Box::new(std::io::Cursor::new(vec![9u8; 10]));

        let len = collect_len(progress_stream(content, 4, Some(10), sink, ReadFailure::default())).await;
        assert_eq!(len, 10);

        let seen = seen.lock();
        assert!(!seen.is_empty());
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*seen.last().unwrap(), 1.0);
    }

    #[tokio::test]
    async fn test_unknown_length_reports_nothing() {
        let (seen, sink) = recorder();
        let content: ContentHandle = Box::new(std::io::Cursor::new(vec![9u8; 10]));

        let len = collect_len(progress_stream(content, 4, None, sink, ReadFailure::default())).await;
        assert_eq!(len, 10);
        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_zero_length_reports_nothing() {
        let (seen, sink) = recorder();
        let content: ContentHandle = Box::new(tokio::io::empty());

        let len = collect_len(progress_stream(content, 4, Some(0), sink, ReadFailure::default())).await;
        assert_eq!(len, 0);
        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_understated_length_is_clamped() {
        let (seen, sink) = recorder();
        let content: ContentHandle = Box::new(std::io::Cursor::new(vec![9u8; 10]));

        collect_len(progress_stream(content, 4, Some(5), sink, ReadFailure::default())).await;
        assert!(seen.lock().iter().all(|p| *p <= 1.0));
    }

    #[tokio::test]
    async fn test_read_error_is_recorded() {
        let (seen, sink) = recorder();
        let failure = ReadFailure::default();
        let content: ContentHandle =
            Box::new(std::io::Cursor::new(vec![9u8; 4]).chain(BrokenReader));

        let chunks: Vec<_> = progress_stream(content, 4, Some(10), sink, failure.clone())
            .collect()
            .await;

        assert!(chunks.first().unwrap().is_ok());
        assert!(chunks.last().unwrap().is_err());
        assert_eq!(*seen.lock(), vec![0.4]);

        let recorded = failure.lock().take().unwrap();
        assert_eq!(recorded.kind(), std::io::ErrorKind::Other);
        assert_eq!(recorded.to_string(), "device removed");
    }

    #[test]
    fn test_engine_clamps_chunk_size() {
        let engine = HttpTransferEngine::new(&TransferConfig {
            chunk_size_bytes: 0,
            timeout_secs: None,
        })
        .unwrap();
        assert_eq!(engine.chunk_size, 1);
    }
}
