//! Caller-side retry around whole workflow runs.
//!
//! The orchestrator never retries. This loop starts a new run from `Idle`
//! after a transient failure, so every attempt selects the source and asks
//! for a fresh presigned grant.

use crate::config::RetryConfig;
use crate::error::UploadError;
use crate::metadata::ArtifactDescriptor;
use crate::orchestrator::{RunOutcome, UploadOrchestrator};
use backoff::{backoff::Backoff, ExponentialBackoff};
use tracing::{error, warn};

/// Run the workflow up to `config.max_attempts` times.
///
/// The orchestrator must be `Idle` on entry. A failed final attempt is
/// left in `Failed` for the caller to present and acknowledge.
pub async fn run_with_retry(
    orchestrator: &UploadOrchestrator,
    descriptor: &ArtifactDescriptor,
    config: &RetryConfig,
) -> Result<RunOutcome, UploadError> {
    let mut backoff = ExponentialBackoff {
        initial_interval: config.initial_delay(),
        max_interval: config.max_delay(),
        max_elapsed_time: None,
        ..Default::default()
    };

    let max_attempts = config.max_attempts.max(1);
    let mut attempts = 0u32;

    loop {
        attempts += 1;

        let err = match orchestrator.start(descriptor).await {
            Ok(outcome) => return Ok(outcome),
            Err(e) => e,
        };

        if !err.is_transient() || attempts >= max_attempts {
            if attempts > 1 {
                error!(attempts = attempts, error = %err, "Upload failed after retries");
            }
            return Err(err);
        }

        let delay = backoff.next_backoff().unwrap_or_else(|| config.max_delay());
        warn!(
            attempt = attempts,
            delay_ms = delay.as_millis(),
            error = %err,
            "Upload failed, retrying with a fresh grant"
        );
        tokio::time::sleep(delay).await;

        orchestrator.acknowledge();
    }
}
