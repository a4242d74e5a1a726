//! Upload workflow state machine.
//!
//! One run goes select → presign → transfer → register. The orchestrator
//! owns the only [`WorkflowState`] and is its only writer; progress updates
//! from the transfer step are the one thing that lands concurrently, and
//! each replaces the previous value under the state lock.
//!
//! ```text
//! Idle ──start──▶ SelectingSource ──chosen──▶ Presigning ──grant──▶ Transferring(p)
//!   ▲                   │ cancelled               │ error               │ error   │ done
//!   │◀──────────────────┘                         ▼                     ▼         ▼
//!   │◀──acknowledge── Succeeded ◀──accepted── RegisteringMetadata    Failed ◀─────┘
//!   └◀──acknowledge────────────────────────────────────────────────── Failed
//! ```

use crate::error::UploadError;
use crate::metadata::{ArtifactDescriptor, FirmwareMetadata, MetadataRegistry};
use crate::presign::PresignService;
use crate::source::{ArtifactSource, SourceSelector};
use crate::transfer::{ProgressSink, TransferEngine};
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

const EVENT_CAPACITY: usize = 1024;

/// Failure reason recorded when a run is dropped before it finishes
pub const ABANDONED_REASON: &str = "upload abandoned";

/// Visible state of the upload workflow
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowState {
    Idle,
    SelectingSource,
    Presigning,
    /// Fraction of bytes sent, in `[0.0, 1.0]`
    Transferring(f64),
    RegisteringMetadata,
    Succeeded,
    /// Human-readable failure reason
    Failed(String),
}

impl WorkflowState {
    /// Progress shown for this state; zero outside of a transfer
    pub fn progress(&self) -> f64 {
        match self {
            WorkflowState::Transferring(p) => *p,
            _ => 0.0,
        }
    }

    /// A run is in flight
    pub fn is_uploading(&self) -> bool {
        matches!(
            self,
            WorkflowState::SelectingSource
                | WorkflowState::Presigning
                | WorkflowState::Transferring(_)
                | WorkflowState::RegisteringMetadata
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowState::Succeeded | WorkflowState::Failed(_))
    }
}

/// How a run that was allowed to start ended, short of failing
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Artifact stored and registered; carries the backend's record
    Succeeded(Value),
    /// Source selection was abandoned; the orchestrator is back to `Idle`
    Cancelled,
}

/// Sequences one upload run at a time
pub struct UploadOrchestrator {
    selector: Arc<dyn SourceSelector>,
    presign: Arc<dyn PresignService>,
    transfer: Arc<dyn TransferEngine>,
    registry: Arc<dyn MetadataRegistry>,
    state: Arc<RwLock<WorkflowState>>,
    events: broadcast::Sender<WorkflowState>,
}

impl UploadOrchestrator {
    pub fn new(
        selector: Arc<dyn SourceSelector>,
        presign: Arc<dyn PresignService>,
        transfer: Arc<dyn TransferEngine>,
        registry: Arc<dyn MetadataRegistry>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            selector,
            presign,
            transfer,
            registry,
            state: Arc::new(RwLock::new(WorkflowState::Idle)),
            events,
        }
    }

    /// Get the current workflow state.
    pub fn state(&self) -> WorkflowState {
        self.state.read().clone()
    }

    pub fn progress(&self) -> f64 {
        self.state.read().progress()
    }

    pub fn is_uploading(&self) -> bool {
        self.state.read().is_uploading()
    }

    /// Receive every state change from now on, progress updates included
    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowState> {
        self.events.subscribe()
    }

    /// Run the workflow once.
    ///
    /// Only accepted from `Idle`; otherwise `AlreadyInProgress` is returned
    /// and the current state is left alone. A failure in any step ends the
    /// run in `Failed` and is returned; nothing is retried here.
    #[instrument(skip_all, fields(version = %descriptor.version, model = %descriptor.model))]
    pub async fn start(&self, descriptor: &ArtifactDescriptor) -> Result<RunOutcome, UploadError> {
        let guard = self.begin()?;
        let result = self.run(descriptor).await;
        guard.disarm();
        self.finish(result)
    }

    /// Leave a terminal state. Returns false when there was nothing to
    /// acknowledge.
    pub fn acknowledge(&self) -> bool {
        let mut state = self.state.write();
        if !state.is_terminal() {
            return false;
        }
        *state = WorkflowState::Idle;
        let _ = self.events.send(WorkflowState::Idle);
        true
    }

    fn begin(&self) -> Result<RunGuard, UploadError> {
        let mut state = self.state.write();
        if *state != WorkflowState::Idle {
            warn!(state = ?*state, "Upload requested while another run is active");
            return Err(UploadError::AlreadyInProgress);
        }
        *state = WorkflowState::SelectingSource;
        let _ = self.events.send(WorkflowState::SelectingSource);
        Ok(RunGuard {
            state: self.state.clone(),
            events: self.events.clone(),
            armed: true,
        })
    }

    async fn run(&self, descriptor: &ArtifactDescriptor) -> Result<RunOutcome, UploadError> {
        let source = match self.selector.select().await? {
            Some(source) => source,
            None => return Err(UploadError::SourceSelectionCancelled),
        };

        info!(
            name = %source.name,
            content_type = %source.content_type,
            size_bytes = source.size_bytes,
            "Artifact selected"
        );

        self.set_state(WorkflowState::Presigning);
        let grant = self
            .presign
            .request_presign(&source.name, &source.content_type, source.size_bytes)
            .await?;

        // The grant is consumed by this transfer and dropped with the run
        let ArtifactSource {
            content_type,
            size_bytes,
            content,
            ..
        } = source;

        self.set_state(WorkflowState::Transferring(0.0));
        self.transfer
            .transfer(
                &grant.upload_url,
                content,
                &content_type,
                Some(size_bytes),
                self.progress_sink(),
            )
            .await?;
        advance_progress(&self.state, &self.events, 1.0);

        self.set_state(WorkflowState::RegisteringMetadata);
        let record = self
            .registry
            .register(FirmwareMetadata::new(descriptor, &grant.final_url, size_bytes))
            .await?;

        Ok(RunOutcome::Succeeded(record))
    }

    /// Single exit point for a run; progress resets because no terminal
    /// state carries any.
    fn finish(&self, result: Result<RunOutcome, UploadError>) -> Result<RunOutcome, UploadError> {
        match result {
            Ok(outcome) => {
                info!("Upload complete");
                self.set_state(WorkflowState::Succeeded);
                Ok(outcome)
            }
            Err(UploadError::SourceSelectionCancelled) => {
                info!("Source selection cancelled");
                self.set_state(WorkflowState::Idle);
                Ok(RunOutcome::Cancelled)
            }
            Err(e) => {
                warn!(error = %e, "Upload failed");
                self.set_state(WorkflowState::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    fn set_state(&self, next: WorkflowState) {
        let mut state = self.state.write();
        debug!(from = ?*state, to = ?next, "Workflow transition");
        *state = next.clone();
        let _ = self.events.send(next);
    }

    fn progress_sink(&self) -> Arc<dyn ProgressSink> {
        let state = self.state.clone();
        let events = self.events.clone();
        Arc::new(move |fraction: f64| advance_progress(&state, &events, fraction))
    }
}

/// Marks a run `Failed` if its future is dropped before `finish` runs,
/// e.g. under a caller timeout or `select!`.
struct RunGuard {
    state: Arc<RwLock<WorkflowState>>,
    events: broadcast::Sender<WorkflowState>,
    armed: bool,
}

impl RunGuard {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.state.write();
        if state.is_uploading() {
            warn!(state = ?*state, "Upload run dropped before completion");
            let failed = WorkflowState::Failed(ABANDONED_REASON.to_string());
            *state = failed.clone();
            let _ = self.events.send(failed);
        }
    }
}

/// Move transfer progress forward. Regressions, non-finite values and
/// updates arriving outside `Transferring` are dropped.
fn advance_progress(
    state: &RwLock<WorkflowState>,
    events: &broadcast::Sender<WorkflowState>,
    fraction: f64,
) {
    if !fraction.is_finite() {
        return;
    }
    let fraction = fraction.clamp(0.0, 1.0);

    let mut state = state.write();
    if let WorkflowState::Transferring(current) = &mut *state {
        if fraction > *current {
            *current = fraction;
            let _ = events.send(WorkflowState::Transferring(fraction));
        }
    }
}
