//! Firmware Uploader
//!
//! Client-side upload orchestration for firmware artifacts. An artifact is
//! written straight to object storage through a server-issued presigned URL
//! and then registered with the firmware API.
//!
//! ## Features
//!
//! - **Presigned uploads**: the API hands out a single-use destination and
//!   the final URL; bytes never pass through the API server
//! - **Progress reporting**: the transfer engine streams the body and reports
//!   the fraction sent to any [`ProgressSink`]
//! - **Guarded state machine**: one run at a time, observable through
//!   [`UploadOrchestrator::subscribe`]
//! - **Session tokens**: a persisted bearer token is attached to every API
//!   request when present
//!
//! ## Architecture
//!
//! ```text
//!  SourceSelector        Firmware API                 Object Storage
//! ┌──────────────┐      ┌──────────────────────┐     ┌──────────────┐
//! │ file / prompt│      │ POST .../presign     │     │              │
//! └──────┬───────┘      │ POST /api/v1/firmwares│    │  PUT bytes   │
//!        │              └──────▲────────▲──────┘     └──────▲───────┘
//!        ▼                     │        │                   │
//! ┌──────────────────────────────────────────────────────────────────┐
//! │ UploadOrchestrator                                               │
//! │  select ──▶ PresignService ──▶ TransferEngine ──▶ MetadataRegistry│
//! └──────────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//!                       ApiClient + CredentialStore
//! ```

pub mod config;
pub mod credentials;
pub mod error;
pub mod metadata;
pub mod orchestrator;
pub mod presign;
pub mod rest;
pub mod retry;
pub mod source;
pub mod transfer;

pub use config::Config;
pub use credentials::{CredentialStore, FileCredentialStore, MemoryCredentialStore};
pub use error::UploadError;
pub use metadata::{ApiMetadataRegistry, ArtifactDescriptor, FirmwareMetadata, MetadataRegistry};
pub use orchestrator::{RunOutcome, UploadOrchestrator, WorkflowState};
pub use presign::{ApiPresignService, PresignGrant, PresignService};
pub use rest::ApiClient;
pub use retry::run_with_retry;
pub use source::{ArtifactSource, ContentHandle, PathSelector, PromptSelector, SourceSelector};
pub use transfer::{ChannelProgress, HttpTransferEngine, NoProgress, ProgressSink, TransferEngine};
