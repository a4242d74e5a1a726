use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use firmware_uploader::{
    config::ServiceConfig, run_with_retry, ApiClient, ApiMetadataRegistry, ApiPresignService,
    ArtifactDescriptor, Config, CredentialStore, FileCredentialStore, HttpTransferEngine,
    PathSelector, PromptSelector, RunOutcome, SourceSelector, UploadOrchestrator, WorkflowState,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::oneshot;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Upload firmware images through presigned storage URLs
#[derive(Parser)]
#[command(name = "firmware-uploader")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Override the API base URL
    #[arg(long, global = true)]
    api_base: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a session token for later requests
    Login {
        #[arg(long)]
        token: String,
    },
    /// Remove the stored session token
    Logout,
    /// GET an API path and print the JSON response
    Get { path: String },
    /// Pick a firmware file, upload it and register its metadata
    Upload {
        /// Firmware file; prompts on stdin when omitted
        file: Option<PathBuf>,
        #[arg(long)]
        version: Option<String>,
        #[arg(long)]
        model: Option<String>,
        /// Passed through to the backend unchecked
        #[arg(long)]
        checksum: Option<String>,
        #[arg(long)]
        signed_by: Option<String>,
        /// Total attempts for transient failures
        #[arg(long)]
        retries: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = Config::load().context("Failed to load configuration")?;
    if let Some(base_url) = cli.api_base {
        config.api.base_url = base_url;
        config.validate().context("Invalid --api-base")?;
    }

    // Initialize logging
    init_tracing(&config.service)?;

    let credentials: Arc<dyn CredentialStore> =
        Arc::new(FileCredentialStore::new(config.token_path()));

    match cli.command {
        Commands::Login { token } => {
            credentials.save(&token).await.context("Failed to save token")?;
            println!("Logged in");
        }
        Commands::Logout => {
            credentials.clear().await.context("Failed to remove token")?;
            println!("Logged out");
        }
        Commands::Get { path } => {
            let api = ApiClient::new(&config.api, credentials)?;
            match api.get(&path).await? {
                Some(json) => println!("{}", serde_json::to_string_pretty(&json)?),
                None => println!("no content"),
            }
        }
        Commands::Upload {
            file,
            version,
            model,
            checksum,
            signed_by,
            retries,
        } => {
            let mut descriptor = ArtifactDescriptor::from(&config.artifact);
            if let Some(v) = version {
                descriptor.version = v;
            }
            if let Some(m) = model {
                descriptor.model = m;
            }
            if let Some(c) = checksum {
                descriptor.checksum = c;
            }
            if let Some(s) = signed_by {
                descriptor.signed_by = s;
            }
            if let Some(r) = retries {
                config.retry.max_attempts = r.max(1);
            }

            let selector: Arc<dyn SourceSelector> = match file {
                Some(path) => Arc::new(PathSelector::new(Some(path))),
                None => Arc::new(PromptSelector::new(BufReader::new(tokio::io::stdin()))),
            };

            upload(&config, credentials, selector, &descriptor).await?;
        }
    }

    Ok(())
}

async fn upload(
    config: &Config,
    credentials: Arc<dyn CredentialStore>,
    selector: Arc<dyn SourceSelector>,
    descriptor: &ArtifactDescriptor,
) -> Result<()> {
    let api = ApiClient::new(&config.api, credentials)?;
    let transfer =
        HttpTransferEngine::new(&config.transfer).context("Failed to create transfer engine")?;

    let orchestrator = UploadOrchestrator::new(
        selector,
        Arc::new(ApiPresignService::new(api.clone())),
        Arc::new(transfer),
        Arc::new(ApiMetadataRegistry::new(api)),
    );

    let (done_tx, done_rx) = oneshot::channel();
    let progress_handle = tokio::spawn(render_progress(orchestrator.subscribe(), done_rx));

    let result = run_with_retry(&orchestrator, descriptor, &config.retry).await;
    orchestrator.acknowledge();
    let _ = done_tx.send(());
    let _ = progress_handle.await;

    match result {
        Ok(RunOutcome::Succeeded(record)) => {
            info!("Upload complete");
            println!("Upload complete");
            if !record.is_null() {
                println!("{}", serde_json::to_string_pretty(&record)?);
            }
            Ok(())
        }
        Ok(RunOutcome::Cancelled) => {
            println!("Upload cancelled");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Upload failed");
            Err(anyhow::Error::new(e).context("Upload failed"))
        }
    }
}

/// Print progress lines until `done` fires or every sender is gone.
/// Events already queued when `done` fires are still printed.
async fn render_progress(
    mut events: broadcast::Receiver<WorkflowState>,
    mut done: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            event = events.recv() => match event {
                Ok(state) => render(&state),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped = skipped, "Progress display fell behind");
                }
                Err(RecvError::Closed) => break,
            },
            _ = &mut done => {
                while let Ok(state) = events.try_recv() {
                    render(&state);
                }
                break;
            }
        }
    }
}

fn render(state: &WorkflowState) {
    match state {
        WorkflowState::Transferring(p) => eprintln!("Progress: {:.1}%", p * 100.0),
        WorkflowState::Presigning => eprintln!("Requesting upload URL..."),
        WorkflowState::RegisteringMetadata => eprintln!("Registering firmware..."),
        _ => {}
    }
}

/// Initialize tracing/logging
fn init_tracing(config: &ServiceConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .context("Invalid log level")?;

    let registry = tracing_subscriber::registry().with(env_filter);

    if config.log_format == "json" {
        registry.with(fmt::layer().json().with_writer(std::io::stderr)).init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }

    Ok(())
}
