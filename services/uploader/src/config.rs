use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for the firmware uploader
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// REST API configuration
    #[serde(default)]
    pub api: ApiConfig,
    /// Storage transfer configuration
    #[serde(default)]
    pub transfer: TransferConfig,
    /// Session token persistence
    #[serde(default)]
    pub credentials: CredentialsConfig,
    /// Metadata values registered alongside the artifact
    #[serde(default)]
    pub artifact: ArtifactDefaults,
    /// Caller-side retry policy
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log format (json or pretty)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

/// REST API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Base URL every API path is joined onto
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// TCP connect timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Whole-request timeout in seconds (unset = no timeout)
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

/// Presigned PUT configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TransferConfig {
    /// Read size for the streamed body; one progress event per chunk
    #[serde(default = "default_chunk_size")]
    pub chunk_size_bytes: usize,
    /// Whole-transfer timeout in seconds (unset = no timeout)
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CredentialsConfig {
    /// Token file location; defaults to the per-user config directory
    #[serde(default)]
    pub token_path: Option<PathBuf>,
}

/// Values sent with metadata registration. The uploader does not inspect
/// the artifact, so these are supplied by the caller.
#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactDefaults {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_checksum")]
    pub checksum: String,
    #[serde(default = "default_signed_by")]
    pub signed_by: String,
}

/// Retry policy applied on top of the orchestrator
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Total workflow runs, including the first (1 = no retry)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// First backoff delay in milliseconds
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Backoff ceiling in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_base_url() -> String {
    "http://10.0.2.2:3000".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_chunk_size() -> usize {
    64 * 1024 // 64KB
}

fn default_version() -> String {
    "vX.Y.Z".to_string()
}

fn default_model() -> String {
    "modelX".to_string()
}

fn default_checksum() -> String {
    "sha256:TODO".to_string()
}

fn default_signed_by() -> String {
    "ci-signing-key".to_string()
}

fn default_max_attempts() -> u32 {
    1
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    10_000
}

impl Config {
    /// Load configuration from config files and environment
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/uploader").required(false))
            .add_source(config::File::with_name("/etc/firmware-uploader/uploader").required(false))
            // UPLOADER__API__BASE_URL -> api.base_url
            .add_source(
                config::Environment::with_prefix("UPLOADER")
                    .separator("__")
                    .try_parsing(true),
            )
            // Older deployments only set API_BASE
            .set_override_option("api.base_url", std::env::var("API_BASE").ok())?
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the loaded configuration
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        let base_url = self.api.base_url.trim();
        if base_url.is_empty() {
            return Err(ConfigValidationError::MissingField("api.base_url".to_string()));
        }
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigValidationError::InvalidValue {
                field: "api.base_url".to_string(),
                message: "must start with http:// or https://".to_string(),
            });
        }
        if self.transfer.chunk_size_bytes == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "transfer.chunk_size_bytes".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "retry.max_attempts".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Resolve the token file location
    pub fn token_path(&self) -> PathBuf {
        self.credentials.token_path.clone().unwrap_or_else(|| {
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("firmware-uploader")
                .join("fm_token")
        })
    }
}

impl ApiConfig {
    /// Get connect timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Get request timeout as Duration, if one is configured
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}

impl TransferConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

impl RetryConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service: ServiceConfig::default(),
            api: ApiConfig::default(),
            transfer: TransferConfig::default(),
            credentials: CredentialsConfig::default(),
            artifact: ArtifactDefaults::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: None,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size_bytes: default_chunk_size(),
            timeout_secs: None,
        }
    }
}

impl Default for ArtifactDefaults {
    fn default() -> Self {
        Self {
            version: default_version(),
            model: default_model(),
            checksum: default_checksum(),
            signed_by: default_signed_by(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}
