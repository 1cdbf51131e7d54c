//! Server configuration, parsed from a TOML file plus environment variable overrides.
//!
//! Priority: environment variables > config file > defaults.

use anyhow::{Context, Result};
use echomi_push::{AlarmConfig, ApprovalConfig, CollectionConfig, OrchestratorConfig, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// General server settings
    #[serde(default)]
    pub server: ServerSection,

    /// Backend the companion reports to
    pub backend: BackendSection,

    /// Signed-in user
    #[serde(default)]
    pub identity: IdentitySection,

    #[serde(default)]
    pub alarm: AlarmSection,

    #[serde(default)]
    pub approval: ApprovalSection,

    #[serde(default)]
    pub otp: OtpSection,

    #[serde(default)]
    pub collection: CollectionSection,

    /// Local device stand-ins
    #[serde(default)]
    pub store: StoreSection,
}

/// General server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Startup health check attempts before giving up
    #[serde(default = "default_health_attempts")]
    pub health_attempts: u32,

    /// Pause between health check attempts
    #[serde(default = "default_health_retry")]
    pub health_retry_secs: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            health_attempts: default_health_attempts(),
            health_retry_secs: default_health_retry(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendSection {
    /// e.g. `https://api.echomi.app`
    pub base_url: String,

    /// Applied to every backend request
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct IdentitySection {
    /// Firebase uid of the signed-in user
    pub uid: Option<String>,

    /// Bearer ID token (prefer `ECHOMI_ID_TOKEN` over the file)
    pub id_token: Option<String>,
}

impl fmt::Debug for IdentitySection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentitySection")
            .field("uid", &self.uid)
            .field("id_token", &self.id_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmSection {
    /// Longest an emergency alarm may sound (max 120)
    #[serde(default = "default_alarm_ceiling")]
    pub ceiling_secs: u64,
}

impl Default for AlarmSection {
    fn default() -> Self {
        Self {
            ceiling_secs: default_alarm_ceiling(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalSection {
    #[serde(default = "default_approval_expiry")]
    pub expiry_secs: u64,
}

impl Default for ApprovalSection {
    fn default() -> Self {
        Self {
            expiry_secs: default_approval_expiry(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtpSection {
    #[serde(default = "default_otp_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_otp_retry_delay")]
    pub retry_delay_secs: u64,
}

impl Default for OtpSection {
    fn default() -> Self {
        Self {
            max_attempts: default_otp_attempts(),
            retry_delay_secs: default_otp_retry_delay(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionSection {
    #[serde(default = "default_collection_limit")]
    pub default_limit: usize,

    #[serde(default = "default_collection_max")]
    pub max_limit: usize,
}

impl Default for CollectionSection {
    fn default() -> Self {
        Self {
            default_limit: default_collection_limit(),
            max_limit: default_collection_max(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSection {
    /// JSON array of local messages served to collection jobs
    pub messages_path: Option<PathBuf>,

    /// Whether the host has granted the notification permission
    #[serde(default = "default_true")]
    pub notifications_granted: bool,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            messages_path: None,
            notifications_granted: true,
        }
    }
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_log_level() -> String {
    "info".to_string()
}

fn default_health_attempts() -> u32 {
    3
}

fn default_health_retry() -> u64 {
    5
}

fn default_request_timeout() -> u64 {
    30
}

fn default_alarm_ceiling() -> u64 {
    120
}

fn default_approval_expiry() -> u64 {
    60
}

fn default_otp_attempts() -> u32 {
    3
}

fn default_otp_retry_delay() -> u64 {
    2
}

fn default_collection_limit() -> usize {
    50
}

fn default_collection_max() -> usize {
    500
}

fn default_true() -> bool {
    true
}

// ============================================================================
// Loading & environment override
// ============================================================================

impl ServerConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: ServerConfig =
            toml::from_str(&contents).with_context(|| "Failed to parse TOML config")?;
        Ok(config)
    }

    /// Apply environment variable overrides.
    ///
    /// Supported env vars:
    /// - `ECHOMI_LOG_LEVEL`
    /// - `ECHOMI_BACKEND_URL`
    /// - `ECHOMI_REQUEST_TIMEOUT`
    /// - `ECHOMI_UID`
    /// - `ECHOMI_ID_TOKEN`
    /// - `ECHOMI_MESSAGES_PATH`
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("ECHOMI_LOG_LEVEL") {
            self.server.log_level = v;
        }
        if let Ok(v) = std::env::var("ECHOMI_BACKEND_URL") {
            self.backend.base_url = v;
        }
        if let Ok(v) = std::env::var("ECHOMI_REQUEST_TIMEOUT") {
            if let Ok(secs) = v.parse::<u64>() {
                self.backend.request_timeout_secs = secs;
            }
        }
        if let Ok(v) = std::env::var("ECHOMI_UID") {
            self.identity.uid = Some(v);
        }
        if let Ok(v) = std::env::var("ECHOMI_ID_TOKEN") {
            self.identity.id_token = Some(v);
        }
        if let Ok(v) = std::env::var("ECHOMI_MESSAGES_PATH") {
            self.store.messages_path = Some(PathBuf::from(v));
        }
    }

    /// Validate that the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        let url = self.backend.base_url.trim();
        anyhow::ensure!(!url.is_empty(), "backend.base_url must not be empty");
        anyhow::ensure!(
            url.starts_with("http://") || url.starts_with("https://"),
            "backend.base_url must be an http(s) URL"
        );
        anyhow::ensure!(
            self.backend.request_timeout_secs > 0,
            "backend.request_timeout_secs must be > 0"
        );

        anyhow::ensure!(
            self.server.health_attempts >= 1,
            "server.health_attempts must be >= 1"
        );

        // The alarm must never sound longer than two minutes
        anyhow::ensure!(
            (1..=120).contains(&self.alarm.ceiling_secs),
            "alarm.ceiling_secs must be between 1 and 120"
        );

        anyhow::ensure!(
            self.approval.expiry_secs > 0,
            "approval.expiry_secs must be > 0"
        );

        anyhow::ensure!(
            (1..=10).contains(&self.otp.max_attempts),
            "otp.max_attempts must be between 1 and 10"
        );

        anyhow::ensure!(
            self.collection.default_limit > 0,
            "collection.default_limit must be > 0"
        );
        anyhow::ensure!(
            self.collection.max_limit >= self.collection.default_limit,
            "collection.max_limit must be >= collection.default_limit"
        );

        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.backend.request_timeout_secs)
    }

    /// Typed settings handed to the orchestrator
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            alarm: AlarmConfig::new(Duration::from_secs(self.alarm.ceiling_secs)),
            approval: ApprovalConfig {
                expiry: Duration::from_secs(self.approval.expiry_secs),
                ..ApprovalConfig::default()
            },
            otp: RetryPolicy {
                max_attempts: self.otp.max_attempts,
                delay: Duration::from_secs(self.otp.retry_delay_secs),
            },
            collection: CollectionConfig {
                default_limit: self.collection.default_limit,
                max_limit: self.collection.max_limit,
            },
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
