use serde::Deserialize;
use std::time::Duration;

use crate::services::orchestrator::OrchestratorSettings;
use crate::services::retry::RetryPolicy;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000").
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Base URL of the external scanner service
    pub scanner_url: String,

    /// Shared secret for the external scanner (opaque, never logged)
    pub scanner_api_key: String,

    /// Per-request timeout against the scanner, in seconds
    #[serde(default = "default_scanner_timeout_secs")]
    pub scanner_timeout_secs: u64,

    /// Result storage bucket name (S3-compatible)
    pub s3_bucket: String,

    /// Result storage endpoint URL
    pub s3_endpoint: String,

    /// Result storage access key ID
    pub s3_access_key: String,

    /// Result storage secret access key
    pub s3_secret_key: String,

    /// Poll interval for running scans, in seconds
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Maximum lifetime of a single scan job, in seconds
    #[serde(default = "default_max_job_lifetime_secs")]
    pub max_job_lifetime_secs: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_scanner_timeout_secs() -> u64 {
    30
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_max_job_lifetime_secs() -> u64 {
    3600
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn scanner_timeout(&self) -> Duration {
        Duration::from_secs(self.scanner_timeout_secs)
    }

    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            max_job_lifetime: Duration::from_secs(self.max_job_lifetime_secs),
            persist_retry: RetryPolicy::persistence(),
        }
    }
}
