use serde::Deserialize;
use std::time::Duration;

use crate::services::pipeline::FittingLimits;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000").
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// R2 bucket name
    pub r2_bucket: String,

    /// R2 access key ID (S3-compatible)
    pub r2_access_key: String,

    /// R2 secret access key (S3-compatible)
    pub r2_secret_key: String,

    /// R2 endpoint URL
    pub r2_endpoint: String,

    /// Public URL prefix that stored result keys are served under
    pub result_base_url: String,

    /// Gemini API key. An empty key makes every generation call fail.
    #[serde(default)]
    pub gemini_api_key: String,

    /// Model used for garment compositing
    pub gemini_model: String,

    /// Model used for short captions
    #[serde(default = "default_caption_model")]
    pub caption_model: String,

    /// HS256 secret for bearer tokens
    pub jwt_secret: String,

    /// Whole-job deadline, measured from job creation
    #[serde(default = "default_fitting_timeout_secs")]
    pub fitting_timeout_secs: u64,

    /// Bound on the caption call alone (non-fatal on expiry)
    #[serde(default = "default_caption_timeout_secs")]
    pub caption_timeout_secs: u64,

    /// Timeout for fetching photos and garment images over HTTP
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,

    /// Ceiling on simultaneous caption calls for batch annotation
    #[serde(default = "default_caption_concurrency")]
    pub caption_concurrency: usize,

    #[serde(default = "default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,

    /// Extra time past the deadline before a `processing` job is considered abandoned
    #[serde(default = "default_stale_grace_secs")]
    pub stale_grace_secs: u64,

    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_caption_model() -> String {
    "gemini-2.5-flash".to_string()
}

fn default_fitting_timeout_secs() -> u64 {
    300
}

fn default_caption_timeout_secs() -> u64 {
    15
}

fn default_download_timeout_secs() -> u64 {
    10
}

fn default_caption_concurrency() -> usize {
    10
}

fn default_reconcile_interval_secs() -> u64 {
    60
}

fn default_stale_grace_secs() -> u64 {
    120
}

fn default_shutdown_grace_secs() -> u64 {
    30
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn fitting_limits(&self) -> FittingLimits {
        FittingLimits {
            deadline: Duration::from_secs(self.fitting_timeout_secs),
            caption_timeout: Duration::from_secs(self.caption_timeout_secs),
        }
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs.max(1))
    }

    pub fn stale_grace(&self) -> Duration {
        Duration::from_secs(self.stale_grace_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}
