use anyhow::{Context, Result, bail};
use dotenv::dotenv;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::common::{
    DEFAULT_ALIAS, DEFAULT_BASE_URL, DEFAULT_BUCKET, DEFAULT_NICKNAME, DEFAULT_POLL_INTERVAL,
};

/// Runtime configuration, read from the environment (and `.env` if present).
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
    /// Client id of the APS application
    pub aps_client_id: String,
    /// Client secret of the APS application
    pub aps_client_secret: String,
    /// Bucket holding inputs, outputs and uploaded models
    #[serde(default)]
    pub aps_bucket: Option<String>,
    #[serde(default = "default_base_url")]
    pub aps_base_url: String,
    /// Prefix for app bundles and activities
    #[serde(default = "default_nickname")]
    pub aps_nickname: String,
    /// Alias for app bundles and activities (dev, stg, prod)
    #[serde(default = "default_alias")]
    pub aps_alias: String,
    #[serde(default = "default_web_root")]
    pub web_root: PathBuf,
    /// Transient holding area for uploaded files
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Upper bound for translation polling. Unset means wait forever.
    #[serde(default)]
    pub translation_timeout_secs: Option<u64>,
    #[serde(default = "default_purge_on_startup")]
    pub purge_on_startup: bool,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_nickname() -> String {
    DEFAULT_NICKNAME.to_string()
}

fn default_alias() -> String {
    DEFAULT_ALIAS.to_string()
}

fn default_web_root() -> PathBuf {
    PathBuf::from("./wwwroot")
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("./upload")
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL.as_millis() as u64
}

fn default_purge_on_startup() -> bool {
    true
}

impl AppConfig {
    /// Load the configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        dotenv().ok();
        let config: AppConfig = envy::from_env()
            .context("Missing required environment variables APS_CLIENT_ID or APS_CLIENT_SECRET")?;
        config.validate()
    }

    /// Load the configuration from explicit key/value pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let pairs = pairs
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()));
        let config: AppConfig =
            envy::from_iter(pairs).context("Failed to parse configuration")?;
        config.validate()
    }

    fn validate(self) -> Result<Self> {
        if self.aps_client_id.trim().is_empty() || self.aps_client_secret.trim().is_empty() {
            bail!("Missing required environment variables APS_CLIENT_ID or APS_CLIENT_SECRET");
        }
        if self.poll_interval_ms == 0 {
            bail!("POLL_INTERVAL_MS must be greater than zero");
        }
        Ok(self)
    }

    pub fn bucket_key(&self) -> String {
        match self.aps_bucket.as_deref().map(str::trim) {
            Some(bucket) if !bucket.is_empty() => bucket.to_string(),
            _ => DEFAULT_BUCKET.to_string(),
        }
    }

    pub fn bundles_dir(&self) -> PathBuf {
        self.web_root.join("bundles")
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn translation_timeout(&self) -> Option<Duration> {
        self.translation_timeout_secs.map(Duration::from_secs)
    }
}
