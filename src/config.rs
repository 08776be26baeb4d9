//! ==============================================================================
//! config.rs - dashboard configuration loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `dashboard.toml`.
//!     loads configuration from file (or defaults), then overlays the
//!     environment. required backend settings must be present or startup fails.
//!
//! structure:
//!     - BackendConfig: graphql endpoint, api key, region, wire schema, paging.
//!     - StorageConfig: bucket holding camera images, identity pool, url expiry.
//!     - PollingConfig: background refresh period.
//!     - ServerConfig: where the dashboard is served.
//!     - DevicesConfig: devices offered in the selector.
//!     - LoggingConfig: default log level.
//!
//! ==============================================================================

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const ENV_CONFIG_PATH: &str = "DASHBOARD_CONFIG";
pub const ENV_GRAPHQL_ENDPOINT: &str = "DASHBOARD_GRAPHQL_ENDPOINT";
pub const ENV_API_KEY: &str = "DASHBOARD_API_KEY";
pub const ENV_REGION: &str = "DASHBOARD_REGION";
pub const ENV_BUCKET: &str = "DASHBOARD_S3_BUCKET";
pub const ENV_IDENTITY_POOL_ID: &str = "DASHBOARD_IDENTITY_POOL_ID";
pub const ENV_LISTEN: &str = "DASHBOARD_LISTEN";
pub const ENV_POLL_INTERVAL: &str = "DASHBOARD_POLL_INTERVAL_SECONDS";
pub const ENV_LOG: &str = "DASHBOARD_LOG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("missing required configuration: {}", .0.join(", "))]
    Missing(Vec<&'static str>),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct DashboardConfig {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub devices: DevicesConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which GraphQL document shape the backend answers with.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SchemaShape {
    /// sensor fields nested under `payload.data`
    #[default]
    Envelope,
    /// sensor fields at the top level of each item
    Flat,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    #[serde(default)]
    pub graphql_endpoint: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub schema: SchemaShape,
    #[serde(default)]
    pub page_limit: Option<u32>,
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub identity_pool_id: Option<String>,
    #[serde(default = "default_url_expiry_seconds")]
    pub url_expiry_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PollingConfig {
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DevicesConfig {
    #[serde(default = "default_available_devices")]
    pub available: Vec<String>,
    #[serde(default = "default_device")]
    pub default: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_max_pages() -> usize {
    20
}

fn default_timeout_seconds() -> u64 {
    10
}

fn default_url_expiry_seconds() -> u64 {
    3600
}

fn default_interval_seconds() -> u64 {
    30
}

fn default_listen() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_available_devices() -> Vec<String> {
    vec!["22-27".to_string(), "22-30".to_string()]
}

fn default_device() -> String {
    "22-27".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            graphql_endpoint: String::new(),
            api_key: String::new(),
            region: String::new(),
            schema: SchemaShape::default(),
            page_limit: None,
            max_pages: default_max_pages(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            identity_pool_id: None,
            url_expiry_seconds: default_url_expiry_seconds(),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self { interval_seconds: default_interval_seconds() }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { listen: default_listen() }
    }
}

impl Default for DevicesConfig {
    fn default() -> Self {
        Self {
            available: default_available_devices(),
            default: default_device(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level() }
    }
}

impl DashboardConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load the file (if any), overlay the process environment and validate.
    ///
    /// Any error here is fatal: the dashboard cannot talk to its backend
    /// without the required settings.
    pub fn from_env() -> Result<Self, ConfigError> {
        let lookup = |key: &str| std::env::var(key).ok();

        let mut config = match lookup(ENV_CONFIG_PATH) {
            Some(path) => Self::load(path)?,
            None => Self::load_default_file()?,
        };
        config.apply_overrides(lookup)?;
        config.validate()?;
        Ok(config)
    }

    fn load_default_file() -> Result<Self, ConfigError> {
        let paths = [
            PathBuf::from("config").join("dashboard.toml"),
            PathBuf::from("..").join("config").join("dashboard.toml"),
        ];

        for path in &paths {
            if path.exists() {
                return Self::load(path);
            }
        }
        Ok(Self::default())
    }

    /// Overlay values from an environment-like lookup. Set variables win over
    /// the file.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let set = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = set(ENV_GRAPHQL_ENDPOINT) {
            self.backend.graphql_endpoint = v;
        }
        if let Some(v) = set(ENV_API_KEY) {
            self.backend.api_key = v;
        }
        if let Some(v) = set(ENV_REGION) {
            self.backend.region = v;
        }
        if let Some(v) = set(ENV_BUCKET) {
            self.storage.bucket = v;
        }
        if let Some(v) = set(ENV_IDENTITY_POOL_ID) {
            self.storage.identity_pool_id = Some(v);
        }
        if let Some(v) = set(ENV_LISTEN) {
            self.server.listen = v;
        }
        if let Some(v) = set(ENV_POLL_INTERVAL) {
            self.polling.interval_seconds = v.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("{ENV_POLL_INTERVAL} is not a number: {v}"))
            })?;
        }
        if let Some(v) = set(ENV_LOG) {
            self.logging.level = v;
        }
        Ok(())
    }

    pub fn validate(&mut self) -> Result<(), ConfigError> {
        let mut missing = Vec::new();
        if self.backend.graphql_endpoint.trim().is_empty() {
            missing.push(ENV_GRAPHQL_ENDPOINT);
        }
        if self.backend.api_key.trim().is_empty() {
            missing.push(ENV_API_KEY);
        }
        if self.backend.region.trim().is_empty() {
            missing.push(ENV_REGION);
        }
        if self.storage.bucket.trim().is_empty() {
            missing.push(ENV_BUCKET);
        }
        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }

        reqwest::Url::parse(&self.backend.graphql_endpoint).map_err(|e| {
            ConfigError::Invalid(format!(
                "graphql endpoint {} is not a url: {e}",
                self.backend.graphql_endpoint
            ))
        })?;

        if self.polling.interval_seconds == 0 {
            return Err(ConfigError::Invalid("polling interval must be positive".to_string()));
        }
        if self.backend.max_pages == 0 {
            return Err(ConfigError::Invalid("max_pages must be positive".to_string()));
        }
        if self.devices.default.trim().is_empty() {
            return Err(ConfigError::Invalid("no default device configured".to_string()));
        }
        if !self.devices.available.contains(&self.devices.default) {
            self.devices.available.insert(0, self.devices.default.clone());
        }
        Ok(())
    }

    /// Log configuration summary (api key redacted)
    pub fn log_summary(&self) {
        tracing::info!(
            endpoint = %self.backend.graphql_endpoint,
            region = %self.backend.region,
            schema = ?self.backend.schema,
            bucket = %self.storage.bucket,
            identity_pool = self.storage.identity_pool_id.is_some(),
            poll_interval_s = self.polling.interval_seconds,
            listen = %self.server.listen,
            devices = ?self.devices.available,
            "effective configuration"
        );
    }
}
