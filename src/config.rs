use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,

    /// Engine and storage configuration
    pub engine: EngineConfig,

    /// Observability configuration
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self, config::ConfigError> {
        let config_path = std::env::var("SHARD_SEARCH_CONFIG")
            .unwrap_or_else(|_| "config/shard-search.toml".to_string());

        config::Config::builder()
            // Start with default values
            .add_source(config::File::from_str(
                include_str!("../config/default.toml"),
                config::FileFormat::Toml,
            ))
            // Override with config file if it exists
            .add_source(config::File::with_name(&config_path).required(false))
            // Override with environment variables (prefix: SHARD_SEARCH__)
            .add_source(
                config::Environment::with_prefix("SHARD_SEARCH")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            engine: EngineConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server host
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Request timeout (seconds)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Root directory for shard data (`<data_path>/<index>/<shard>/`)
    #[serde(default = "default_data_path")]
    pub data_path: PathBuf,

    /// Directory holding one settings file per index (`*.json`, `*.yaml`)
    #[serde(default = "default_settings_path")]
    pub settings_path: PathBuf,

    /// How long a job status stays queryable after its last update (seconds)
    #[serde(default = "default_job_retention")]
    pub job_retention_secs: u64,

    /// Maximum number of job statuses kept at once
    #[serde(default = "default_job_capacity")]
    pub job_capacity: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_path: default_data_path(),
            settings_path: default_settings_path(),
            job_retention_secs: default_job_retention(),
            job_capacity: default_job_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub json_logs: bool,

    /// Service name
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Enable Prometheus metrics
    #[serde(default = "default_true")]
    pub prometheus_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
            service_name: default_service_name(),
            prometheus_enabled: true,
        }
    }
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    9800
}

fn default_request_timeout() -> u64 {
    30
}

fn default_data_path() -> PathBuf {
    PathBuf::from("./data")
}

fn default_settings_path() -> PathBuf {
    PathBuf::from("./conf/indexes")
}

fn default_job_retention() -> u64 {
    3600 // 1 hour
}

fn default_job_capacity() -> u64 {
    10_000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_service_name() -> String {
    "shard-search".to_string()
}

fn default_true() -> bool {
    true
}
