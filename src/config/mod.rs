use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use validator::Validate;

use crate::error::{EngineError, EngineResult};

/// Default settings file name
pub const CONFIG_FILE_NAME: &str = "workflow_executor.config.yaml";

/// Settings for the workflow executor
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct EngineSettings {
    /// Sweeper settings
    #[serde(default)]
    #[validate]
    pub sweeper: SweeperSettings,

    /// Outbound HTTP settings
    #[serde(default)]
    #[validate]
    pub http: HttpSettings,

    /// Housekeeping settings
    #[serde(default)]
    #[validate]
    pub housekeeping: HousekeepingSettings,

    /// Logger settings
    #[serde(default)]
    pub logger: LoggerSettings,

    /// Tenants served by this process
    #[serde(default = "default_tenants")]
    #[validate(length(min = 1))]
    pub tenants: Vec<String>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            sweeper: SweeperSettings::default(),
            http: HttpSettings::default(),
            housekeeping: HousekeepingSettings::default(),
            logger: LoggerSettings::default(),
            tenants: default_tenants(),
        }
    }
}

/// Settings for the sweep loop
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SweeperSettings {
    /// Interval between sweeps in milliseconds
    #[serde(default = "default_interval_ms")]
    #[validate(range(min = 1))]
    pub interval_ms: u64,

    /// Number of concurrent reconciliation passes
    #[serde(default = "default_max_concurrency")]
    #[validate(range(min = 1, max = 10000))]
    pub max_concurrency: usize,

    /// How long a dispatch waits for a free worker before skipping the batch
    #[serde(default = "default_permit_timeout_ms")]
    pub permit_timeout_ms: u64,

    /// Whether sweeps after the first also pick up `PROCESSING` entries
    #[serde(default = "default_true")]
    pub recover_processing: bool,
}

impl Default for SweeperSettings {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            max_concurrency: default_max_concurrency(),
            permit_timeout_ms: default_permit_timeout_ms(),
            recover_processing: true,
        }
    }
}

impl SweeperSettings {
    /// Sweep interval
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Permit acquisition timeout
    pub fn permit_timeout(&self) -> Duration {
        Duration::from_millis(self.permit_timeout_ms)
    }
}

/// Settings for outbound HTTP calls made by HTTP tasks
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct HttpSettings {
    /// Request timeout when a task does not set `timeoutSeconds`
    #[serde(default = "default_http_timeout_secs")]
    #[validate(range(min = 1))]
    pub default_timeout_secs: u64,

    /// Connection establishment timeout
    #[serde(default = "default_connect_timeout_secs")]
    #[validate(range(min = 1))]
    pub connect_timeout_secs: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_http_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

/// Settings for periodic maintenance run alongside each sweep
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct HousekeepingSettings {
    /// Move overdue open tasks to `EXPIRED`
    #[serde(default = "default_true")]
    pub expire_overdue_tasks: bool,

    /// Archive workflows terminal for longer than this many seconds
    #[serde(default)]
    #[validate(range(min = 1))]
    pub archive_after_secs: Option<u64>,

    /// Purge finished queue entries older than this many seconds
    #[serde(default = "default_queue_retention_secs")]
    pub queue_retention_secs: u64,
}

impl Default for HousekeepingSettings {
    fn default() -> Self {
        Self {
            expire_overdue_tasks: true,
            archive_after_secs: None,
            queue_retention_secs: default_queue_retention_secs(),
        }
    }
}

/// Logger settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggerSettings {
    /// Log level or filter directive
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggerSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_interval_ms() -> u64 {
    10_000
}

fn default_max_concurrency() -> usize {
    50
}

fn default_permit_timeout_ms() -> u64 {
    100
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_queue_retention_secs() -> u64 {
    3600
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_tenants() -> Vec<String> {
    vec!["default".to_string()]
}

/// Parse and validate settings from YAML text
pub fn parse_settings(contents: &str) -> EngineResult<EngineSettings> {
    let settings: EngineSettings = serde_yaml::from_str(contents)
        .map_err(|e| EngineError::Config(format!("Failed to parse config file: {}", e)))?;
    settings
        .validate()
        .map_err(|e| EngineError::Config(format!("Invalid settings: {}", e)))?;
    Ok(settings)
}

/// Load settings from a YAML file
pub fn load_settings<P: AsRef<Path>>(path: P) -> EngineResult<EngineSettings> {
    let mut file = File::open(path)
        .map_err(|e| EngineError::Config(format!("Failed to open config file: {}", e)))?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)
        .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

    parse_settings(&contents)
}

/// Get settings, optionally from a specific file
pub fn get_settings(config_path: Option<&str>) -> EngineResult<EngineSettings> {
    match config_path {
        Some(path) => load_settings(path),
        None => {
            let default_paths = [
                CONFIG_FILE_NAME.to_string(),
                format!("config/{}", CONFIG_FILE_NAME),
                format!("../{}", CONFIG_FILE_NAME),
            ];

            for path in default_paths.iter() {
                if Path::new(path).exists() {
                    return load_settings(path);
                }
            }

            Ok(EngineSettings::default())
        }
    }
}
