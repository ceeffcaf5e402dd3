use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub max_results: u16,
    pub max_cache_items: usize,
    pub refresh_interval_ms: u64,
    pub worker_timeout_secs: u64,
    pub disabled_providers: Vec<String>,
    pub excluded_processes: Vec<String>,
    pub worker_providers: Vec<String>,
    pub worker_path: Option<PathBuf>,
    pub config_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_results: 20,
            max_cache_items: 512,
            refresh_interval_ms: 1_000,
            worker_timeout_secs: 10,
            disabled_providers: Vec::new(),
            excluded_processes: Vec::new(),
            worker_providers: Vec::new(),
            worker_path: None,
            config_path: stable_app_data_dir().join("config.toml"),
        }
    }
}

pub fn stable_app_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("LOCALAPPDATA") {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir).join("winscout");
        }
    }
    std::env::temp_dir().join("winscout")
}

pub fn validate(cfg: &Config) -> Result<(), String> {
    if cfg.max_results < 5 || cfg.max_results > 100 {
        return Err("max_results out of range (5-100)".into());
    }

    if cfg.max_cache_items < 10 || cfg.max_cache_items > 10_000 {
        return Err("max_cache_items out of range (10-10000)".into());
    }

    if cfg.refresh_interval_ms < 100 {
        return Err("refresh_interval_ms below 100".into());
    }

    if cfg.worker_timeout_secs == 0 || cfg.worker_timeout_secs > 120 {
        return Err("worker_timeout_secs out of range (1-120)".into());
    }

    if cfg.config_path.as_os_str().is_empty() {
        return Err("config_path is required".into());
    }

    Ok(())
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Encode(toml::ser::Error),
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(error) => write!(f, "io error: {error}"),
            Self::Parse(error) => write!(f, "config parse error: {error}"),
            Self::Encode(error) => write!(f, "config encode error: {error}"),
            Self::Invalid(error) => write!(f, "invalid config: {error}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

/// On-disk shape. Every field is optional so a partial file merges over the
/// defaults.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct ConfigFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_results: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_cache_items: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_interval_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    worker_timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    disabled_providers: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    excluded_processes: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    worker_providers: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    worker_path: Option<String>,
}

pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let mut config = Config::default();
    if let Some(path) = path {
        config.config_path = path.to_path_buf();
    }

    if !config.config_path.exists() {
        return Ok(config);
    }

    let raw = std::fs::read_to_string(&config.config_path)?;
    let file: ConfigFile = toml::from_str(&raw).map_err(ConfigError::Parse)?;

    if let Some(value) = file.max_results {
        config.max_results = value;
    }
    if let Some(value) = file.max_cache_items {
        config.max_cache_items = value;
    }
    if let Some(value) = file.refresh_interval_ms {
        config.refresh_interval_ms = value;
    }
    if let Some(value) = file.worker_timeout_secs {
        config.worker_timeout_secs = value;
    }
    if let Some(value) = file.disabled_providers {
        config.disabled_providers = value;
    }
    if let Some(value) = file.excluded_processes {
        config.excluded_processes = value;
    }
    if let Some(value) = file.worker_providers {
        config.worker_providers = value;
    }
    if let Some(value) = file.worker_path {
        if !value.trim().is_empty() {
            config.worker_path = Some(PathBuf::from(value));
        }
    }

    validate(&config).map_err(ConfigError::Invalid)?;
    Ok(config)
}

pub fn save(config: &Config) -> Result<(), ConfigError> {
    let file = ConfigFile {
        max_results: Some(config.max_results),
        max_cache_items: Some(config.max_cache_items),
        refresh_interval_ms: Some(config.refresh_interval_ms),
        worker_timeout_secs: Some(config.worker_timeout_secs),
        disabled_providers: Some(config.disabled_providers.clone()),
        excluded_processes: Some(config.excluded_processes.clone()),
        worker_providers: Some(config.worker_providers.clone()),
        worker_path: config
            .worker_path
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned()),
    };

    let rendered = toml::to_string_pretty(&file).map_err(ConfigError::Encode)?;
    if let Some(parent) = config.config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&config.config_path, rendered)?;
    Ok(())
}
