use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const DEFAULT_ENV_PREFIX: &str = "XEG";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub download: DownloadConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuntimeConfig {
    #[serde(default = "default_runtime_workers")]
    pub workers: usize,
    #[serde(default = "default_store_timeout", with = "humantime_serde")]
    pub store_get_timeout: Duration,
    #[serde(default = "default_store_timeout", with = "humantime_serde")]
    pub store_set_timeout: Duration,
    #[serde(default = "default_http_timeout", with = "humantime_serde")]
    pub http_timeout: Duration,
    #[serde(default = "default_navigate_timeout", with = "humantime_serde")]
    pub navigate_timeout: Duration,
    #[serde(default = "default_navigate_timeout", with = "humantime_serde")]
    pub dom_facts_timeout: Duration,
    #[serde(default = "default_settle_timeout", with = "humantime_serde")]
    pub settle_timeout: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workers: default_runtime_workers(),
            store_get_timeout: default_store_timeout(),
            store_set_timeout: default_store_timeout(),
            http_timeout: default_http_timeout(),
            navigate_timeout: default_navigate_timeout(),
            dom_facts_timeout: default_navigate_timeout(),
            settle_timeout: default_settle_timeout(),
        }
    }
}

impl RuntimeConfig {
    /// Deadline for the HTTP client itself, matching the runner's race so a
    /// timed-out request does not keep its connection open. Zero means none.
    pub fn http_request_timeout(&self) -> Option<Duration> {
        Some(self.http_timeout).filter(|timeout| !timeout.is_zero())
    }
}

fn default_runtime_workers() -> usize {
    4
}

fn default_store_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_http_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_navigate_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_settle_timeout() -> Duration {
    Duration::from_secs(30)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Outbound HTTP settings. The request deadline is `runtime.http_timeout`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
        }
    }
}

fn default_user_agent() -> String {
    format!("xeg-runtime/{}", crate::VERSION)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DownloadConfig {
    #[serde(default = "default_download_dir")]
    pub dir: Option<PathBuf>,
    #[serde(default = "default_download_workers")]
    pub workers: usize,
    #[serde(default)]
    pub fallback_prefix: Option<String>,
    #[serde(default)]
    pub zip_prefix: Option<String>,
    #[serde(default = "default_download_retries")]
    pub retries: usize,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            dir: default_download_dir(),
            workers: default_download_workers(),
            fallback_prefix: None,
            zip_prefix: None,
            retries: default_download_retries(),
        }
    }
}

fn default_download_retries() -> usize {
    2
}

fn default_download_dir() -> Option<PathBuf> {
    dirs::download_dir().map(|dir| dir.join("xeg"))
}

fn default_download_workers() -> usize {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

pub fn load(options: LoadOptions) -> Result<Config> {
    let mut cfg = Config::default();

    if let Some(path) = options.config_file.as_ref() {
        if path.exists() {
            let from_file = read_config_file(path)?;
            cfg = merge_config(cfg, from_file);
        }
    } else if let Some(default_path) = default_config_path() {
        if default_path.exists() {
            let from_file = read_config_file(&default_path)?;
            cfg = merge_config(cfg, from_file);
        }
    }

    let prefix = options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
    apply_env(&mut cfg, prefix);

    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&data)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;
    Ok(config)
}

fn merge_config(mut base: Config, other: Config) -> Config {
    if other.runtime.workers != 0 {
        base.runtime.workers = other.runtime.workers;
    }
    base.runtime.store_get_timeout = other.runtime.store_get_timeout;
    base.runtime.store_set_timeout = other.runtime.store_set_timeout;
    base.runtime.http_timeout = other.runtime.http_timeout;
    base.runtime.navigate_timeout = other.runtime.navigate_timeout;
    base.runtime.dom_facts_timeout = other.runtime.dom_facts_timeout;
    base.runtime.settle_timeout = other.runtime.settle_timeout;

    if other.storage.path.is_some() {
        base.storage.path = other.storage.path;
    }

    if !other.http.user_agent.trim().is_empty() {
        base.http.user_agent = other.http.user_agent;
    }

    if other.download.dir.is_some() {
        base.download.dir = other.download.dir;
    }
    if other.download.workers != 0 {
        base.download.workers = other.download.workers;
    }
    if other.download.fallback_prefix.is_some() {
        base.download.fallback_prefix = other.download.fallback_prefix;
    }
    if other.download.zip_prefix.is_some() {
        base.download.zip_prefix = other.download.zip_prefix;
    }
    base.download.retries = other.download.retries;

    if !other.logging.level.is_empty() {
        base.logging.level = other.logging.level;
    }
    if other.logging.file.is_some() {
        base.logging.file = other.logging.file;
    }

    base
}

fn apply_env(cfg: &mut Config, prefix: &str) {
    let mut map: HashMap<String, String> = HashMap::new();
    let upper_prefix = format!("{}_", prefix.to_uppercase());

    for (key, value) in env::vars() {
        if let Some(stripped) = key.strip_prefix(&upper_prefix) {
            let normalized = stripped.to_ascii_lowercase().replace("__", ".");
            map.insert(normalized, value);
        }
    }

    for (key, value) in map {
        apply_env_value(cfg, &key, value);
    }
}

fn parse_duration_into(target: &mut Duration, value: &str) {
    if let Ok(duration) = humantime::parse_duration(value) {
        *target = duration;
    }
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    match key {
        "runtime.workers" => {
            if let Ok(parsed) = value.parse::<usize>() {
                cfg.runtime.workers = parsed;
            }
        }
        "runtime.store_get_timeout" => parse_duration_into(&mut cfg.runtime.store_get_timeout, &value),
        "runtime.store_set_timeout" => parse_duration_into(&mut cfg.runtime.store_set_timeout, &value),
        "runtime.http_timeout" => parse_duration_into(&mut cfg.runtime.http_timeout, &value),
        "runtime.navigate_timeout" => parse_duration_into(&mut cfg.runtime.navigate_timeout, &value),
        "runtime.dom_facts_timeout" => parse_duration_into(&mut cfg.runtime.dom_facts_timeout, &value),
        "runtime.settle_timeout" => parse_duration_into(&mut cfg.runtime.settle_timeout, &value),
        "storage.path" => cfg.storage.path = Some(PathBuf::from(value)),
        "http.user_agent" => cfg.http.user_agent = value,
        "download.dir" => cfg.download.dir = Some(PathBuf::from(value)),
        "download.workers" => {
            if let Ok(parsed) = value.parse::<usize>() {
                cfg.download.workers = parsed;
            }
        }
        "download.fallback_prefix" => cfg.download.fallback_prefix = Some(value),
        "download.zip_prefix" => cfg.download.zip_prefix = Some(value),
        "download.retries" => {
            if let Ok(parsed) = value.parse::<usize>() {
                cfg.download.retries = parsed;
            }
        }
        "logging.level" => cfg.logging.level = value,
        "logging.file" => cfg.logging.file = Some(PathBuf::from(value)),
        _ => {}
    }
}

pub fn default_path() -> Option<PathBuf> {
    default_config_path()
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("xeg-runtime").join("config.yaml"))
}
