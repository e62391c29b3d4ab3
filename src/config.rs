use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File name of the durable store when no path is configured.
pub const DEFAULT_STORE_FILE: &str = "nvm.db";

/// Process-level library settings.
///
/// Tunables that operators change at runtime (log level, trim percentages,
/// maxima, polling interval) live in the persistent `config` table instead.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LibConfig {
    #[serde(default)]
    pub store_path: Option<PathBuf>,
    #[serde(default = "default_syslog_source")]
    pub syslog_source: String,
    #[serde(default = "default_max_event_subscribers")]
    pub max_event_subscribers: usize,
    /// Wall-clock length of one minute of the event polling interval.
    #[serde(default = "default_poll_minute_ms")]
    pub poll_minute_ms: u64,
    /// Side log file size that triggers a flush on append.
    #[serde(default = "default_log_cache_max_bytes")]
    pub log_cache_max_bytes: u64,
}

fn default_syslog_source() -> String {
    "IntelNVM".to_string()
}

fn default_max_event_subscribers() -> usize {
    100
}

fn default_poll_minute_ms() -> u64 {
    60_000
}

fn default_log_cache_max_bytes() -> u64 {
    1024 * 1024
}

impl Default for LibConfig {
    fn default() -> Self {
        Self {
            store_path: None,
            syslog_source: default_syslog_source(),
            max_event_subscribers: default_max_event_subscribers(),
            poll_minute_ms: default_poll_minute_ms(),
            log_cache_max_bytes: default_log_cache_max_bytes(),
        }
    }
}

impl LibConfig {
    /// Config rooted at an explicit store path, everything else defaulted.
    pub fn with_store_path(path: impl Into<PathBuf>) -> Self {
        Self {
            store_path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Resolve where the durable store lives.
    ///
    /// An explicit path wins; otherwise a store in the working directory is
    /// used if one exists, else the per-user data directory.
    pub fn resolve_store_path(&self) -> PathBuf {
        if let Some(path) = &self.store_path {
            return path.clone();
        }
        let local = Path::new(DEFAULT_STORE_FILE);
        if local.exists() {
            return local.to_path_buf();
        }
        match dirs::data_dir() {
            Some(dir) => dir.join("nvm").join(DEFAULT_STORE_FILE),
            None => local.to_path_buf(),
        }
    }
}

/// Load library settings from `nvm.toml` (optional) and `NVM__*` variables.
pub fn load_config() -> anyhow::Result<LibConfig> {
    load_config_from("nvm")
}

pub fn load_config_from(file_stem: &str) -> anyhow::Result<LibConfig> {
    let config = config::Config::builder()
        .add_source(config::File::with_name(file_stem).required(false))
        .add_source(config::Environment::with_prefix("NVM").separator("__"))
        .build()?;

    let cfg: LibConfig = config.try_deserialize()?;
    validate_config(&cfg)?;

    Ok(cfg)
}

pub fn validate_config(cfg: &LibConfig) -> anyhow::Result<()> {
    if cfg.max_event_subscribers == 0 {
        anyhow::bail!("max_event_subscribers must be greater than zero");
    }

    if cfg.poll_minute_ms == 0 {
        anyhow::bail!("poll_minute_ms must be greater than zero");
    }

    if cfg.syslog_source.trim().is_empty() {
        anyhow::bail!("syslog_source cannot be empty");
    }

    if let Some(path) = &cfg.store_path {
        if path.as_os_str().is_empty() {
            anyhow::bail!("store_path cannot be empty when set");
        }
    }

    Ok(())
}
