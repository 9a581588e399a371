use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use opsagent_types::AgentMap;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON5 parse error: {0}")]
    Json5(#[from] json5::Error),
    #[error("Config directory not found")]
    NoDirFound,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Bearer token required on `/api` routes (optional).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

fn default_port() -> u16 {
    8000
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            auth_token: None,
        }
    }
}

/// Retry settings for failed agent calls. `max_retries = 0` disables retry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_initial_backoff_ms() -> u64 {
    1_000
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

/// Scheduler tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Hard deadline for one agent call, in seconds.
    #[serde(default = "default_execution_timeout_secs")]
    pub execution_timeout_secs: u64,
    #[serde(default)]
    pub retry: RetryConfig,
    /// Zone cron expressions are evaluated in: `"local"`, `"UTC"` or an
    /// IANA name such as `"Europe/Berlin"`.
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_execution_timeout_secs() -> u64 {
    600
}

fn default_timezone() -> String {
    "local".to_string()
}

impl SchedulerConfig {
    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_secs)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            execution_timeout_secs: default_execution_timeout_secs(),
            retry: RetryConfig::default(),
            timezone: default_timezone(),
        }
    }
}

/// Which persistence backend holds tasks and executions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// Single SQLite database file.
    #[default]
    Sqlite,
    /// One JSON document per task and per execution under a directory.
    Local,
    /// Process memory only; nothing survives a restart.
    Memory,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    /// Database file (sqlite) or root directory (local). Defaults live
    /// under the config directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl StorageConfig {
    /// Resolve the storage location, falling back to the config directory.
    pub fn resolve_path(&self) -> Result<PathBuf, ConfigError> {
        if let Some(path) = &self.path {
            return Ok(path.clone());
        }
        let dir = config_dir()?;
        Ok(match self.backend {
            StorageBackend::Local => dir.join("tasks"),
            StorageBackend::Sqlite | StorageBackend::Memory => dir.join("opsagent.db"),
        })
    }
}

/// Where agent calls are sent. This is a separate service from the opsagent
/// server itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentBackendConfig {
    #[serde(default = "default_agent_base_url")]
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

fn default_agent_base_url() -> String {
    "http://127.0.0.1:8001".to_string()
}

impl Default for AgentBackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_agent_base_url(),
            auth_token: None,
        }
    }
}

/// Top-level opsagent configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpsAgentConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub agent_backend: AgentBackendConfig,
    /// Agents resolvable without asking the agent backend.
    #[serde(default)]
    pub agents: AgentMap,
}

impl OpsAgentConfig {
    /// Apply `OPSAGENT_*` environment overrides.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("OPSAGENT_AGENT_BASE_URL").filter(|v| !v.is_empty()) {
            self.agent_backend.base_url = url;
        }
        if let Some(token) = lookup("OPSAGENT_AUTH_TOKEN").filter(|v| !v.is_empty()) {
            self.server.auth_token = Some(token);
        }
    }
}

/// Resolve the opsagent config directory (~/.opsagent/).
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    dirs::home_dir()
        .map(|h| h.join(".opsagent"))
        .ok_or(ConfigError::NoDirFound)
}

/// Resolve the config file path (~/.opsagent/config.json5).
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.json5"))
}

/// Load configuration from the default path, falling back to defaults.
pub fn load_config() -> Result<OpsAgentConfig, ConfigError> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let path = config_file_path()?;
    let mut config = load_config_from(&path)?;
    config.apply_env();
    Ok(config)
}

/// Load configuration from a specific path, falling back to defaults if not found.
pub fn load_config_from(path: &Path) -> Result<OpsAgentConfig, ConfigError> {
    if !path.exists() {
        tracing::debug!("Config file not found at {}, using defaults", path.display());
        return Ok(OpsAgentConfig::default());
    }

    let content = std::fs::read_to_string(path)?;
    let config: OpsAgentConfig = json5::from_str(&content)?;
    Ok(config)
}

/// Ensure the config directory exists.
pub fn ensure_config_dir() -> Result<PathBuf, ConfigError> {
    let dir = config_dir()?;
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
    }
    Ok(dir)
}
