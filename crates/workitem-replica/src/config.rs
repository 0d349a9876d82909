//! TOML configuration parsing and validation.
//!
//! All runtime settings come from one file (default `./config/wir.toml`):
//!
//! ```toml
//! [db]
//! path = "./data/wir.sqlite"
//!
//! [remote]
//! org = "contoso"
//! project = "Fabrikam"
//! area_path = "Fabrikam\\Team A"
//! email = "me@contoso.com"
//! pat = "..."            # or set WIR_PAT
//!
//! [sync]
//! page_size = 200
//! poll_interval_secs = 10
//!
//! [index]
//! export_poll_ms = 1000
//! export_grace_ms = 1000
//! export_max_wait_ms = 30000
//! search_limit = 100
//!
//! [server]
//! bind = "127.0.0.1:7341"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable consulted when `remote.pat` is absent.
pub const PAT_ENV: &str = "WIR_PAT";

/// Remote batch-fetch ceiling; pages never exceed it.
pub const MAX_PAGE_SIZE: usize = 200;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub remote: RemoteConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RemoteConfig {
    pub org: String,
    pub project: String,
    pub area_path: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub pat: Option<String>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://dev.azure.com".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

impl RemoteConfig {
    /// Personal access token from the file, else from [`PAT_ENV`].
    pub fn resolve_pat(&self) -> Option<String> {
        self.pat
            .clone()
            .filter(|p| !p.is_empty())
            .or_else(|| std::env::var(PAT_ENV).ok().filter(|p| !p.is_empty()))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

fn default_page_size() -> usize {
    MAX_PAGE_SIZE
}
fn default_poll_interval_secs() -> u64 {
    10
}

impl SyncConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_export_poll_ms")]
    pub export_poll_ms: u64,
    #[serde(default = "default_export_grace_ms")]
    pub export_grace_ms: u64,
    #[serde(default = "default_export_max_wait_ms")]
    pub export_max_wait_ms: u64,
    #[serde(default = "default_search_limit")]
    pub search_limit: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            export_poll_ms: default_export_poll_ms(),
            export_grace_ms: default_export_grace_ms(),
            export_max_wait_ms: default_export_max_wait_ms(),
            search_limit: default_search_limit(),
        }
    }
}

fn default_export_poll_ms() -> u64 {
    1000
}
fn default_export_grace_ms() -> u64 {
    1000
}
fn default_export_max_wait_ms() -> u64 {
    30_000
}
fn default_search_limit() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:7341".to_string(),
        }
    }
}

/// Canonical area path: `/` becomes `\`, segments trimmed, empty segments dropped.
pub fn normalize_area_path(area_path: &str) -> String {
    area_path
        .trim()
        .replace('/', "\\")
        .split('\\')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\\")
}

/// Parse and validate configuration from a TOML string.
pub fn parse_config(content: &str) -> Result<Config> {
    let mut config: Config =
        toml::from_str(content).with_context(|| "Failed to parse config file")?;

    config.remote.area_path = normalize_area_path(&config.remote.area_path);

    if config.remote.org.trim().is_empty() {
        anyhow::bail!("remote.org must not be empty");
    }
    if config.remote.project.trim().is_empty() {
        anyhow::bail!("remote.project must not be empty");
    }
    if config.remote.area_path.is_empty() {
        anyhow::bail!("remote.area_path must not be empty");
    }

    if config.sync.page_size == 0 || config.sync.page_size > MAX_PAGE_SIZE {
        anyhow::bail!("sync.page_size must be in 1..={}", MAX_PAGE_SIZE);
    }
    if config.sync.poll_interval_secs == 0 {
        anyhow::bail!("sync.poll_interval_secs must be >= 1");
    }

    if config.index.export_poll_ms == 0 {
        anyhow::bail!("index.export_poll_ms must be >= 1");
    }
    if config.index.export_max_wait_ms < config.index.export_poll_ms {
        anyhow::bail!("index.export_max_wait_ms must be >= index.export_poll_ms");
    }
    if config.index.search_limit == 0 {
        anyhow::bail!("index.search_limit must be >= 1");
    }

    Ok(config)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}
