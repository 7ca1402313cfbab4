use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub state: StateConfig,
    pub api: ApiConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    pub sync: SyncConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StateConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

fn default_timeout_secs() -> u64 {
    120
}
fn default_max_retries() -> u32 {
    3
}
fn default_backoff_ms() -> u64 {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_target_chars")]
    pub target_chars: usize,
    #[serde(default = "default_boundary_window")]
    pub boundary_window: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_chars: default_target_chars(),
            boundary_window: default_boundary_window(),
        }
    }
}

fn default_target_chars() -> usize {
    1500
}
fn default_boundary_window() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    pub roots: Vec<PathBuf>,
    #[serde(default)]
    pub allow_root_removal: bool,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_hidden_prefix")]
    pub hidden_prefix: String,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

fn default_workers() -> usize {
    4
}
fn default_hidden_prefix() -> String {
    ".".to_string()
}

impl Config {
    /// Labels of the configured roots (directory basenames), in config order.
    pub fn root_labels(&self) -> Vec<String> {
        self.sync.roots.iter().map(|p| root_label(p)).collect()
    }

    /// Admin key for the store's admin endpoints, from the environment.
    pub fn admin_key(&self) -> Option<String> {
        std::env::var("KB_SYNC_ADMIN_KEY").ok().filter(|k| !k.is_empty())
    }
}

/// Label for a KB root: its directory basename.
pub fn root_label(root: &Path) -> String {
    root.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| root.to_string_lossy().to_string())
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.sync.roots.is_empty() {
        anyhow::bail!("sync.roots must list at least one KB root");
    }

    // Root labels key the document ids, so they must be unique
    let mut labels = config.root_labels();
    labels.sort();
    let before = labels.len();
    labels.dedup();
    if labels.len() != before {
        anyhow::bail!("sync.roots contain duplicate directory basenames; labels must be unique");
    }

    if config.chunking.target_chars == 0 {
        anyhow::bail!("chunking.target_chars must be > 0");
    }

    if config.chunking.boundary_window > config.chunking.target_chars {
        anyhow::bail!("chunking.boundary_window must not exceed chunking.target_chars");
    }

    if config.sync.workers == 0 {
        anyhow::bail!("sync.workers must be >= 1");
    }

    if config.api.base_url.is_empty() {
        anyhow::bail!("api.base_url must not be empty");
    }

    Ok(config)
}
