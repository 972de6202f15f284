use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::connector_wiki::{WikiSettings, DEFAULT_REDACTED_FRAGMENTS};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub connectors: ConnectorsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl SyncConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Where the checkpoint blob of connector `name` is stored.
    pub fn checkpoint_path(&self, name: &str) -> PathBuf {
        self.state_dir.join(format!("{}.json", name))
    }
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("./data/state")
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ConnectorsConfig {
    #[serde(default)]
    pub wiki: BTreeMap<String, WikiConnectorConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WikiConnectorConfig {
    pub base_url: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_page_delay_ms")]
    pub page_delay_ms: u64,
    #[serde(default = "default_detail_delay_ms")]
    pub detail_delay_ms: u64,
    #[serde(default = "default_redacted_fragments")]
    pub redacted_fragments: Vec<String>,
}

fn default_batch_size() -> usize {
    100
}
fn default_page_delay_ms() -> u64 {
    200
}
fn default_detail_delay_ms() -> u64 {
    100
}
fn default_redacted_fragments() -> Vec<String> {
    DEFAULT_REDACTED_FRAGMENTS
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl WikiConnectorConfig {
    pub fn settings(&self, timeout: Duration) -> WikiSettings {
        WikiSettings {
            batch_size: self.batch_size,
            page_delay: Duration::from_millis(self.page_delay_ms),
            detail_delay: Duration::from_millis(self.detail_delay_ms),
            timeout,
            redacted_fragments: self.redacted_fragments.clone(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate sync
    if config.sync.timeout_secs == 0 {
        anyhow::bail!("sync.timeout_secs must be > 0");
    }

    // Validate wiki connectors
    for (name, wiki) in &config.connectors.wiki {
        if wiki.batch_size == 0 {
            anyhow::bail!("connectors.wiki.{}.batch_size must be > 0", name);
        }
        if wiki.base_url.trim().is_empty() {
            anyhow::bail!("connectors.wiki.{}.base_url must not be empty", name);
        }
        url::Url::parse(&wiki.base_url).with_context(|| {
            format!(
                "connectors.wiki.{}.base_url is not a valid URL: '{}'",
                name, wiki.base_url
            )
        })?;
        if wiki.redacted_fragments.iter().any(|f| f.is_empty()) {
            anyhow::bail!(
                "connectors.wiki.{}.redacted_fragments must not contain empty entries",
                name
            );
        }
    }

    Ok(config)
}
