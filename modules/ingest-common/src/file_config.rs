use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::CrawlError;
use crate::types::Network;

/// TOML-backed configuration loaded from disk.
/// Secrets (API keys, DB URL) stay as env vars.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub recrawl: RecrawlConfig,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecrawlConfig {
    /// Visits older than this are dropped before each drain pass.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

impl RecrawlConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for RecrawlConfig {
    fn default() -> Self {
        Self {
            retention_secs: default_retention_secs(),
            page_size: default_page_size(),
            interval_secs: default_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterKind {
    Etherscan,
}

/// One steady polling loop.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    /// Cursor partition key, unique per deployment.
    pub key: String,
    pub network: Network,
    pub adapter: AdapterKind,
    /// Address or contract the loop scans.
    pub target: String,
    /// Explorer API base, e.g. "https://api.etherscan.io/api".
    pub explorer_url: String,
    #[serde(default)]
    pub start_height: i64,
    pub step: i64,
    pub min_step: i64,
    /// Reorg safety margin subtracted from the reported head.
    pub confirmations: i64,
    #[serde(default = "default_sleep_interval_secs")]
    pub sleep_interval_secs: u64,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl SourceConfig {
    pub fn sleep_interval(&self) -> Duration {
        Duration::from_secs(self.sleep_interval_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

fn default_max_connections() -> u32 {
    10
}

fn default_retention_secs() -> u64 {
    24 * 60 * 60
}

fn default_page_size() -> u32 {
    100
}

fn default_interval_secs() -> u64 {
    15 * 60
}

fn default_sleep_interval_secs() -> u64 {
    15
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_enabled() -> bool {
    true
}

impl FileConfig {
    /// Reject configurations the loops cannot run with.
    pub fn validate(&self) -> std::result::Result<(), CrawlError> {
        if self.recrawl.page_size == 0 {
            return Err(CrawlError::Config("recrawl.page_size must be >= 1".into()));
        }
        if self.recrawl.retention_secs == 0 {
            return Err(CrawlError::Config(
                "recrawl.retention_secs must be >= 1".into(),
            ));
        }

        let mut keys = HashSet::new();
        let mut explorers: HashMap<Network, &str> = HashMap::new();
        for source in &self.sources {
            // Adapters are registered per network, so one network has one explorer.
            let explorer = explorers
                .entry(source.network)
                .or_insert(source.explorer_url.as_str());
            if *explorer != source.explorer_url {
                return Err(CrawlError::Config(format!(
                    "source '{}': {} already uses explorer {}, got {}",
                    source.key, source.network, explorer, source.explorer_url
                )));
            }

            if !keys.insert((source.key.as_str(), source.network)) {
                return Err(CrawlError::Config(format!(
                    "duplicate source key '{}' on {}",
                    source.key, source.network
                )));
            }
            if source.min_step < 1 {
                return Err(CrawlError::Config(format!(
                    "source '{}': min_step must be >= 1",
                    source.key
                )));
            }
            if source.step < source.min_step {
                return Err(CrawlError::Config(format!(
                    "source '{}': step ({}) must be >= min_step ({})",
                    source.key, source.step, source.min_step
                )));
            }
            if source.confirmations < 0 || source.start_height < 0 {
                return Err(CrawlError::Config(format!(
                    "source '{}': confirmations and start_height must be non-negative",
                    source.key
                )));
            }
        }

        Ok(())
    }

    pub fn enabled_sources(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter().filter(|s| s.enabled)
    }
}

/// Load, parse and validate a TOML config file.
pub fn load_config(path: &Path) -> Result<FileConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
        .with_context(|| format!("Invalid config file: {}", path.display()))
}

pub fn parse_config(content: &str) -> Result<FileConfig> {
    let config: FileConfig = toml::from_str(content).context("Failed to parse config TOML")?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [recrawl]
        retention_secs = 3600
        page_size = 50

        [[sources]]
        key = "gitcoin-donations"
        network = "ethereum"
        adapter = "etherscan"
        target = "0xdf869fad6db91f437b59f1edefab319493d4c4fe"
        explorer_url = "https://api.etherscan.io/api"
        start_height = 12000000
        step = 50
        min_step = 10
        confirmations = 15
    "#;

    #[test]
    fn parses_sources_with_defaults() {
        let config = parse_config(SAMPLE).unwrap();
        assert_eq!(config.sources.len(), 1);

        let source = &config.sources[0];
        assert_eq!(source.network, Network::Ethereum);
        assert_eq!(source.adapter, AdapterKind::Etherscan);
        assert_eq!(source.sleep_interval(), Duration::from_secs(15));
        assert!(source.enabled);

        assert_eq!(config.recrawl.page_size, 50);
        assert_eq!(config.recrawl.interval_secs, 15 * 60);
        assert_eq!(config.database.max_connections, 10);
    }

    #[test]
    fn rejects_step_below_min_step() {
        let bad = SAMPLE.replace("step = 50", "step = 5");
        let err = parse_config(&bad).unwrap_err();
        assert!(format!("{err:#}").contains("must be >= min_step"));
    }

    #[test]
    fn rejects_duplicate_source_keys() {
        let dup = format!(
            "{SAMPLE}\n{}",
            &SAMPLE[SAMPLE.find("[[sources]]").unwrap()..]
        );
        let err = parse_config(&dup).unwrap_err();
        assert!(format!("{err:#}").contains("duplicate source key"));
    }

    #[test]
    fn rejects_second_explorer_for_same_network() {
        let second = SAMPLE[SAMPLE.find("[[sources]]").unwrap()..]
            .replace("gitcoin-donations", "gitcoin-grants")
            .replace("api.etherscan.io", "eth.blockscout.com");
        let err = parse_config(&format!("{SAMPLE}\n{second}")).unwrap_err();
        assert!(format!("{err:#}").contains("already uses explorer"));
    }

    #[test]
    fn same_explorer_may_serve_several_sources() {
        let second = SAMPLE[SAMPLE.find("[[sources]]").unwrap()..]
            .replace("gitcoin-donations", "gitcoin-grants");
        let config = parse_config(&format!("{SAMPLE}\n{second}")).unwrap();
        assert_eq!(config.sources.len(), 2);
    }

    #[test]
    fn rejects_unknown_fields() {
        let bad = SAMPLE.replace("page_size = 50", "page_size = 50\nbatch = 3");
        assert!(parse_config(&bad).is_err());
    }
}
