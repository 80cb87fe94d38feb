use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CrawlError;
use crate::file_config::SourceConfig;

// --- Networks and platforms ---

/// Chain or data network an activity record originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Network {
    Ethereum,
    Polygon,
    BinanceSmartChain,
    Arbitrum,
    Optimism,
    Xdai,
    ZkSync,
    Arweave,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Ethereum => "ethereum",
            Network::Polygon => "polygon",
            Network::BinanceSmartChain => "binance_smart_chain",
            Network::Arbitrum => "arbitrum",
            Network::Optimism => "optimism",
            Network::Xdai => "xdai",
            Network::ZkSync => "zk_sync",
            Network::Arweave => "arweave",
        }
    }

    /// EVM networks treat addresses case-insensitively.
    pub fn is_evm(&self) -> bool {
        !matches!(self, Network::Arweave)
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = CrawlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ethereum" => Ok(Network::Ethereum),
            "polygon" => Ok(Network::Polygon),
            "binance_smart_chain" => Ok(Network::BinanceSmartChain),
            "arbitrum" => Ok(Network::Arbitrum),
            "optimism" => Ok(Network::Optimism),
            "xdai" => Ok(Network::Xdai),
            "zk_sync" => Ok(Network::ZkSync),
            "arweave" => Ok(Network::Arweave),
            other => Err(CrawlError::Decode(format!("unknown network: {other}"))),
        }
    }
}

/// Application-level platform living on top of a network (donations, posts).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Gitcoin,
    Mirror,
    Lens,
    Crossbell,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Gitcoin => "gitcoin",
            Platform::Mirror => "mirror",
            Platform::Lens => "lens",
            Platform::Crossbell => "crossbell",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = CrawlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gitcoin" => Ok(Platform::Gitcoin),
            "mirror" => Ok(Platform::Mirror),
            "lens" => Ok(Platform::Lens),
            "crossbell" => Ok(Platform::Crossbell),
            other => Err(CrawlError::Decode(format!("unknown platform: {other}"))),
        }
    }
}

// --- Fetch parameters ---

/// Inclusive block range `[from, to]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockWindow {
    pub from: i64,
    pub to: i64,
}

impl BlockWindow {
    pub fn new(from: i64, to: i64) -> Self {
        Self { from, to }
    }

    /// Number of blocks covered.
    pub fn len(&self) -> i64 {
        (self.to - self.from + 1).max(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One fetch request for one identity on one network.
///
/// The serialized form (without `window`) is the Recrawl Queue member, so two
/// lookups of the same identity with the same options collapse onto one entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkParam {
    pub identity: String,
    pub network: Network,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<DateTime<Utc>>,
    /// Block range, set only by the steady per-source loop.
    #[serde(default, skip_serializing)]
    pub window: Option<BlockWindow>,
}

impl WorkParam {
    pub fn new(identity: impl AsRef<str>, network: Network) -> Self {
        let identity = identity.as_ref().trim();
        let identity = if network.is_evm() && identity.starts_with("0x") {
            identity.to_lowercase()
        } else {
            identity.to_string()
        };

        Self {
            identity,
            network,
            platform: None,
            limit: None,
            since: None,
            window: None,
        }
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn with_window(mut self, window: BlockWindow) -> Self {
        self.window = Some(window);
        self
    }

    /// Canonical sorted-set member for this parameter.
    pub fn to_member(&self) -> Result<String, CrawlError> {
        serde_json::to_string(self).map_err(|e| CrawlError::Decode(e.to_string()))
    }

    pub fn from_member(member: &str) -> Result<Self, CrawlError> {
        serde_json::from_str(member).map_err(|e| CrawlError::Decode(e.to_string()))
    }
}

// --- Normalized records ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// Transfers, donations, posts: things that happened.
    Note,
    /// Things an identity holds.
    Asset,
    /// Standalone content items.
    Item,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Note => "note",
            RecordKind::Asset => "asset",
            RecordKind::Item => "item",
        }
    }
}

impl FromStr for RecordKind {
    type Err = CrawlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "note" => Ok(RecordKind::Note),
            "asset" => Ok(RecordKind::Asset),
            "item" => Ok(RecordKind::Item),
            other => Err(CrawlError::Decode(format!("unknown record kind: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    /// e.g. "quote", "media", "receipt".
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// The common output shape every source adapter produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    /// `"{network}:{proof}"`. Stable across re-fetches of the same event.
    pub identifier: String,
    pub kind: RecordKind,
    pub network: Network,
    pub platform: Option<Platform>,
    /// Adapter that produced the record.
    pub source: String,
    /// Upstream proof of the event (tx hash + log index, post id, ...).
    pub proof: String,
    pub owner: String,
    pub related_urls: Vec<String>,
    pub tags: Vec<String>,
    pub authors: Vec<String>,
    pub attachments: Vec<Attachment>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NormalizedRecord {
    pub fn new(
        kind: RecordKind,
        network: Network,
        proof: impl Into<String>,
        owner: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        let proof = proof.into();
        let now = Utc::now();
        Self {
            identifier: Self::identifier_for(network, &proof),
            kind,
            network,
            platform: None,
            source: source.into(),
            proof,
            owner: owner.into(),
            related_urls: Vec::new(),
            tags: Vec::new(),
            authors: Vec::new(),
            attachments: Vec::new(),
            metadata: serde_json::Value::Object(serde_json::Map::new()),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn identifier_for(network: Network, proof: &str) -> String {
        format!("{}:{}", network.as_str(), proof)
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.authors.push(author.into());
        self
    }

    pub fn with_related_url(mut self, url: impl Into<String>) -> Self {
        self.related_urls.push(url.into());
        self
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Set one top-level metadata key.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        if !self.metadata.is_object() {
            self.metadata = serde_json::Value::Object(serde_json::Map::new());
        }
        if let serde_json::Value::Object(map) = &mut self.metadata {
            map.insert(key.into(), value);
        }
        self
    }

    /// Event time upstream. Also the initial `updated_at`.
    pub fn with_created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = at;
        self
    }

    pub fn with_updated_at(mut self, at: DateTime<Utc>) -> Self {
        self.updated_at = at;
        self
    }
}

// --- Cursor state ---

/// Per-(source, network) scan position and stepping parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorState {
    pub source_key: String,
    pub network: Network,
    /// Next height to scan. Never decreases.
    pub from_height: i64,
    pub step: i64,
    pub min_step: i64,
    pub confirmations: i64,
    pub sleep_interval: Duration,
}

impl CursorState {
    /// Default cursor for a source that has never been polled.
    pub fn from_config(source: &SourceConfig) -> Self {
        Self {
            source_key: source.key.clone(),
            network: source.network,
            from_height: source.start_height,
            step: source.step,
            min_step: source.min_step,
            confirmations: source.confirmations,
            sleep_interval: source.sleep_interval(),
        }
    }

    /// Take the persisted position but the configured static parameters.
    /// A persisted step larger than the configured nominal is clamped.
    pub fn reconcile(mut self, source: &SourceConfig) -> Self {
        self.min_step = source.min_step;
        self.confirmations = source.confirmations;
        self.sleep_interval = source.sleep_interval();
        self.step = self.step.clamp(source.min_step, source.step);
        self.from_height = self.from_height.max(source.start_height);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_is_network_prefixed_proof() {
        let record = NormalizedRecord::new(
            RecordKind::Note,
            Network::Ethereum,
            "0xabc-12",
            "0xowner",
            "etherscan",
        );
        assert_eq!(record.identifier, "ethereum:0xabc-12");
    }

    #[test]
    fn evm_identities_are_lowercased() {
        let param = WorkParam::new(" 0xABCdef ", Network::Polygon);
        assert_eq!(param.identity, "0xabcdef");

        let param = WorkParam::new("SomeArweaveId", Network::Arweave);
        assert_eq!(param.identity, "SomeArweaveId");
    }

    #[test]
    fn member_omits_window() {
        let plain = WorkParam::new("0xabc", Network::Ethereum).with_limit(50);
        let windowed = plain.clone().with_window(BlockWindow::new(1, 10));

        assert_eq!(plain.to_member().unwrap(), windowed.to_member().unwrap());

        let decoded = WorkParam::from_member(&windowed.to_member().unwrap()).unwrap();
        assert_eq!(decoded, plain);
    }

    #[test]
    fn network_round_trips_through_str() {
        for network in [Network::Ethereum, Network::BinanceSmartChain, Network::ZkSync] {
            assert_eq!(network.as_str().parse::<Network>().unwrap(), network);
        }
        assert!("solana".parse::<Network>().is_err());
    }

    #[test]
    fn window_len_is_inclusive() {
        assert_eq!(BlockWindow::new(100, 150).len(), 51);
        assert_eq!(BlockWindow::new(5, 5).len(), 1);
        assert!(BlockWindow::new(6, 5).is_empty());
    }
}
