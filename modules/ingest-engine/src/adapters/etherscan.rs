//! Etherscan-compatible explorers (Etherscan, Polygonscan, BscScan, ...).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;

use etherscan_client::{
    decode_item, EtherscanClient, EtherscanError, ListQuery, TokenTransfer, Transaction,
};
use ingest_common::{CrawlError, CrawlResult, Network, NormalizedRecord, RecordKind, WorkParam};

use crate::adapter::{RawEvent, SourceAdapter};
use crate::cache::TtlCache;
use crate::height::HeightSource;

const TOKEN_TRANSFERS: &str = "tokentx";
const TRANSACTIONS: &str = "txlist";
const DEFAULT_LIMIT: u32 = 100;
const TOKEN_TTL: Duration = Duration::from_secs(6 * 60 * 60);
/// A uint256 has at most 78 decimal digits.
const MAX_DECIMALS: u32 = 77;

/// Token symbol and decimals, shared across cycles through the adapter's cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenMeta {
    pub name: Option<String>,
    pub symbol: String,
    pub decimals: u32,
}

pub struct EtherscanAdapter {
    client: Arc<EtherscanClient>,
    network: Network,
    tokens: Arc<TtlCache<String, TokenMeta>>,
}

impl EtherscanAdapter {
    pub fn new(client: Arc<EtherscanClient>, network: Network) -> Self {
        Self::with_token_cache(client, network, Arc::new(TtlCache::new(TOKEN_TTL)))
    }

    /// Share one token cache between adapters of the same explorer.
    pub fn with_token_cache(
        client: Arc<EtherscanClient>,
        network: Network,
        tokens: Arc<TtlCache<String, TokenMeta>>,
    ) -> Self {
        Self {
            client,
            network,
            tokens,
        }
    }

    fn normalize_transfer(&self, param: &WorkParam, raw: &RawEvent) -> CrawlResult<NormalizedRecord> {
        let transfer: TokenTransfer = decode_item(&raw.payload)
            .map_err(|e| CrawlError::MalformedRecord(format!("{TOKEN_TRANSFERS}: {e}")))?;

        let log_index = transfer
            .log_index
            .as_deref()
            .ok_or_else(|| CrawlError::MalformedRecord(format!("{}: missing logIndex", transfer.hash)))?;
        let token = self.token_meta(&transfer)?;

        let mut record = base_record(
            param,
            self.network,
            format!("{}-{}", transfer.hash, log_index),
            &transfer.hash,
            &transfer.time_stamp,
        )?
        .with_tags(["transaction", "token"])
        .with_author(&transfer.from)
        .with_metadata("block_number", json!(transfer.block_number))
        .with_metadata("from", json!(transfer.from))
        .with_metadata("to", json!(transfer.to))
        .with_metadata("value", json!(transfer.value))
        .with_metadata("contract_address", json!(transfer.contract_address))
        .with_metadata("endpoint", json!(raw.endpoint));

        if let Some(token) = token {
            if let Some(amount) = format_units(&transfer.value, token.decimals) {
                record = record.with_metadata("amount", json!(amount));
            }
            record = record
                .with_metadata("symbol", json!(token.symbol))
                .with_metadata("decimals", json!(token.decimals));
            if let Some(name) = token.name {
                record = record.with_metadata("token_name", json!(name));
            }
        }

        Ok(record.with_related_url(tx_url(self.network, &transfer.hash)))
    }

    fn normalize_transaction(
        &self,
        param: &WorkParam,
        raw: &RawEvent,
    ) -> CrawlResult<NormalizedRecord> {
        let tx: Transaction = decode_item(&raw.payload)
            .map_err(|e| CrawlError::MalformedRecord(format!("{TRANSACTIONS}: {e}")))?;

        let mut record = base_record(param, self.network, tx.hash.clone(), &tx.hash, &tx.time_stamp)?
            .with_tags(["transaction", "transfer"])
            .with_author(&tx.from)
            .with_metadata("block_number", json!(tx.block_number))
            .with_metadata("from", json!(tx.from))
            .with_metadata("to", json!(tx.to))
            .with_metadata("value", json!(tx.value))
            .with_metadata("failed", json!(tx.is_error.as_deref() == Some("1")))
            .with_metadata("endpoint", json!(raw.endpoint));

        if let Some(amount) = format_units(&tx.value, 18) {
            record = record.with_metadata("amount", json!(amount));
        }
        if let Some(function) = tx.function_name.filter(|f| !f.is_empty()) {
            record = record.with_metadata("function_name", json!(function));
        }

        Ok(record.with_related_url(tx_url(self.network, &tx.hash)))
    }

    /// Token details from the transfer itself, falling back to the cache when
    /// the explorer omits them. Complete details refresh the cache.
    fn token_meta(&self, transfer: &TokenTransfer) -> CrawlResult<Option<TokenMeta>> {
        let key = transfer.contract_address.to_lowercase();
        let decimals = transfer
            .token_decimal
            .as_deref()
            .and_then(|d| d.parse::<u32>().ok());
        if let Some(decimals) = decimals.filter(|d| *d > MAX_DECIMALS) {
            return Err(CrawlError::MalformedRecord(format!(
                "{}: tokenDecimal {decimals} out of range",
                transfer.hash
            )));
        }

        match (transfer.token_symbol.as_deref(), decimals) {
            (Some(symbol), Some(decimals)) if !symbol.is_empty() => {
                let meta = TokenMeta {
                    name: transfer.token_name.clone().filter(|n| !n.is_empty()),
                    symbol: symbol.to_string(),
                    decimals,
                };
                self.tokens.insert(key, meta.clone());
                Ok(Some(meta))
            }
            _ => Ok(self.tokens.get(&key)),
        }
    }
}

#[async_trait]
impl SourceAdapter for EtherscanAdapter {
    fn name(&self) -> &str {
        "etherscan"
    }

    /// Token transfers and normal transactions are fetched concurrently; if
    /// either call fails the whole fetch fails.
    async fn fetch(&self, param: &WorkParam) -> CrawlResult<Vec<RawEvent>> {
        let query = match param.window {
            Some(window) => ListQuery::range(window.from, window.to),
            None => ListQuery::latest(param.limit.unwrap_or(DEFAULT_LIMIT)),
        };

        let (transfers, transactions) = tokio::try_join!(
            self.client.token_transfers(&param.identity, &query),
            self.client.transactions(&param.identity, &query),
        )
        .map_err(upstream_error)?;

        let events = transfers
            .into_iter()
            .map(|item| RawEvent::new(TOKEN_TRANSFERS, item))
            .chain(
                transactions
                    .into_iter()
                    .map(|item| RawEvent::new(TRANSACTIONS, item)),
            )
            .filter(|event| match param.since {
                Some(since) => !is_before(&event.payload, since),
                None => true,
            })
            .collect();

        Ok(events)
    }

    fn normalize(&self, param: &WorkParam, raw: &RawEvent) -> CrawlResult<NormalizedRecord> {
        match raw.endpoint.as_str() {
            TOKEN_TRANSFERS => self.normalize_transfer(param, raw),
            TRANSACTIONS => self.normalize_transaction(param, raw),
            other => Err(CrawlError::MalformedRecord(format!(
                "unknown endpoint: {other}"
            ))),
        }
    }
}

/// Latest block via the explorer's JSON-RPC proxy.
pub struct EtherscanHeightSource {
    client: Arc<EtherscanClient>,
}

impl EtherscanHeightSource {
    pub fn new(client: Arc<EtherscanClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HeightSource for EtherscanHeightSource {
    async fn latest_height(&self) -> CrawlResult<i64> {
        self.client.block_number().await.map_err(upstream_error)
    }
}

pub(crate) fn upstream_error(err: EtherscanError) -> CrawlError {
    match err {
        EtherscanError::RateLimited(msg) => CrawlError::UpstreamRateLimited(msg),
        err @ EtherscanError::WindowTooLarge { .. } => CrawlError::WindowTooLarge(err.to_string()),
        other => CrawlError::UpstreamUnavailable(other.to_string()),
    }
}

fn base_record(
    param: &WorkParam,
    network: Network,
    proof: String,
    hash: &str,
    time_stamp: &str,
) -> CrawlResult<NormalizedRecord> {
    if hash.is_empty() {
        return Err(CrawlError::MalformedRecord("empty transaction hash".into()));
    }
    let created_at = parse_timestamp(time_stamp).ok_or_else(|| {
        CrawlError::MalformedRecord(format!("{hash}: bad timeStamp {time_stamp:?}"))
    })?;

    let mut record = NormalizedRecord::new(
        RecordKind::Note,
        network,
        proof,
        param.identity.clone(),
        "etherscan",
    )
    .with_created_at(created_at);

    if let Some(platform) = param.platform {
        record = record.with_platform(platform);
    }
    Ok(record)
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let secs = value.parse::<i64>().ok()?;
    DateTime::from_timestamp(secs, 0)
}

/// Items without a readable timestamp are kept; normalization reports them.
fn is_before(payload: &serde_json::Value, since: DateTime<Utc>) -> bool {
    payload
        .get("timeStamp")
        .and_then(|v| v.as_str())
        .and_then(parse_timestamp)
        .is_some_and(|at| at < since)
}

fn tx_url(network: Network, hash: &str) -> String {
    let base = match network {
        Network::Ethereum => "https://etherscan.io/tx/",
        Network::Polygon => "https://polygonscan.com/tx/",
        Network::BinanceSmartChain => "https://bscscan.com/tx/",
        Network::Arbitrum => "https://arbiscan.io/tx/",
        Network::Optimism => "https://optimistic.etherscan.io/tx/",
        Network::Xdai => "https://gnosisscan.io/tx/",
        Network::ZkSync => "https://explorer.zksync.io/tx/",
        Network::Arweave => "https://viewblock.io/arweave/tx/",
    };
    format!("{base}{hash}")
}

/// Render an integer base-unit amount with `decimals` places
/// ("1500000", 6 -> "1.5"). `None` if `value` is not a plain integer.
fn format_units(value: &str, decimals: u32) -> Option<String> {
    if decimals > MAX_DECIMALS || value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let decimals = decimals as usize;
    let digits = value.trim_start_matches('0');
    if decimals == 0 {
        return Some(if digits.is_empty() { "0".into() } else { digits.into() });
    }

    let padded = format!("{digits:0>width$}", width = decimals + 1);
    let (whole, fraction) = padded.split_at(padded.len() - decimals);
    let fraction = fraction.trim_end_matches('0');

    Some(if fraction.is_empty() {
        whole.to_string()
    } else {
        format!("{whole}.{fraction}")
    })
}
