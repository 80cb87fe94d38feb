pub mod error;
pub mod types;

pub use error::{EtherscanError, Result};
pub use types::{ListQuery, Sort, TokenTransfer, Transaction};

use std::future::Future;

use serde::de::DeserializeOwned;
use types::{ApiEnvelope, ProxyEnvelope};

/// Explorers refuse any request where `page * offset` exceeds this.
pub const MAX_RESULT_WINDOW: u32 = 10_000;

/// Page size for exhaustive range listings.
pub const RANGE_PAGE_SIZE: u32 = 1_000;

pub struct EtherscanClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl EtherscanClient {
    /// `base_url` is the API endpoint, e.g. "https://api.etherscan.io/api".
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, api_key)
    }

    pub fn with_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    /// Latest block height reported by the explorer's JSON-RPC proxy.
    pub async fn block_number(&self) -> Result<i64> {
        let body = self
            .get(&[("module", "proxy"), ("action", "eth_blockNumber")])
            .await?;

        // Rate-limit responses come back in the standard envelope, not JSON-RPC.
        if let Ok(envelope) = serde_json::from_value::<ApiEnvelope>(body.clone()) {
            if envelope.status == "0" {
                return Err(classify_failure(&envelope));
            }
        }

        let proxy: ProxyEnvelope = serde_json::from_value(body)?;
        if let Some(error) = proxy.error {
            return Err(EtherscanError::Api {
                status: 200,
                message: error.to_string(),
            });
        }

        let quantity = proxy
            .result
            .as_ref()
            .and_then(|v| v.as_str())
            .ok_or_else(|| EtherscanError::Parse("eth_blockNumber: missing result".into()))?;

        parse_quantity(quantity)
    }

    /// Raw ERC-20 transfer items for `address`.
    ///
    /// Items are returned undecoded so a single odd row can be skipped by the
    /// caller instead of failing the page; see [`TokenTransfer`].
    pub async fn token_transfers(
        &self,
        address: &str,
        query: &ListQuery,
    ) -> Result<Vec<serde_json::Value>> {
        self.account_list("tokentx", address, query).await
    }

    /// Raw normal-transaction items for `address`.
    pub async fn transactions(
        &self,
        address: &str,
        query: &ListQuery,
    ) -> Result<Vec<serde_json::Value>> {
        self.account_list("txlist", address, query).await
    }

    async fn account_list(
        &self,
        action: &str,
        address: &str,
        query: &ListQuery,
    ) -> Result<Vec<serde_json::Value>> {
        collect_pages(query, |page| self.account_page(action, address, query, page)).await
    }

    async fn account_page(
        &self,
        action: &str,
        address: &str,
        query: &ListQuery,
        page: u32,
    ) -> Result<Vec<serde_json::Value>> {
        let start = query.start_block.to_string();
        let end = query.end_block.to_string();
        let page_param = page.to_string();
        let offset = page_size(query).to_string();

        tracing::debug!(
            action,
            address,
            start_block = query.start_block,
            end_block = query.end_block,
            page,
            "etherscan: listing"
        );

        let body = self
            .get(&[
                ("module", "account"),
                ("action", action),
                ("address", address),
                ("startblock", start.as_str()),
                ("endblock", end.as_str()),
                ("page", page_param.as_str()),
                ("offset", offset.as_str()),
                ("sort", query.sort.as_str()),
            ])
            .await?;

        let envelope: ApiEnvelope = serde_json::from_value(body)?;
        if envelope.status != "1" {
            if is_empty_result(&envelope) {
                return Ok(Vec::new());
            }
            return Err(classify_failure(&envelope));
        }

        match envelope.result {
            serde_json::Value::Array(items) => Ok(items),
            other => Err(EtherscanError::Parse(format!(
                "{action}: expected array result, got {other}"
            ))),
        }
    }

    async fn get(&self, params: &[(&str, &str)]) -> Result<serde_json::Value> {
        let resp = self
            .client
            .get(&self.base_url)
            .query(params)
            .query(&[("apikey", self.api_key.as_str())])
            .timeout(std::time::Duration::from_secs(30))
            .send()
            .await?;

        let status = resp.status();
        if status.as_u16() == 429 {
            let body = resp.text().await.unwrap_or_default();
            return Err(EtherscanError::RateLimited(body));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(EtherscanError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        Ok(resp.json().await?)
    }
}

fn page_size(query: &ListQuery) -> u32 {
    query.offset.clamp(1, MAX_RESULT_WINDOW)
}

/// Fetch pages `1, 2, ...` until one comes back short.
///
/// Non-exhaustive queries stop after the first page. An exhaustive query
/// whose next page would cross [`MAX_RESULT_WINDOW`] fails with
/// `WindowTooLarge` rather than returning a truncated range.
async fn collect_pages<F, Fut>(query: &ListQuery, mut fetch_page: F) -> Result<Vec<serde_json::Value>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Vec<serde_json::Value>>>,
{
    let offset = page_size(query);
    let mut items = Vec::new();
    let mut page: u32 = 1;

    loop {
        let batch = fetch_page(page).await?;
        let full = batch.len() >= offset as usize;
        items.extend(batch);

        if !query.exhaustive || !full {
            return Ok(items);
        }

        let next = page + 1;
        if u64::from(next) * u64::from(offset) > u64::from(MAX_RESULT_WINDOW) {
            return Err(EtherscanError::WindowTooLarge {
                start_block: query.start_block,
                end_block: query.end_block,
                limit: MAX_RESULT_WINDOW,
            });
        }
        page = next;
    }
}

/// Decode one raw list item into its typed form.
pub fn decode_item<T: DeserializeOwned>(item: &serde_json::Value) -> Result<T> {
    Ok(serde_json::from_value(item.clone())?)
}

/// Parse a JSON-RPC hex quantity ("0x10d4f").
pub fn parse_quantity(quantity: &str) -> Result<i64> {
    let digits = quantity
        .strip_prefix("0x")
        .ok_or_else(|| EtherscanError::Parse(format!("not a hex quantity: {quantity}")))?;
    i64::from_str_radix(digits, 16)
        .map_err(|e| EtherscanError::Parse(format!("bad hex quantity {quantity}: {e}")))
}

fn is_empty_result(envelope: &ApiEnvelope) -> bool {
    envelope.message.starts_with("No transactions found")
        || envelope.message.starts_with("No records found")
}

fn classify_failure(envelope: &ApiEnvelope) -> EtherscanError {
    let detail = envelope
        .result
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| envelope.result.to_string());

    if detail.to_lowercase().contains("rate limit") {
        EtherscanError::RateLimited(detail)
    } else {
        EtherscanError::Api {
            status: 200,
            message: format!("{}: {}", envelope.message, detail),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_hex_quantities() {
        assert_eq!(parse_quantity("0x10d4f").unwrap(), 68943);
        assert_eq!(parse_quantity("0x0").unwrap(), 0);
        assert!(parse_quantity("1234").is_err());
        assert!(parse_quantity("0xzz").is_err());
    }

    #[test]
    fn rate_limit_message_is_classified() {
        let envelope: ApiEnvelope = serde_json::from_value(json!({
            "status": "0",
            "message": "NOTOK",
            "result": "Max rate limit reached, please use API Key for higher rate limit"
        }))
        .unwrap();
        assert!(matches!(
            classify_failure(&envelope),
            EtherscanError::RateLimited(_)
        ));
    }

    #[test]
    fn no_transactions_is_an_empty_page() {
        let envelope: ApiEnvelope = serde_json::from_value(json!({
            "status": "0",
            "message": "No transactions found",
            "result": []
        }))
        .unwrap();
        assert!(is_empty_result(&envelope));
    }

    fn items(n: usize) -> Vec<serde_json::Value> {
        (0..n).map(|i| json!({ "hash": format!("0x{i}") })).collect()
    }

    #[tokio::test]
    async fn range_listing_follows_full_pages() {
        let query = ListQuery::range(100, 150);
        let mut requested = Vec::new();

        let all = collect_pages(&query, |page| {
            requested.push(page);
            let n = if page < 3 { RANGE_PAGE_SIZE as usize } else { 7 };
            async move { Ok(items(n)) }
        })
        .await
        .unwrap();

        assert_eq!(requested, vec![1, 2, 3]);
        assert_eq!(all.len(), 2 * RANGE_PAGE_SIZE as usize + 7);
    }

    #[tokio::test]
    async fn range_listing_at_the_result_cap_is_an_error() {
        let query = ListQuery::range(100, 150);
        let mut requested = 0;

        let err = collect_pages(&query, |_| {
            requested += 1;
            async { Ok(items(RANGE_PAGE_SIZE as usize)) }
        })
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            EtherscanError::WindowTooLarge {
                start_block: 100,
                end_block: 150,
                ..
            }
        ));
        assert_eq!(requested, (MAX_RESULT_WINDOW / RANGE_PAGE_SIZE) as usize);
    }

    #[tokio::test]
    async fn full_single_page_range_is_not_silently_truncated() {
        let mut query = ListQuery::range(100, 150);
        query.offset = MAX_RESULT_WINDOW;

        let result = collect_pages(&query, |_| async { Ok(items(MAX_RESULT_WINDOW as usize)) }).await;

        assert!(matches!(result, Err(EtherscanError::WindowTooLarge { .. })));
    }

    #[tokio::test]
    async fn latest_listing_reads_one_page() {
        let query = ListQuery::latest(20);
        let mut requested = 0;

        let all = collect_pages(&query, |_| {
            requested += 1;
            async { Ok(items(20)) }
        })
        .await
        .unwrap();

        assert_eq!(requested, 1);
        assert_eq!(all.len(), 20);
    }

    #[tokio::test]
    async fn page_errors_propagate() {
        let query = ListQuery::range(1, 2);
        let result = collect_pages(&query, |_| async {
            Err(EtherscanError::RateLimited("Max rate limit reached".into()))
        })
        .await;
        assert!(matches!(result, Err(EtherscanError::RateLimited(_))));
    }

    #[test]
    fn decodes_token_transfer_item() {
        let item = json!({
            "blockNumber": "12000010",
            "timeStamp": "1617000000",
            "hash": "0xabc",
            "logIndex": "12",
            "from": "0xfrom",
            "to": "0xto",
            "value": "1000000",
            "contractAddress": "0xtoken",
            "tokenSymbol": "USDC",
            "tokenDecimal": "6"
        });
        let transfer: TokenTransfer = decode_item(&item).unwrap();
        assert_eq!(transfer.log_index.as_deref(), Some("12"));
        assert_eq!(transfer.token_name, None);
    }
}
