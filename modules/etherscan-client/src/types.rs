use serde::Deserialize;

/// Standard explorer envelope: `{"status":"1","message":"OK","result":...}`.
#[derive(Debug, Deserialize)]
pub(crate) struct ApiEnvelope {
    pub status: String,
    pub message: String,
    pub result: serde_json::Value,
}

/// JSON-RPC proxy envelope: `{"jsonrpc":"2.0","id":83,"result":"0x10d4f"}`.
#[derive(Debug, Deserialize)]
pub(crate) struct ProxyEnvelope {
    pub result: Option<serde_json::Value>,
    pub error: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sort {
    Asc,
    Desc,
}

impl Sort {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sort::Asc => "asc",
            Sort::Desc => "desc",
        }
    }
}

/// Block range and paging for account list endpoints. Bounds are inclusive.
#[derive(Debug, Clone)]
pub struct ListQuery {
    pub start_block: i64,
    pub end_block: i64,
    /// Items per page.
    pub offset: u32,
    pub sort: Sort,
    /// Follow pages until the range is exhausted instead of stopping after one.
    pub exhaustive: bool,
}

impl ListQuery {
    /// Every item in `[start_block, end_block]`.
    pub fn range(start_block: i64, end_block: i64) -> Self {
        Self {
            start_block,
            end_block,
            offset: crate::RANGE_PAGE_SIZE,
            sort: Sort::Asc,
            exhaustive: true,
        }
    }

    /// Most recent `limit` items across all blocks.
    pub fn latest(limit: u32) -> Self {
        Self {
            start_block: 0,
            end_block: 99_999_999,
            offset: limit,
            sort: Sort::Desc,
            exhaustive: false,
        }
    }
}

/// One ERC-20 transfer from `action=tokentx`. All numeric fields arrive as strings.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenTransfer {
    #[serde(rename = "blockNumber")]
    pub block_number: String,
    #[serde(rename = "timeStamp")]
    pub time_stamp: String,
    pub hash: String,
    #[serde(rename = "logIndex", default)]
    pub log_index: Option<String>,
    pub from: String,
    pub to: String,
    pub value: String,
    #[serde(rename = "contractAddress")]
    pub contract_address: String,
    #[serde(rename = "tokenName", default)]
    pub token_name: Option<String>,
    #[serde(rename = "tokenSymbol", default)]
    pub token_symbol: Option<String>,
    #[serde(rename = "tokenDecimal", default)]
    pub token_decimal: Option<String>,
}

/// One normal transaction from `action=txlist`.
#[derive(Debug, Clone, Deserialize)]
pub struct Transaction {
    #[serde(rename = "blockNumber")]
    pub block_number: String,
    #[serde(rename = "timeStamp")]
    pub time_stamp: String,
    pub hash: String,
    pub from: String,
    pub to: String,
    pub value: String,
    #[serde(rename = "isError", default)]
    pub is_error: Option<String>,
    #[serde(rename = "functionName", default)]
    pub function_name: Option<String>,
}
