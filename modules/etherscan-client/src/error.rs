use thiserror::Error;

pub type Result<T> = std::result::Result<T, EtherscanError>;

#[derive(Debug, Error)]
pub enum EtherscanError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// The range holds more items than the explorer will page through.
    #[error("Window too large: blocks {start_block}..={end_block} exceed {limit} items")]
    WindowTooLarge {
        start_block: i64,
        end_block: i64,
        limit: u32,
    },

    #[error("Parse error: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for EtherscanError {
    fn from(err: reqwest::Error) -> Self {
        EtherscanError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for EtherscanError {
    fn from(err: serde_json::Error) -> Self {
        EtherscanError::Parse(err.to_string())
    }
}
