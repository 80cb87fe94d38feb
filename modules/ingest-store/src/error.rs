use ingest_common::CrawlError;

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt row: {0}")]
    Decode(String),
}

impl From<StoreError> for CrawlError {
    fn from(err: StoreError) -> Self {
        CrawlError::Storage(err.to_string())
    }
}
