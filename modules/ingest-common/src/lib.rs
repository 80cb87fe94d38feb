//! Shared types for the ingestion workspace: normalized records, fetch
//! parameters, cursor state, the crawl error taxonomy and configuration.

pub mod config;
pub mod error;
pub mod file_config;
pub mod types;

pub use config::AppConfig;
pub use error::{CrawlError, CrawlResult};
pub use file_config::{AdapterKind, DatabaseConfig, FileConfig, RecrawlConfig, SourceConfig};
pub use types::{
    Attachment, BlockWindow, CursorState, Network, NormalizedRecord, Platform, RecordKind,
    WorkParam,
};
