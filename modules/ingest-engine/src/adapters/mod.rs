//! Built-in source adapters.

pub mod etherscan;

pub use etherscan::{EtherscanAdapter, EtherscanHeightSource, TokenMeta};
