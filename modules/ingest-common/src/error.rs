//! Crawl error taxonomy shared by stores, adapters and loops.

use thiserror::Error;

use crate::types::{Network, Platform};

#[derive(Debug, Error)]
pub enum CrawlError {
    /// Network or API failure. Retried on the next tick.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Upstream throttled us. Retried on the next tick with a minimal step.
    #[error("upstream rate limited: {0}")]
    UpstreamRateLimited(String),

    /// The requested window holds more items than upstream will page through.
    /// Retried next tick with a minimal step.
    #[error("window too large: {0}")]
    WindowTooLarge(String),

    /// No adapter registered for the request. Never retried.
    #[error("unsupported network: {network} (platform: {})", platform_label(.platform))]
    UnsupportedNetwork {
        network: Network,
        platform: Option<Platform>,
    },

    /// A single raw event could not be normalized.
    #[error("malformed record: {0}")]
    MalformedRecord(String),

    /// The batch transaction failed. Nothing was written.
    #[error("storage error: {0}")]
    Storage(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("configuration error: {0}")]
    Config(String),
}

fn platform_label(platform: &Option<Platform>) -> &'static str {
    platform.map(|p| p.as_str()).unwrap_or("any")
}

impl CrawlError {
    /// Errors the polling loop and queue drain absorb and retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CrawlError::UpstreamUnavailable(_)
                | CrawlError::UpstreamRateLimited(_)
                | CrawlError::WindowTooLarge(_)
                | CrawlError::Storage(_)
        )
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, CrawlError::UpstreamRateLimited(_))
    }

    /// Errors after which the polling loop drops to its minimum step.
    pub fn shrinks_step(&self) -> bool {
        matches!(
            self,
            CrawlError::UpstreamRateLimited(_) | CrawlError::WindowTooLarge(_)
        )
    }
}

pub type CrawlResult<T> = std::result::Result<T, CrawlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_network_names_platform() {
        let err = CrawlError::UnsupportedNetwork {
            network: Network::Arweave,
            platform: Some(Platform::Mirror),
        };
        assert_eq!(
            err.to_string(),
            "unsupported network: arweave (platform: mirror)"
        );
        assert!(!err.is_transient());
    }

    #[test]
    fn transient_classification() {
        assert!(CrawlError::UpstreamUnavailable("timeout".into()).is_transient());
        assert!(CrawlError::UpstreamRateLimited("429".into()).is_rate_limited());
        assert!(CrawlError::Storage("deadlock".into()).is_transient());
        assert!(!CrawlError::Config("missing key".into()).is_transient());
    }

    #[test]
    fn oversized_window_shrinks_step() {
        let err = CrawlError::WindowTooLarge("[100, 150] exceeds 10000 items".into());
        assert!(err.is_transient());
        assert!(err.shrinks_step());
        assert!(!err.is_rate_limited());
        assert!(!CrawlError::UpstreamUnavailable("503".into()).shrinks_step());
    }
}
