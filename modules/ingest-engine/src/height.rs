//! Confirmation-aware chain head resolution.

use std::sync::Arc;

use async_trait::async_trait;

use ingest_common::{CrawlError, CrawlResult, Network};

/// A chain's "latest height" endpoint.
#[async_trait]
pub trait HeightSource: Send + Sync {
    async fn latest_height(&self) -> CrawlResult<i64>;
}

/// Reports the highest block considered safe from reorgs:
/// `latest - confirmations`, floored at zero.
#[derive(Clone)]
pub struct HeightResolver {
    network: Network,
    confirmations: i64,
    source: Arc<dyn HeightSource>,
}

impl HeightResolver {
    pub fn new(network: Network, confirmations: i64, source: Arc<dyn HeightSource>) -> Self {
        Self {
            network,
            confirmations: confirmations.max(0),
            source,
        }
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn confirmations(&self) -> i64 {
        self.confirmations
    }

    /// Fails with `UpstreamUnavailable` (or `UpstreamRateLimited`) when the
    /// endpoint errors; callers retry on their next tick.
    pub async fn safe_height(&self) -> CrawlResult<i64> {
        let latest = self.source.latest_height().await.map_err(|e| match e {
            CrawlError::UpstreamRateLimited(_) | CrawlError::UpstreamUnavailable(_) => e,
            other => CrawlError::UpstreamUnavailable(format!(
                "{} latest height: {other}",
                self.network
            )),
        })?;

        Ok((latest - self.confirmations).max(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedHeight(CrawlResult<i64>);

    #[async_trait]
    impl HeightSource for FixedHeight {
        async fn latest_height(&self) -> CrawlResult<i64> {
            match &self.0 {
                Ok(h) => Ok(*h),
                Err(e) => Err(CrawlError::Decode(e.to_string())),
            }
        }
    }

    #[tokio::test]
    async fn subtracts_confirmations() {
        let resolver = HeightResolver::new(Network::Ethereum, 15, Arc::new(FixedHeight(Ok(145))));
        assert_eq!(resolver.safe_height().await.unwrap(), 130);
    }

    #[tokio::test]
    async fn floors_at_zero() {
        let resolver = HeightResolver::new(Network::Ethereum, 15, Arc::new(FixedHeight(Ok(3))));
        assert_eq!(resolver.safe_height().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn endpoint_failures_surface_as_upstream_unavailable() {
        let resolver = HeightResolver::new(
            Network::Polygon,
            5,
            Arc::new(FixedHeight(Err(CrawlError::Decode("garbage".into())))),
        );
        let err = resolver.safe_height().await.unwrap_err();
        assert!(matches!(err, CrawlError::UpstreamUnavailable(_)));
        assert!(err.is_transient());
    }
}
