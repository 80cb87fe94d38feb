//! Adapter selection and the fetch -> normalize -> store pipeline.
//!
//! Every caller (steady loops, on-demand lookups, recrawl drains) goes
//! through [`Dispatcher::dispatch`], so normalization and idempotent
//! storage are enforced in exactly one place.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use ingest_common::{CrawlError, CrawlResult, Network, NormalizedRecord, Platform, WorkParam};
use ingest_store::RecordStore;

use crate::adapter::{Profile, SourceAdapter};
use crate::cache::TtlCache;
use crate::recrawl::RecrawlQueue;

const DEFAULT_PROFILE_TTL: Duration = Duration::from_secs(10 * 60);

/// Result of one dispatch: the records that were stored and how many raw
/// events were dropped as malformed.
#[derive(Debug, Clone, Default)]
pub struct Dispatched {
    pub records: Vec<NormalizedRecord>,
    pub skipped: usize,
}

pub struct Dispatcher {
    adapters: HashMap<(Network, Option<Platform>), Arc<dyn SourceAdapter>>,
    store: Arc<dyn RecordStore>,
    queue: Option<Arc<RecrawlQueue>>,
    profiles: TtlCache<String, Option<Profile>>,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            adapters: HashMap::new(),
            store,
            queue: None,
            profiles: TtlCache::new(DEFAULT_PROFILE_TTL),
        }
    }

    /// Register `adapter` for a network, optionally narrowed to one platform.
    /// A later registration for the same key replaces the earlier one.
    pub fn register(
        mut self,
        network: Network,
        platform: Option<Platform>,
        adapter: Arc<dyn SourceAdapter>,
    ) -> Self {
        self.adapters.insert((network, platform), adapter);
        self
    }

    /// Record on-demand lookups in `queue` so they get re-polled later.
    pub fn with_recrawl_queue(mut self, queue: Arc<RecrawlQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn with_profile_ttl(mut self, ttl: Duration) -> Self {
        self.profiles = TtlCache::new(ttl);
        self
    }

    pub fn supports(&self, network: Network, platform: Option<Platform>) -> bool {
        self.adapter_for(network, platform).is_ok()
    }

    /// Exact `(network, platform)` match first, then the network-wide adapter.
    fn adapter_for(
        &self,
        network: Network,
        platform: Option<Platform>,
    ) -> CrawlResult<&Arc<dyn SourceAdapter>> {
        self.adapters
            .get(&(network, platform))
            .or_else(|| self.adapters.get(&(network, None)))
            .ok_or(CrawlError::UnsupportedNetwork { network, platform })
    }

    /// Run one fetch-normalize-store cycle for `param`.
    ///
    /// Nothing is stored if the fetch fails. Malformed events are logged and
    /// skipped; the rest of the batch is stored in one transaction.
    pub async fn dispatch(&self, param: &WorkParam) -> CrawlResult<Dispatched> {
        let adapter = self.adapter_for(param.network, param.platform)?;

        let events = adapter.fetch(param).await?;

        let mut records = Vec::with_capacity(events.len());
        let mut skipped = 0;
        for event in &events {
            match adapter.normalize(param, event) {
                Ok(record) => records.push(record),
                Err(CrawlError::MalformedRecord(reason)) | Err(CrawlError::Decode(reason)) => {
                    warn!(
                        adapter = adapter.name(),
                        network = %param.network,
                        identity = %param.identity,
                        endpoint = %event.endpoint,
                        error = %reason,
                        "Skipping malformed record"
                    );
                    skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }

        if !records.is_empty() {
            self.store.store(&records).await?;
        }

        debug!(
            adapter = adapter.name(),
            network = %param.network,
            identity = %param.identity,
            fetched = events.len(),
            stored = records.len(),
            skipped,
            "Dispatch complete"
        );

        Ok(Dispatched { records, skipped })
    }

    /// On-demand entry point: remember the visit, then dispatch.
    ///
    /// Requests no adapter serves are rejected before they reach the queue.
    /// A queue failure is logged and does not fail the lookup.
    pub async fn lookup(&self, param: &WorkParam) -> CrawlResult<Dispatched> {
        self.adapter_for(param.network, param.platform)?;

        if let Some(queue) = &self.queue {
            if let Err(e) = queue.add(param).await {
                warn!(
                    network = %param.network,
                    identity = %param.identity,
                    error = %e,
                    "Failed to record visit"
                );
            }
        }

        self.dispatch(param).await
    }

    /// Profile for `param.identity`, cached per identity for the profile TTL.
    /// Negative results are cached too.
    pub async fn profile(&self, param: &WorkParam) -> CrawlResult<Option<Profile>> {
        let adapter = self.adapter_for(param.network, param.platform)?;
        let key = profile_key(param);

        if let Some(cached) = self.profiles.get(&key) {
            return Ok(cached);
        }

        let profile = adapter.profile(param).await?;
        self.profiles.insert(key, profile.clone());
        Ok(profile)
    }

    /// Drop a cached profile so the next call refetches it.
    pub fn refresh_profile(&self, param: &WorkParam) -> bool {
        self.profiles.invalidate(&profile_key(param))
    }
}

/// Profiles are per adapter, so the platform is part of the key.
fn profile_key(param: &WorkParam) -> String {
    match param.platform {
        Some(platform) => format!("{}:{}:{}", param.network, platform, param.identity),
        None => format!("{}:{}", param.network, param.identity),
    }
}
