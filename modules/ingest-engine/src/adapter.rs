//! The plug-in contract every external platform implements.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use ingest_common::{CrawlResult, NormalizedRecord, WorkParam};

/// One upstream event as fetched, before normalization.
#[derive(Debug, Clone)]
pub struct RawEvent {
    /// Which upstream endpoint produced it, e.g. "tokentx".
    pub endpoint: String,
    pub payload: serde_json::Value,
}

impl RawEvent {
    pub fn new(endpoint: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            endpoint: endpoint.into(),
            payload,
        }
    }
}

/// Public profile of an identity, when the platform exposes one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub identity: String,
    pub name: Option<String>,
    pub bio: Option<String>,
    pub avatar: Option<String>,
    pub links: Vec<String>,
}

/// Talks to one external API and turns its payloads into normalized records.
///
/// `fetch` may fan out to several endpoints concurrently but must fail as a
/// whole if any of them fails. `normalize` handles a single event; an error
/// there drops only that event.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Adapter name (recorded as `NormalizedRecord::source`).
    fn name(&self) -> &str;

    async fn fetch(&self, param: &WorkParam) -> CrawlResult<Vec<RawEvent>>;

    fn normalize(&self, param: &WorkParam, raw: &RawEvent) -> CrawlResult<NormalizedRecord>;

    async fn profile(&self, _param: &WorkParam) -> CrawlResult<Option<Profile>> {
        Ok(None)
    }
}
