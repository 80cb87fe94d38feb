//! Recency queue of looked-up identities and its periodic drain.
//!
//! Members are the canonical serialization of a [`WorkParam`] scored by the
//! Unix time of the latest visit. Members leave the set through
//! [`RecrawlQueue::clear_old`], or when they can never succeed (undecodable,
//! or no adapter serves them). A successful drain leaves the score
//! untouched, so an identity is re-polled on every pass until its last visit
//! ages out of the retention window.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{info, warn};

use ingest_common::{CrawlError, CrawlResult, WorkParam};
use ingest_store::VisitStore;

use crate::dispatcher::Dispatcher;

/// One failure during a drain pass.
#[derive(Debug, thiserror::Error)]
pub enum DrainError {
    #[error("member {member}: {error}")]
    Member { member: String, error: CrawlError },

    #[error("scan failed: {0}")]
    Scan(CrawlError),
}

/// Aggregate of every failure in a pass, plus how many members were visited.
#[derive(Debug, Default)]
pub struct DrainErrors {
    pub visited: usize,
    pub errors: Vec<DrainError>,
}

impl DrainErrors {
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

impl fmt::Display for DrainErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} of {} recrawl members failed", self.errors.len(), self.visited)?;
        for error in &self.errors {
            write!(f, "; {error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for DrainErrors {}

pub struct RecrawlQueue {
    store: Arc<dyn VisitStore>,
    page_size: u32,
    retention: Duration,
}

impl RecrawlQueue {
    pub fn new(store: Arc<dyn VisitStore>, page_size: u32, retention: Duration) -> Self {
        Self {
            store,
            page_size: page_size.max(1),
            retention,
        }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Record a visit now. Re-adding bumps the score.
    pub async fn add(&self, param: &WorkParam) -> CrawlResult<()> {
        self.add_at(param, Utc::now()).await
    }

    pub async fn add_at(&self, param: &WorkParam, at: DateTime<Utc>) -> CrawlResult<()> {
        let member = param.to_member()?;
        self.store.upsert_score(&member, at.timestamp()).await?;
        Ok(())
    }

    /// Visit time of `param`, if present.
    pub async fn score(&self, param: &WorkParam) -> CrawlResult<Option<i64>> {
        let member = param.to_member()?;
        Ok(self.store.score(&member).await?)
    }

    pub async fn len(&self) -> CrawlResult<u64> {
        Ok(self.store.len().await?)
    }

    /// Remove every member visited before `now - retention`.
    pub async fn clear_old(&self, now: DateTime<Utc>, retention: Duration) -> CrawlResult<u64> {
        let removed = self.store.remove_below(cutoff(now, retention)).await?;
        Ok(removed)
    }

    /// Call `f` once for every member still inside the retention window.
    ///
    /// Pages walk member order, so score refreshes during the pass cannot
    /// cause a member to be skipped or repeated. A failing member does not
    /// stop the pass; failures are collected and returned together.
    pub async fn iter<F, Fut>(&self, now: DateTime<Utc>, mut f: F) -> Result<usize, DrainErrors>
    where
        F: FnMut(WorkParam) -> Fut,
        Fut: Future<Output = CrawlResult<()>>,
    {
        let min_score = cutoff(now, self.retention);
        let mut report = DrainErrors::default();
        let mut after: Option<String> = None;

        loop {
            let page = match self
                .store
                .scan(after.as_deref(), min_score, self.page_size)
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    report.errors.push(DrainError::Scan(e.into()));
                    break;
                }
            };

            let done = page.len() < self.page_size as usize;
            after = page.last().map(|entry| entry.member.clone());

            for entry in page {
                report.visited += 1;

                // Undecodable members and unserved networks fail on every pass.
                let result = match WorkParam::from_member(&entry.member) {
                    Ok(param) => f(param).await.map_err(|error| {
                        let permanent = matches!(error, CrawlError::UnsupportedNetwork { .. });
                        (error, permanent)
                    }),
                    Err(error) => Err((error, true)),
                };

                if let Err((error, permanent)) = result {
                    if permanent {
                        self.forget(&entry.member).await;
                    }
                    report.errors.push(DrainError::Member {
                        member: entry.member,
                        error,
                    });
                }
            }

            if done || after.is_none() {
                break;
            }
        }

        if report.is_empty() {
            Ok(report.visited)
        } else {
            Err(report)
        }
    }

    async fn forget(&self, member: &str) {
        if let Err(e) = self.store.remove(member).await {
            warn!(member, error = %e, "Failed to remove recrawl member");
        }
    }
}

fn cutoff(now: DateTime<Utc>, retention: Duration) -> i64 {
    now.timestamp()
        .saturating_sub(i64::try_from(retention.as_secs()).unwrap_or(i64::MAX))
}

/// Periodically expires old visits and re-dispatches the rest.
pub struct RecrawlWorker {
    queue: Arc<RecrawlQueue>,
    dispatcher: Arc<Dispatcher>,
    interval: Duration,
}

impl RecrawlWorker {
    pub fn new(queue: Arc<RecrawlQueue>, dispatcher: Arc<Dispatcher>, interval: Duration) -> Self {
        Self {
            queue,
            dispatcher,
            interval,
        }
    }

    /// One pass: `clear_old`, then dispatch every remaining member.
    pub async fn drain_once(&self, now: DateTime<Utc>) -> Result<usize, DrainErrors> {
        match self.queue.clear_old(now, self.queue.retention()).await {
            Ok(0) => {}
            Ok(removed) => info!(removed, "Expired recrawl members"),
            // iter filters by the same cutoff, so stale members stay invisible.
            Err(e) => warn!(error = %e, "Failed to expire recrawl members"),
        }

        let dispatcher = &self.dispatcher;
        self.queue
            .iter(now, |param| async move {
                dispatcher.dispatch(&param).await.map(|_| ())
            })
            .await
    }

    /// Drain every `interval` until `shutdown` flips to true. A pass in
    /// progress always finishes.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "Recrawl worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.drain_once(Utc::now()).await {
                Ok(visited) => info!(visited, "Recrawl pass complete"),
                Err(errors) => warn!(
                    visited = errors.visited,
                    failed = errors.len(),
                    error = %errors,
                    "Recrawl pass finished with errors"
                ),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Recrawl worker stopped");
    }
}
