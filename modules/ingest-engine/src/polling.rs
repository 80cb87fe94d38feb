//! The per-source steady loop.
//!
//! A cycle reads the cursor, resolves the confirmed head, plans a window,
//! dispatches it and only then advances the cursor. Cycles of one loop are
//! strictly sequential; the cursor is never touched while a fetch is in
//! flight.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use ingest_common::{CrawlError, CrawlResult, CursorState, SourceConfig, WorkParam};
use ingest_store::CursorStore;

use crate::dispatcher::Dispatcher;
use crate::height::HeightResolver;
use crate::step::{StepController, StepPlan};

#[derive(Debug)]
pub enum CycleOutcome {
    /// `[from, to]` was stored and the cursor moved to `to + 1`.
    Advanced {
        from: i64,
        to: i64,
        records: usize,
        /// The next window does not fit under the confirmed head yet.
        caught_up: bool,
    },
    /// Not enough confirmed blocks, even after backing off once.
    Waiting { safe_height: i64, needed: i64 },
    /// Nothing was advanced; the same window is retried next cycle.
    Failed(CrawlError),
}

pub struct PollingLoop {
    source: SourceConfig,
    resolver: HeightResolver,
    dispatcher: Arc<Dispatcher>,
    cursors: Arc<dyn CursorStore>,
    controller: StepController,
}

impl PollingLoop {
    pub fn new(
        source: SourceConfig,
        resolver: HeightResolver,
        dispatcher: Arc<Dispatcher>,
        cursors: Arc<dyn CursorStore>,
    ) -> Self {
        let controller = StepController::new(source.step);
        Self {
            source,
            resolver,
            dispatcher,
            cursors,
            controller,
        }
    }

    pub fn source(&self) -> &SourceConfig {
        &self.source
    }

    /// Persisted cursor with the configured stepping parameters, or a fresh
    /// one for a source that has never been polled.
    async fn load_cursor(&self) -> CrawlResult<CursorState> {
        let cursor = match self
            .cursors
            .load(&self.source.key, self.source.network)
            .await?
        {
            Some(stored) => stored.reconcile(&self.source),
            None => CursorState::from_config(&self.source),
        };
        Ok(cursor)
    }

    /// Run one cycle. Never panics on upstream or storage failure; the
    /// failure is reported in the outcome.
    pub async fn run_cycle(&self) -> CycleOutcome {
        match self.cycle().await {
            Ok(outcome) => outcome,
            Err(e) => CycleOutcome::Failed(e),
        }
    }

    async fn cycle(&self) -> CrawlResult<CycleOutcome> {
        let mut cursor = self.load_cursor().await?;

        let mut safe_height = self.safe_height(&mut cursor).await?;
        let window = match self.controller.plan(&cursor, safe_height) {
            StepPlan::Fetch(window) => window,
            StepPlan::Insufficient { .. } => {
                tokio::time::sleep(cursor.sleep_interval).await;
                safe_height = self.safe_height(&mut cursor).await?;

                match self.controller.plan(&cursor, safe_height) {
                    StepPlan::Fetch(window) => window,
                    StepPlan::Insufficient {
                        safe_height,
                        needed,
                    } => {
                        self.controller.on_insufficient(&mut cursor);
                        self.cursors.save(&cursor).await?;
                        return Ok(CycleOutcome::Waiting {
                            safe_height,
                            needed,
                        });
                    }
                }
            }
        };

        let param = WorkParam::new(&self.source.target, self.source.network).with_window(window);
        let dispatched = match self.dispatcher.dispatch(&param).await {
            Ok(dispatched) => dispatched,
            Err(e) => {
                if e.shrinks_step() {
                    self.shrink_step(&mut cursor, &e).await;
                }
                return Err(e);
            }
        };

        self.controller.on_committed(&mut cursor, window);
        self.cursors.save(&cursor).await?;

        Ok(CycleOutcome::Advanced {
            from: window.from,
            to: window.to,
            records: dispatched.records.len(),
            caught_up: safe_height < cursor.from_height + cursor.step,
        })
    }

    async fn safe_height(&self, cursor: &mut CursorState) -> CrawlResult<i64> {
        match self.resolver.safe_height().await {
            Ok(height) => Ok(height),
            Err(e) => {
                if e.shrinks_step() {
                    self.shrink_step(cursor, &e).await;
                }
                Err(e)
            }
        }
    }

    async fn shrink_step(&self, cursor: &mut CursorState, cause: &CrawlError) {
        match cause {
            CrawlError::WindowTooLarge(_) => self.controller.on_oversized_window(cursor),
            _ => self.controller.on_rate_limited(cursor),
        }
        if let Err(e) = self.cursors.save(cursor).await {
            warn!(
                source = %self.source.key,
                network = %self.source.network,
                error = %e,
                "Failed to persist shrunken step"
            );
        }
    }

    /// Cycle until `shutdown` flips to true. A loop that is behind the head
    /// starts the next cycle immediately; otherwise it sleeps the poll
    /// interval. Shutdown is observed between cycles and during sleeps, so
    /// an in-flight commit always completes.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let key = self.source.key.clone();
        let network = self.source.network;
        info!(source = %key, %network, target = %self.source.target, "Polling loop started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let wait = match self.run_cycle().await {
                CycleOutcome::Advanced {
                    from,
                    to,
                    records,
                    caught_up,
                } => {
                    info!(source = %key, %network, from, to, records, caught_up, "Cycle advanced");
                    if caught_up {
                        self.source.poll_interval()
                    } else {
                        Duration::ZERO
                    }
                }
                CycleOutcome::Waiting {
                    safe_height,
                    needed,
                } => {
                    info!(source = %key, %network, safe_height, needed, "Waiting for confirmations");
                    self.source.poll_interval()
                }
                CycleOutcome::Failed(e) if e.is_transient() => {
                    warn!(source = %key, %network, error = %e, "Cycle failed, retrying next tick");
                    self.source.poll_interval()
                }
                CycleOutcome::Failed(e) => {
                    error!(source = %key, %network, error = %e, "Cycle failed");
                    self.source.poll_interval()
                }
            };

            if wait.is_zero() {
                tokio::task::yield_now().await;
                continue;
            }

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!(source = %key, %network, "Polling loop stopped");
    }
}
