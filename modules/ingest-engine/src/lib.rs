//! Incremental crawl engine.
//!
//! One `PollingLoop` per source walks a confirmed block range forward with a
//! `StepController`, routing every fetch through the `Dispatcher` so that
//! normalization and idempotent storage happen in one place. The
//! `RecrawlQueue` remembers recently looked-up identities and the
//! `RecrawlWorker` re-polls them on an interval.

pub mod adapter;
pub mod adapters;
pub mod cache;
pub mod dispatcher;
pub mod height;
pub mod polling;
pub mod recrawl;
pub mod step;

pub use adapter::{Profile, RawEvent, SourceAdapter};
pub use cache::TtlCache;
pub use dispatcher::{Dispatched, Dispatcher};
pub use height::{HeightResolver, HeightSource};
pub use polling::{CycleOutcome, PollingLoop};
pub use recrawl::{DrainError, DrainErrors, RecrawlQueue, RecrawlWorker};
pub use step::{StepController, StepPlan};
