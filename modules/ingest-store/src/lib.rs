//! Persistence for the crawl engine.
//!
//! Three stores, each a trait with a Postgres implementation and an
//! in-memory one for tests:
//! - `RecordStore`: idempotent upsert of normalized records, all-or-nothing per batch.
//! - `CursorStore`: per-(source, network) scan position that never moves backwards.
//! - `VisitStore`: a sorted set of serialized fetch parameters scored by visit time.

pub mod cursors;
pub mod error;
pub mod memory;
pub mod records;
pub mod visits;

pub use cursors::{CursorStore, PgCursorStore};
pub use error::{Result, StoreError};
pub use memory::{MemoryCursorStore, MemoryRecordStore, MemoryVisitStore};
pub use records::{merge_record, PgRecordStore, RecordStore};
pub use visits::{PgVisitStore, VisitEntry, VisitStore};

/// Run the embedded SQL migrations.
pub async fn migrate(pool: &sqlx::PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| StoreError::Database(e.into()))?;
    Ok(())
}
