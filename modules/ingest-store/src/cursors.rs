// Per-(source, network) scan positions.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;

use ingest_common::{CursorState, Network};

use crate::error::{Result, StoreError};

/// Durable cursor storage. Partitioned by `(source_key, network)`, so loops
/// for different sources never touch each other's rows.
#[async_trait]
pub trait CursorStore: Send + Sync {
    async fn load(&self, source_key: &str, network: Network) -> Result<Option<CursorState>>;

    /// Upsert the cursor. `from_height` is never lowered by a save.
    async fn save(&self, cursor: &CursorState) -> Result<()>;
}

#[derive(Clone)]
pub struct PgCursorStore {
    pool: PgPool,
}

impl PgCursorStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct CursorRow {
    source_key: String,
    network: String,
    from_height: i64,
    step: i64,
    min_step: i64,
    confirmations: i64,
    sleep_interval_ms: i64,
}

impl TryFrom<CursorRow> for CursorState {
    type Error = StoreError;

    fn try_from(row: CursorRow) -> Result<Self> {
        Ok(CursorState {
            source_key: row.source_key,
            network: row
                .network
                .parse()
                .map_err(|e: ingest_common::CrawlError| StoreError::Decode(e.to_string()))?,
            from_height: row.from_height,
            step: row.step,
            min_step: row.min_step,
            confirmations: row.confirmations,
            sleep_interval: Duration::from_millis(row.sleep_interval_ms.max(0) as u64),
        })
    }
}

#[async_trait]
impl CursorStore for PgCursorStore {
    async fn load(&self, source_key: &str, network: Network) -> Result<Option<CursorState>> {
        let row = sqlx::query_as::<_, CursorRow>(
            r#"
            SELECT source_key, network, from_height, step, min_step,
                   confirmations, sleep_interval_ms
            FROM crawl_cursors
            WHERE source_key = $1 AND network = $2
            "#,
        )
        .bind(source_key)
        .bind(network.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(CursorState::try_from).transpose()
    }

    async fn save(&self, cursor: &CursorState) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO crawl_cursors
                (source_key, network, from_height, step, min_step,
                 confirmations, sleep_interval_ms, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, now())
            ON CONFLICT (source_key, network) DO UPDATE SET
                from_height       = GREATEST(crawl_cursors.from_height, EXCLUDED.from_height),
                step              = EXCLUDED.step,
                min_step          = EXCLUDED.min_step,
                confirmations     = EXCLUDED.confirmations,
                sleep_interval_ms = EXCLUDED.sleep_interval_ms,
                updated_at        = now()
            "#,
        )
        .bind(&cursor.source_key)
        .bind(cursor.network.as_str())
        .bind(cursor.from_height)
        .bind(cursor.step)
        .bind(cursor.min_step)
        .bind(cursor.confirmations)
        .bind(cursor.sleep_interval.as_millis() as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
