// Sorted-set storage behind the recrawl queue.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::error::Result;

/// One sorted-set member with its score (visit time, Unix seconds).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisitEntry {
    pub member: String,
    pub score: i64,
}

/// The sorted-set operations the recrawl queue needs.
///
/// Members are unique: `upsert_score` on an existing member only moves its
/// score. Scans page by member order so concurrent score updates never make
/// a pass skip or repeat a member.
#[async_trait]
pub trait VisitStore: Send + Sync {
    /// Add a member or refresh its score. A score never moves backwards.
    async fn upsert_score(&self, member: &str, score: i64) -> Result<()>;

    /// Members strictly after `after` (member order) with `score >= min_score`.
    async fn scan(&self, after: Option<&str>, min_score: i64, limit: u32)
        -> Result<Vec<VisitEntry>>;

    /// Remove every member scored below `min_score`. Returns how many went.
    async fn remove_below(&self, min_score: i64) -> Result<u64>;

    async fn remove(&self, member: &str) -> Result<bool>;

    async fn score(&self, member: &str) -> Result<Option<i64>>;

    async fn len(&self) -> Result<u64>;
}

#[derive(Clone)]
pub struct PgVisitStore {
    pool: PgPool,
}

impl PgVisitStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VisitStore for PgVisitStore {
    async fn upsert_score(&self, member: &str, score: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO recent_visits (member, score)
            VALUES ($1, $2)
            ON CONFLICT (member) DO UPDATE SET
                score = GREATEST(recent_visits.score, EXCLUDED.score)
            "#,
        )
        .bind(member)
        .bind(score)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn scan(
        &self,
        after: Option<&str>,
        min_score: i64,
        limit: u32,
    ) -> Result<Vec<VisitEntry>> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            r#"
            SELECT member, score
            FROM recent_visits
            WHERE ($1::text IS NULL OR member > $1)
              AND score >= $2
            ORDER BY member ASC
            LIMIT $3
            "#,
        )
        .bind(after)
        .bind(min_score)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(member, score)| VisitEntry { member, score })
            .collect())
    }

    async fn remove_below(&self, min_score: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM recent_visits WHERE score < $1")
            .bind(min_score)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn remove(&self, member: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM recent_visits WHERE member = $1")
            .bind(member)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn score(&self, member: &str) -> Result<Option<i64>> {
        let row = sqlx::query_as::<_, (i64,)>("SELECT score FROM recent_visits WHERE member = $1")
            .bind(member)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.0))
    }

    async fn len(&self) -> Result<u64> {
        let row = sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM recent_visits")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0.max(0) as u64)
    }
}
