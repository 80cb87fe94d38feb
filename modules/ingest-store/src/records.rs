// Idempotent upsert of normalized records.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;

use ingest_common::{Attachment, NormalizedRecord, Platform};

use crate::error::{Result, StoreError};

/// Writes normalized records keyed by `identifier`.
///
/// `store` is all-or-nothing: either every record of the batch is durably
/// written or none is. Re-delivering a record with a known identifier never
/// creates a second row; see [`merge_record`] for the conflict policy.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn store(&self, records: &[NormalizedRecord]) -> Result<()>;

    async fn get(&self, identifier: &str) -> Result<Option<NormalizedRecord>>;

    async fn count(&self) -> Result<i64>;
}

/// Conflict policy shared by every store implementation.
///
/// List fields are replaced, metadata is merged key-wise (keys missing from
/// the incoming write survive), `updated_at` keeps the later timestamp and the
/// row's identity columns (`created_at`, `owner`, `kind`) are left alone.
pub fn merge_record(existing: &mut NormalizedRecord, incoming: NormalizedRecord) {
    existing.related_urls = incoming.related_urls;
    existing.tags = incoming.tags;
    existing.authors = incoming.authors;
    existing.attachments = incoming.attachments;

    match (&mut existing.metadata, incoming.metadata) {
        (serde_json::Value::Object(current), serde_json::Value::Object(update)) => {
            current.extend(update);
        }
        (current, update) => *current = update,
    }

    existing.updated_at = existing.updated_at.max(incoming.updated_at);
}

/// Collapse repeated identifiers inside one batch, last occurrence wins.
/// Postgres rejects an upsert that touches the same row twice in one command,
/// and the loop may hand us overlapping sub-fetch results.
pub(crate) fn dedupe_batch(records: &[NormalizedRecord]) -> Vec<NormalizedRecord> {
    let mut order: Vec<&str> = Vec::with_capacity(records.len());
    let mut by_id: HashMap<&str, NormalizedRecord> = HashMap::with_capacity(records.len());

    for record in records {
        match by_id.get_mut(record.identifier.as_str()) {
            Some(existing) => merge_record(existing, record.clone()),
            None => {
                order.push(record.identifier.as_str());
                by_id.insert(record.identifier.as_str(), record.clone());
            }
        }
    }

    order
        .into_iter()
        .filter_map(|id| by_id.remove(id))
        .collect()
}

// ---------------------------------------------------------------------------
// Postgres
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// A row from the records table.
#[derive(Debug, sqlx::FromRow)]
struct RecordRow {
    identifier: String,
    kind: String,
    network: String,
    platform: Option<String>,
    source: String,
    proof: String,
    owner: String,
    related_urls: Vec<String>,
    tags: Vec<String>,
    authors: Vec<String>,
    attachments: Json<Vec<Attachment>>,
    metadata: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RecordRow> for NormalizedRecord {
    type Error = StoreError;

    fn try_from(row: RecordRow) -> Result<Self> {
        let decode = |e: ingest_common::CrawlError| StoreError::Decode(e.to_string());

        Ok(NormalizedRecord {
            identifier: row.identifier,
            kind: row.kind.parse().map_err(decode)?,
            network: row.network.parse().map_err(decode)?,
            platform: row
                .platform
                .map(|p| p.parse::<Platform>())
                .transpose()
                .map_err(decode)?,
            source: row.source,
            proof: row.proof,
            owner: row.owner,
            related_urls: row.related_urls,
            tags: row.tags,
            authors: row.authors,
            attachments: row.attachments.0,
            metadata: row.metadata,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn store(&self, records: &[NormalizedRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let batch = dedupe_batch(records);
        let mut tx = self.pool.begin().await?;

        for record in &batch {
            sqlx::query(
                r#"
                INSERT INTO records
                    (identifier, kind, network, platform, source, proof, owner,
                     related_urls, tags, authors, attachments, metadata,
                     created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
                ON CONFLICT (identifier) DO UPDATE SET
                    related_urls = EXCLUDED.related_urls,
                    tags         = EXCLUDED.tags,
                    authors      = EXCLUDED.authors,
                    attachments  = EXCLUDED.attachments,
                    metadata     = records.metadata || EXCLUDED.metadata,
                    updated_at   = GREATEST(records.updated_at, EXCLUDED.updated_at)
                "#,
            )
            .bind(&record.identifier)
            .bind(record.kind.as_str())
            .bind(record.network.as_str())
            .bind(record.platform.map(|p| p.as_str()))
            .bind(&record.source)
            .bind(&record.proof)
            .bind(&record.owner)
            .bind(&record.related_urls)
            .bind(&record.tags)
            .bind(&record.authors)
            .bind(Json(&record.attachments))
            .bind(&record.metadata)
            .bind(record.created_at)
            .bind(record.updated_at)
            .execute(&mut *tx)
            .await?;
        }

        // Dropping an uncommitted transaction rolls it back, so any `?` above
        // leaves the table untouched.
        tx.commit().await?;

        tracing::debug!(records = batch.len(), "Stored record batch");
        Ok(())
    }

    async fn get(&self, identifier: &str) -> Result<Option<NormalizedRecord>> {
        let row = sqlx::query_as::<_, RecordRow>(
            r#"
            SELECT identifier, kind, network, platform, source, proof, owner,
                   related_urls, tags, authors, attachments, metadata,
                   created_at, updated_at
            FROM records
            WHERE identifier = $1
            "#,
        )
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await?;

        row.map(NormalizedRecord::try_from).transpose()
    }

    async fn count(&self) -> Result<i64> {
        let row = sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM records")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use ingest_common::{Network, RecordKind};
    use serde_json::json;

    fn record(proof: &str) -> NormalizedRecord {
        NormalizedRecord::new(RecordKind::Note, Network::Ethereum, proof, "0xowner", "test")
    }

    #[test]
    fn merge_keeps_metadata_keys_missing_from_update() {
        let mut existing = record("0xabc-1")
            .with_metadata("token", json!("USDC"))
            .with_metadata("amount", json!("10"));
        let incoming = record("0xabc-1").with_metadata("amount", json!("12"));

        merge_record(&mut existing, incoming);

        assert_eq!(existing.metadata["token"], json!("USDC"));
        assert_eq!(existing.metadata["amount"], json!("12"));
    }

    #[test]
    fn merge_keeps_later_updated_at_and_first_created_at() {
        let t0 = Utc::now();
        let mut existing = record("0xabc-1")
            .with_created_at(t0)
            .with_updated_at(t0 + Duration::seconds(10));
        let incoming = record("0xabc-1")
            .with_created_at(t0 + Duration::seconds(99))
            .with_updated_at(t0 + Duration::seconds(5))
            .with_tags(["donation"]);

        merge_record(&mut existing, incoming);

        assert_eq!(existing.created_at, t0);
        assert_eq!(existing.updated_at, t0 + Duration::seconds(10));
        assert_eq!(existing.tags, vec!["donation".to_string()]);
    }

    #[test]
    fn dedupe_collapses_repeated_identifiers_in_order() {
        let batch = vec![
            record("a").with_tags(["first"]),
            record("b"),
            record("a").with_tags(["second"]),
        ];

        let deduped = dedupe_batch(&batch);

        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].identifier, "ethereum:a");
        assert_eq!(deduped[0].tags, vec!["second".to_string()]);
        assert_eq!(deduped[1].identifier, "ethereum:b");
    }
}
