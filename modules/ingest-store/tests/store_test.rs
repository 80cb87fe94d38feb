//! Store behavior tests.
//! The memory-backed tests always run. The Postgres-backed ones need
//! DATABASE_TEST_URL and are skipped otherwise.

use std::time::Duration;

use chrono::Utc;
use ingest_common::{CursorState, Network, NormalizedRecord, RecordKind};
use ingest_store::{
    CursorStore, MemoryCursorStore, MemoryRecordStore, MemoryVisitStore, PgCursorStore,
    PgRecordStore, PgVisitStore, RecordStore, VisitStore,
};
use serde_json::json;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};

/// Pool whose connections all see a fresh schema owned by this test, or
/// None if no test DB is available. Tests run in parallel, so they never
/// share tables.
async fn test_pool(name: &str) -> Option<PgPool> {
    let url = std::env::var("DATABASE_TEST_URL").ok()?;
    let schema = format!("store_test_{name}");

    let admin = PgPool::connect(&url).await.ok()?;
    admin
        .execute(format!("DROP SCHEMA IF EXISTS {schema} CASCADE; CREATE SCHEMA {schema}").as_str())
        .await
        .ok()?;
    admin.close().await;

    let search_path = format!("SET search_path TO {schema}");
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .after_connect(move |conn, _meta| {
            let search_path = search_path.clone();
            Box::pin(async move {
                conn.execute(search_path.as_str()).await?;
                Ok(())
            })
        })
        .connect(&url)
        .await
        .ok()?;

    ingest_store::migrate(&pool).await.ok()?;
    Some(pool)
}

fn transfer(proof: &str) -> NormalizedRecord {
    NormalizedRecord::new(RecordKind::Note, Network::Ethereum, proof, "0xowner", "test")
        .with_tags(["transaction", "transfer"])
}

fn cursor(from_height: i64) -> CursorState {
    CursorState {
        source_key: "gitcoin".into(),
        network: Network::Ethereum,
        from_height,
        step: 50,
        min_step: 10,
        confirmations: 15,
        sleep_interval: Duration::from_secs(1),
    }
}

// =========================================================================
// Shared assertions, run against each implementation
// =========================================================================

async fn assert_redelivery_is_noop(store: &dyn RecordStore) {
    let first = transfer("0xabc-12")
        .with_metadata("token", json!("USDC"))
        .with_metadata("amount", json!("10"));
    store.store(&[first]).await.unwrap();

    let later = Utc::now() + chrono::Duration::seconds(30);
    let second = transfer("0xabc-12")
        .with_metadata("amount", json!("10"))
        .with_updated_at(later);
    store.store(&[second]).await.unwrap();

    assert_eq!(store.count().await.unwrap(), 1);

    let row = store.get("ethereum:0xabc-12").await.unwrap().unwrap();
    assert_eq!(row.metadata["token"], json!("USDC"));
    assert_eq!(row.updated_at.timestamp(), later.timestamp());
}

async fn assert_cursor_never_regresses(store: &dyn CursorStore) {
    store.save(&cursor(500)).await.unwrap();
    store.save(&cursor(200)).await.unwrap();

    let loaded = store.load("gitcoin", Network::Ethereum).await.unwrap().unwrap();
    assert_eq!(loaded.from_height, 500);
    assert!(store.load("gitcoin", Network::Polygon).await.unwrap().is_none());
}

async fn assert_sorted_set_semantics(store: &dyn VisitStore) {
    store.upsert_score("b", 100).await.unwrap();
    store.upsert_score("a", 50).await.unwrap();
    store.upsert_score("c", 200).await.unwrap();
    store.upsert_score("a", 150).await.unwrap();

    assert_eq!(store.len().await.unwrap(), 3);
    assert_eq!(store.score("a").await.unwrap(), Some(150));

    // Paging walks member order, filtered by score.
    let page = store.scan(None, 0, 2).await.unwrap();
    let members: Vec<_> = page.iter().map(|e| e.member.as_str()).collect();
    assert_eq!(members, vec!["a", "b"]);

    let page = store.scan(Some("b"), 0, 2).await.unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].member, "c");

    let fresh = store.scan(None, 120, 10).await.unwrap();
    let members: Vec<_> = fresh.iter().map(|e| e.member.as_str()).collect();
    assert_eq!(members, vec!["a", "c"]);

    assert_eq!(store.remove_below(120).await.unwrap(), 1);
    assert!(store.score("b").await.unwrap().is_none());
    assert!(store.remove("a").await.unwrap());
    assert!(!store.remove("a").await.unwrap());
}

// =========================================================================
// Memory
// =========================================================================

#[tokio::test]
async fn memory_redelivery_is_noop() {
    assert_redelivery_is_noop(&MemoryRecordStore::new()).await;
}

#[tokio::test]
async fn memory_cursor_never_regresses() {
    assert_cursor_never_regresses(&MemoryCursorStore::new()).await;
}

#[tokio::test]
async fn memory_sorted_set_semantics() {
    assert_sorted_set_semantics(&MemoryVisitStore::new()).await;
}

#[tokio::test]
async fn memory_batch_with_duplicates_keeps_one_row() {
    let store = MemoryRecordStore::new();
    store
        .store(&[transfer("0x1-0"), transfer("0x1-0"), transfer("0x2-0")])
        .await
        .unwrap();
    assert_eq!(store.count().await.unwrap(), 2);
}

// =========================================================================
// Postgres
// =========================================================================

#[tokio::test]
async fn pg_redelivery_is_noop() {
    let Some(pool) = test_pool("redelivery_is_noop").await else {
        return;
    };
    assert_redelivery_is_noop(&PgRecordStore::new(pool)).await;
}

#[tokio::test]
async fn pg_cursor_never_regresses() {
    let Some(pool) = test_pool("cursor_never_regresses").await else {
        return;
    };
    assert_cursor_never_regresses(&PgCursorStore::new(pool)).await;
}

#[tokio::test]
async fn pg_sorted_set_semantics() {
    let Some(pool) = test_pool("sorted_set_semantics").await else {
        return;
    };
    assert_sorted_set_semantics(&PgVisitStore::new(pool)).await;
}

#[tokio::test]
async fn pg_record_round_trips_all_columns() {
    let Some(pool) = test_pool("record_round_trips_all_columns").await else {
        return;
    };
    let store = PgRecordStore::new(pool);

    let record = transfer("0xdef-3")
        .with_author("0xsender")
        .with_related_url("https://etherscan.io/tx/0xdef")
        .with_attachment(ingest_common::Attachment {
            kind: "receipt".into(),
            address: None,
            mime_type: Some("application/json".into()),
            content: Some("{}".into()),
        });
    store.store(&[record.clone()]).await.unwrap();

    let loaded = store.get(&record.identifier).await.unwrap().unwrap();
    assert_eq!(loaded.authors, record.authors);
    assert_eq!(loaded.related_urls, record.related_urls);
    assert_eq!(loaded.attachments, record.attachments);
    assert_eq!(loaded.network, Network::Ethereum);
}

#[tokio::test]
async fn pg_failed_batch_writes_nothing() {
    let Some(pool) = test_pool("failed_batch").await else {
        return;
    };
    let store = PgRecordStore::new(pool);
    store.store(&[transfer("0xseed-0")]).await.unwrap();

    // Postgres text cannot hold NUL, so the middle insert fails after the
    // first one has already run inside the transaction.
    let batch = [
        transfer("0xaaa-0"),
        transfer("0xbad\0-1"),
        transfer("0xccc-2"),
    ];
    assert!(store.store(&batch).await.is_err());

    assert_eq!(store.count().await.unwrap(), 1);
    assert!(store.get("ethereum:0xaaa-0").await.unwrap().is_none());
}
