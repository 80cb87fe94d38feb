//! In-memory store implementations (tests and local runs, no database required).

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::Mutex;

use async_trait::async_trait;

use ingest_common::{CursorState, Network, NormalizedRecord};

use crate::cursors::CursorStore;
use crate::error::Result;
use crate::records::{dedupe_batch, merge_record, RecordStore};
use crate::visits::{VisitEntry, VisitStore};

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Applies the same conflict policy as the Postgres store. A batch is
/// applied under one lock, so readers never observe half of it.
#[derive(Default)]
pub struct MemoryRecordStore {
    rows: Mutex<HashMap<String, NormalizedRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All stored records (for test assertions).
    pub fn records(&self) -> Vec<NormalizedRecord> {
        let mut records: Vec<_> = self.rows.lock().unwrap().values().cloned().collect();
        records.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        records
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn store(&self, records: &[NormalizedRecord]) -> Result<()> {
        let batch = dedupe_batch(records);
        let mut rows = self.rows.lock().unwrap();

        for record in batch {
            match rows.get_mut(&record.identifier) {
                Some(existing) => merge_record(existing, record),
                None => {
                    rows.insert(record.identifier.clone(), record);
                }
            }
        }

        Ok(())
    }

    async fn get(&self, identifier: &str) -> Result<Option<NormalizedRecord>> {
        Ok(self.rows.lock().unwrap().get(identifier).cloned())
    }

    async fn count(&self) -> Result<i64> {
        Ok(self.rows.lock().unwrap().len() as i64)
    }
}

// ---------------------------------------------------------------------------
// Cursors
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryCursorStore {
    cursors: Mutex<HashMap<(String, Network), CursorState>>,
}

impl MemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CursorStore for MemoryCursorStore {
    async fn load(&self, source_key: &str, network: Network) -> Result<Option<CursorState>> {
        Ok(self
            .cursors
            .lock()
            .unwrap()
            .get(&(source_key.to_string(), network))
            .cloned())
    }

    async fn save(&self, cursor: &CursorState) -> Result<()> {
        let mut cursors = self.cursors.lock().unwrap();
        let key = (cursor.source_key.clone(), cursor.network);
        let mut next = cursor.clone();
        if let Some(existing) = cursors.get(&key) {
            next.from_height = next.from_height.max(existing.from_height);
        }
        cursors.insert(key, next);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Visits
// ---------------------------------------------------------------------------

/// Sorted set keyed by member; scans walk members in order.
#[derive(Default)]
pub struct MemoryVisitStore {
    members: Mutex<BTreeMap<String, i64>>,
}

impl MemoryVisitStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VisitStore for MemoryVisitStore {
    async fn upsert_score(&self, member: &str, score: i64) -> Result<()> {
        let mut members = self.members.lock().unwrap();
        let entry = members.entry(member.to_string()).or_insert(score);
        *entry = (*entry).max(score);
        Ok(())
    }

    async fn scan(
        &self,
        after: Option<&str>,
        min_score: i64,
        limit: u32,
    ) -> Result<Vec<VisitEntry>> {
        let members = self.members.lock().unwrap();
        let lower = match after {
            Some(after) => Bound::Excluded(after.to_string()),
            None => Bound::Unbounded,
        };

        Ok(members
            .range((lower, Bound::Unbounded))
            .filter(|(_, score)| **score >= min_score)
            .take(limit as usize)
            .map(|(member, score)| VisitEntry {
                member: member.clone(),
                score: *score,
            })
            .collect())
    }

    async fn remove_below(&self, min_score: i64) -> Result<u64> {
        let mut members = self.members.lock().unwrap();
        let before = members.len();
        members.retain(|_, score| *score >= min_score);
        Ok((before - members.len()) as u64)
    }

    async fn remove(&self, member: &str) -> Result<bool> {
        Ok(self.members.lock().unwrap().remove(member).is_some())
    }

    async fn score(&self, member: &str) -> Result<Option<i64>> {
        Ok(self.members.lock().unwrap().get(member).copied())
    }

    async fn len(&self) -> Result<u64> {
        Ok(self.members.lock().unwrap().len() as u64)
    }
}
