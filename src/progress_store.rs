//! In-memory [`ProgressStore`]: a `RwLock<HashMap<process_id,
//! ProgressRecord>>` with an eviction sweep run inline on `create` rather
//! than a dedicated timer task.
//!
//! Soft cap of [`MAX_RECORDS`] entries: once exceeded, terminal records past
//! [`TERMINAL_TTL`] are evicted oldest-first; if still over cap, the oldest
//! terminal records are evicted regardless of age.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{CoreError, CoreResult};
use crate::models::{ProgressRecord, Stage};
use crate::storage::ProgressStore;

const MAX_RECORDS: usize = 10_000;
const TERMINAL_TTL: chrono::Duration = chrono::Duration::hours(1);

pub struct InMemoryProgressStore {
    records: RwLock<HashMap<String, ProgressRecord>>,
}

impl Default for InMemoryProgressStore {
    fn default() -> Self {
        InMemoryProgressStore {
            records: RwLock::new(HashMap::new()),
        }
    }
}

impl InMemoryProgressStore {
    /// Evicts terminal records older than [`TERMINAL_TTL`]; if still over
    /// [`MAX_RECORDS`], evicts the oldest terminal records regardless of age.
    /// Never evicts non-terminal (in-flight) records.
    fn evict_locked(map: &mut HashMap<String, ProgressRecord>) {
        if map.len() <= MAX_RECORDS {
            return;
        }
        let now = Utc::now();
        let stale: Vec<String> = map
            .iter()
            .filter(|(_, r)| r.terminal && now.signed_duration_since(r.updated_at) > TERMINAL_TTL)
            .map(|(id, _)| id.clone())
            .collect();
        for id in stale {
            map.remove(&id);
        }
        if map.len() <= MAX_RECORDS {
            return;
        }
        let mut terminal: Vec<(String, chrono::DateTime<Utc>)> = map
            .iter()
            .filter(|(_, r)| r.terminal)
            .map(|(id, r)| (id.clone(), r.updated_at))
            .collect();
        terminal.sort_by_key(|(_, t)| *t);
        let overflow = map.len() - MAX_RECORDS;
        for (id, _) in terminal.into_iter().take(overflow) {
            map.remove(&id);
        }
    }
}

#[async_trait]
impl ProgressStore for InMemoryProgressStore {
    async fn create(&self, process_id: &str, document_id: &str) -> CoreResult<()> {
        let mut map = self.records.write().unwrap();
        map.insert(process_id.to_string(), ProgressRecord::new(process_id, document_id));
        Self::evict_locked(&mut map);
        Ok(())
    }

    async fn get(&self, process_id: &str) -> CoreResult<Option<ProgressRecord>> {
        Ok(self.records.read().unwrap().get(process_id).cloned())
    }

    async fn advance(
        &self,
        process_id: &str,
        stage: Stage,
        message: &str,
        entities_found: u32,
        relationships_found: u32,
    ) -> CoreResult<()> {
        let mut map = self.records.write().unwrap();
        let record = map
            .get_mut(process_id)
            .ok_or_else(|| CoreError::not_found(format!("no progress record for {process_id}")))?;
        if record.terminal {
            return Ok(());
        }
        record.stage = stage;
        record.percent = stage.percent();
        record.message = message.to_string();
        record.entities_found = entities_found;
        record.relationships_found = relationships_found;
        record.updated_at = Utc::now();
        record.terminal = stage.is_terminal();
        Ok(())
    }

    async fn fail(&self, process_id: &str, message: &str) -> CoreResult<()> {
        let mut map = self.records.write().unwrap();
        let record = map
            .get_mut(process_id)
            .ok_or_else(|| CoreError::not_found(format!("no progress record for {process_id}")))?;
        if record.terminal {
            return Ok(());
        }
        record.stage = Stage::Failed;
        record.percent = Stage::Failed.percent();
        record.message = message.to_string();
        record.updated_at = Utc::now();
        record.terminal = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_get_roundtrips() {
        let store = InMemoryProgressStore::default();
        store.create("p1", "doc-1").await.unwrap();
        let record = store.get("p1").await.unwrap().unwrap();
        assert_eq!(record.stage, Stage::Uploaded);
        assert!(!record.terminal);
    }

    #[tokio::test]
    async fn advance_updates_percent_and_stage() {
        let store = InMemoryProgressStore::default();
        store.create("p1", "doc-1").await.unwrap();
        store.advance("p1", Stage::Validated, "validated", 0, 0).await.unwrap();
        let record = store.get("p1").await.unwrap().unwrap();
        assert_eq!(record.stage, Stage::Validated);
        assert_eq!(record.percent, Stage::Validated.percent());
    }

    #[tokio::test]
    async fn advance_to_terminal_freezes_record() {
        let store = InMemoryProgressStore::default();
        store.create("p1", "doc-1").await.unwrap();
        store.advance("p1", Stage::Verified, "done", 3, 2).await.unwrap();
        store.advance("p1", Stage::Indexed, "should not apply", 9, 9).await.unwrap();
        let record = store.get("p1").await.unwrap().unwrap();
        assert_eq!(record.stage, Stage::Verified);
        assert_eq!(record.entities_found, 3);
        assert!(record.terminal);
    }

    #[tokio::test]
    async fn fail_marks_terminal_and_is_idempotent() {
        let store = InMemoryProgressStore::default();
        store.create("p1", "doc-1").await.unwrap();
        store.fail("p1", "extraction timed out").await.unwrap();
        store.advance("p1", Stage::Indexed, "ignored", 0, 0).await.unwrap();
        let record = store.get("p1").await.unwrap().unwrap();
        assert_eq!(record.stage, Stage::Failed);
        assert!(record.terminal);
        assert_eq!(record.message, "extraction timed out");
    }

    #[tokio::test]
    async fn advance_unknown_process_is_not_found() {
        let store = InMemoryProgressStore::default();
        let err = store.advance("missing", Stage::Validated, "x", 0, 0).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn eviction_drops_oldest_terminal_records_over_cap() {
        let store = InMemoryProgressStore::default();
        for i in 0..(MAX_RECORDS + 5) {
            let id = format!("p{i}");
            store.create(&id, "doc-1").await.unwrap();
            store.advance(&id, Stage::Verified, "done", 0, 0).await.unwrap();
        }
        let map = store.records.read().unwrap();
        assert!(map.len() <= MAX_RECORDS);
    }
}
