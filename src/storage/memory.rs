//! In-memory review store, used by tests and as a scratch backend.
//!
//! Mirrors the SQLite backend's semantics exactly, including the stale-write
//! guard, so coordinator and scheduler tests run without a database fixture.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex as SyncMutex;
use srs_core::{ItemId, LearnerId, ReviewRecord};
use std::collections::{BTreeMap, HashMap};

use super::{Card, ReviewStore, StoreError, StoreResult, TriggerKind};

#[derive(Default)]
struct Inner {
    cards: BTreeMap<(LearnerId, ItemId), Card>,
    records: BTreeMap<(LearnerId, ItemId), ReviewRecord>,
    markers: HashMap<TriggerKind, String>,
    next_item_id: ItemId,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: SyncMutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReviewStore for MemoryStore {
    async fn add_card(
        &self,
        learner_id: LearnerId,
        word: &str,
        translation: &str,
    ) -> StoreResult<Card> {
        let word = word.trim().to_lowercase();
        let mut inner = self.inner.lock();

        if let Some(existing) = inner
            .cards
            .values()
            .find(|c| c.learner_id == learner_id && c.word == word)
        {
            return Ok(existing.clone());
        }

        inner.next_item_id += 1;
        let item_id = inner.next_item_id;
        let now = Utc::now();
        let card = Card {
            learner_id,
            item_id,
            word,
            translation: translation.trim().to_string(),
            created_at: now,
        };
        inner.cards.insert((learner_id, item_id), card.clone());
        inner
            .records
            .insert((learner_id, item_id), ReviewRecord::new(learner_id, item_id, now));
        Ok(card)
    }

    async fn get_card(&self, learner_id: LearnerId, item_id: ItemId) -> StoreResult<Option<Card>> {
        Ok(self.inner.lock().cards.get(&(learner_id, item_id)).cloned())
    }

    async fn list_cards(&self, learner_id: LearnerId) -> StoreResult<Vec<Card>> {
        Ok(self
            .inner
            .lock()
            .cards
            .values()
            .filter(|c| c.learner_id == learner_id)
            .cloned()
            .collect())
    }

    async fn get_record(
        &self,
        learner_id: LearnerId,
        item_id: ItemId,
    ) -> StoreResult<Option<ReviewRecord>> {
        Ok(self.inner.lock().records.get(&(learner_id, item_id)).cloned())
    }

    async fn list_records(&self, learner_id: LearnerId) -> StoreResult<Vec<ReviewRecord>> {
        Ok(self
            .inner
            .lock()
            .records
            .values()
            .filter(|r| r.learner_id == learner_id)
            .cloned()
            .collect())
    }

    async fn list_due(
        &self,
        learner_id: LearnerId,
        as_of: DateTime<Utc>,
    ) -> StoreResult<Vec<ReviewRecord>> {
        Ok(self
            .inner
            .lock()
            .records
            .values()
            .filter(|r| r.learner_id == learner_id && r.is_due(as_of))
            .cloned()
            .collect())
    }

    async fn list_learners_with_due(&self, as_of: DateTime<Utc>) -> StoreResult<Vec<LearnerId>> {
        let inner = self.inner.lock();
        let mut learners: Vec<LearnerId> = inner
            .records
            .values()
            .filter(|r| r.is_due(as_of))
            .map(|r| r.learner_id)
            .collect();
        learners.sort_unstable();
        learners.dedup();
        Ok(learners)
    }

    async fn list_learners(&self) -> StoreResult<Vec<LearnerId>> {
        let inner = self.inner.lock();
        let mut learners: Vec<LearnerId> =
            inner.records.values().map(|r| r.learner_id).collect();
        learners.sort_unstable();
        learners.dedup();
        Ok(learners)
    }

    async fn put_record(&self, record: &ReviewRecord) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        let key = (record.learner_id, record.item_id);
        if let Some(stored) = inner.records.get(&key) {
            if stored.last_reviewed_at > record.last_reviewed_at {
                return Err(StoreError::Conflict {
                    learner_id: record.learner_id,
                    item_id: record.item_id,
                });
            }
        }
        inner.records.insert(key, record.clone());
        Ok(())
    }

    async fn get_dispatch_marker(&self, kind: TriggerKind) -> StoreResult<Option<String>> {
        Ok(self.inner.lock().markers.get(&kind).cloned())
    }

    async fn set_dispatch_marker(&self, kind: TriggerKind, period: &str) -> StoreResult<()> {
        self.inner.lock().markers.insert(kind, period.to_string());
        Ok(())
    }

    async fn erase_learner(&self, learner_id: LearnerId) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner.cards.retain(|(l, _), _| *l != learner_id);
        inner.records.retain(|(l, _), _| *l != learner_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use srs_core::Quality;

    #[tokio::test]
    async fn idempotent_first_exposure() {
        let store = MemoryStore::new();
        let a = store.add_card(1, "tun", "house").await.unwrap();
        let b = store.add_card(1, "TUN", "house again").await.unwrap();
        assert_eq!(a.item_id, b.item_id);
        assert_eq!(store.list_records(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn conflict_on_stale_write() {
        let store = MemoryStore::new();
        let card = store.add_card(1, "jur", "water").await.unwrap();
        let base = store.get_record(1, card.item_id).await.unwrap().unwrap();

        let now = Utc::now();
        let newer = srs_core::update(&base, Quality::new(5).unwrap(), now);
        store.put_record(&newer).await.unwrap();

        let stale = srs_core::update(&base, Quality::new(2).unwrap(), now - chrono::Duration::hours(1));
        assert!(matches!(
            store.put_record(&stale).await,
            Err(StoreError::Conflict { .. })
        ));
    }

    #[tokio::test]
    async fn due_listing_matches_sqlite_semantics() {
        let store = MemoryStore::new();
        let a = store.add_card(1, "a", "a").await.unwrap();
        let b = store.add_card(1, "b", "b").await.unwrap();

        let rec = store.get_record(1, b.item_id).await.unwrap().unwrap();
        store
            .put_record(&srs_core::update(&rec, Quality::new(5).unwrap(), Utc::now()))
            .await
            .unwrap();

        let due = store.list_due(1, Utc::now()).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].item_id, a.item_id);
    }
}
