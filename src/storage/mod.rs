//! Persistence boundary for review state.
//!
//! The coordinator and scheduler only ever see the [`ReviewStore`] trait;
//! `SqliteStore` is the durable backend and `MemoryStore` the test double.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use srs_core::{ItemId, LearnerId, ReviewRecord};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// A vocabulary card owned by one learner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
    pub learner_id: LearnerId,
    pub item_id: ItemId,
    pub word: String,
    pub translation: String,
    pub created_at: DateTime<Utc>,
}

/// Scheduler trigger whose last dispatch period is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TriggerKind {
    DueReminder,
    WeeklyReport,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::DueReminder => "due-reminder",
            TriggerKind::WeeklyReport => "weekly-report",
        }
    }
}

impl std::fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Storage failure taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A newer write for the same (learner, item) already landed.
    #[error("stale write for learner {learner_id} item {item_id}: a newer review is already stored")]
    Conflict {
        learner_id: LearnerId,
        item_id: ItemId,
    },
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Everything the review core needs from persistence.
///
/// Writes to a single review record follow a compare discipline keyed on
/// `last_reviewed_at`: `put_record` must reject an update whose prior
/// `last_reviewed_at` is older than what is stored, so a stale session cannot
/// silently overwrite a newer grade.
#[async_trait]
pub trait ReviewStore: Send + Sync {
    /// Register a card for a learner, creating its review record immediately
    /// due. Idempotent: re-adding an existing word returns the existing card.
    async fn add_card(&self, learner_id: LearnerId, word: &str, translation: &str)
        -> StoreResult<Card>;

    async fn get_card(&self, learner_id: LearnerId, item_id: ItemId) -> StoreResult<Option<Card>>;

    async fn list_cards(&self, learner_id: LearnerId) -> StoreResult<Vec<Card>>;

    async fn get_record(
        &self,
        learner_id: LearnerId,
        item_id: ItemId,
    ) -> StoreResult<Option<ReviewRecord>>;

    /// All review records for a learner.
    async fn list_records(&self, learner_id: LearnerId) -> StoreResult<Vec<ReviewRecord>>;

    /// Review records for a learner with `due_at <= as_of`.
    async fn list_due(
        &self,
        learner_id: LearnerId,
        as_of: DateTime<Utc>,
    ) -> StoreResult<Vec<ReviewRecord>>;

    /// Learners that have at least one due record.
    async fn list_learners_with_due(&self, as_of: DateTime<Utc>) -> StoreResult<Vec<LearnerId>>;

    /// Every learner known to the store.
    async fn list_learners(&self) -> StoreResult<Vec<LearnerId>>;

    /// Durably write one review record. Fails with [`StoreError::Conflict`]
    /// when the stored record is newer.
    async fn put_record(&self, record: &ReviewRecord) -> StoreResult<()>;

    /// Last dispatched period identifier for a trigger, if any.
    async fn get_dispatch_marker(&self, kind: TriggerKind) -> StoreResult<Option<String>>;

    /// Record that `period` has been dispatched for a trigger.
    async fn set_dispatch_marker(&self, kind: TriggerKind, period: &str) -> StoreResult<()>;

    /// Remove every card and record for a learner (data-erasure request).
    async fn erase_learner(&self, learner_id: LearnerId) -> StoreResult<()>;
}
