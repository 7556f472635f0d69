//! Durable review store backed by SQLite.
//!
//! The connection is wrapped in `parking_lot::Mutex` (sync) so no guard is
//! ever held across an `.await` point; every query runs to completion inside
//! the lock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex as SyncMutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use srs_core::{ItemId, LearnerId, ReviewRecord};
use std::path::Path;
use std::sync::Arc;

use super::{Card, ReviewStore, StoreError, StoreResult, TriggerKind};

pub struct SqliteStore {
    conn: Arc<SyncMutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and apply the schema.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous  = NORMAL;
             PRAGMA foreign_keys = ON;",
        )?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS cards (
                item_id     INTEGER PRIMARY KEY AUTOINCREMENT,
                learner_id  INTEGER NOT NULL,
                word        TEXT NOT NULL,
                translation TEXT NOT NULL,
                created_at  INTEGER NOT NULL,
                UNIQUE(learner_id, word)
            );

            CREATE TABLE IF NOT EXISTS review_records (
                learner_id       INTEGER NOT NULL,
                item_id          INTEGER NOT NULL,
                repetition_count INTEGER NOT NULL,
                ease_factor      REAL NOT NULL,
                interval_days    INTEGER NOT NULL,
                due_at           INTEGER NOT NULL,
                last_reviewed_at INTEGER,
                lapses           INTEGER NOT NULL,
                PRIMARY KEY (learner_id, item_id)
            );
            CREATE INDEX IF NOT EXISTS idx_records_due
                ON review_records(learner_id, due_at);

            CREATE TABLE IF NOT EXISTS dispatch_markers (
                trigger    TEXT PRIMARY KEY,
                period     TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );",
        )?;

        Ok(Self {
            conn: Arc::new(SyncMutex::new(conn)),
        })
    }
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<ReviewRecord> {
    Ok(ReviewRecord {
        learner_id: row.get(0)?,
        item_id: row.get(1)?,
        repetition_count: row.get(2)?,
        ease_factor: row.get(3)?,
        interval_days: row.get(4)?,
        due_at: ts_to_datetime(row.get(5)?),
        last_reviewed_at: row.get::<_, Option<i64>>(6)?.map(ts_to_datetime),
        lapses: row.get(7)?,
    })
}

fn row_to_card(row: &Row<'_>) -> rusqlite::Result<Card> {
    Ok(Card {
        item_id: row.get(0)?,
        learner_id: row.get(1)?,
        word: row.get(2)?,
        translation: row.get(3)?,
        created_at: ts_to_datetime(row.get(4)?),
    })
}

fn ts_to_datetime(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

const RECORD_COLUMNS: &str =
    "learner_id, item_id, repetition_count, ease_factor, interval_days, due_at, last_reviewed_at, lapses";

const CARD_COLUMNS: &str = "item_id, learner_id, word, translation, created_at";

#[async_trait]
impl ReviewStore for SqliteStore {
    async fn add_card(
        &self,
        learner_id: LearnerId,
        word: &str,
        translation: &str,
    ) -> StoreResult<Card> {
        let word = word.trim().to_lowercase();
        let now = Utc::now();

        let conn = self.conn.lock();

        // First exposure is idempotent: an existing card wins, defaults intact.
        if let Some(card) = conn
            .query_row(
                &format!("SELECT {CARD_COLUMNS} FROM cards WHERE learner_id = ?1 AND word = ?2"),
                params![learner_id, word],
                row_to_card,
            )
            .optional()?
        {
            return Ok(card);
        }

        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO cards (learner_id, word, translation, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![learner_id, word, translation.trim(), now.timestamp()],
        )?;
        let item_id: ItemId = tx.last_insert_rowid();

        let record = ReviewRecord::new(learner_id, item_id, now);
        tx.execute(
            "INSERT INTO review_records
                (learner_id, item_id, repetition_count, ease_factor, interval_days, due_at, last_reviewed_at, lapses)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, ?7)",
            params![
                learner_id,
                item_id,
                record.repetition_count,
                record.ease_factor,
                record.interval_days,
                record.due_at.timestamp(),
                record.lapses,
            ],
        )?;
        tx.commit()?;

        Ok(Card {
            learner_id,
            item_id,
            word,
            translation: translation.trim().to_string(),
            created_at: ts_to_datetime(now.timestamp()),
        })
    }

    async fn get_card(&self, learner_id: LearnerId, item_id: ItemId) -> StoreResult<Option<Card>> {
        let conn = self.conn.lock();
        let card = conn
            .query_row(
                &format!("SELECT {CARD_COLUMNS} FROM cards WHERE learner_id = ?1 AND item_id = ?2"),
                params![learner_id, item_id],
                row_to_card,
            )
            .optional()?;
        Ok(card)
    }

    async fn list_cards(&self, learner_id: LearnerId) -> StoreResult<Vec<Card>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {CARD_COLUMNS} FROM cards WHERE learner_id = ?1 ORDER BY item_id"
        ))?;
        let cards = stmt
            .query_map(params![learner_id], row_to_card)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(cards)
    }

    async fn get_record(
        &self,
        learner_id: LearnerId,
        item_id: ItemId,
    ) -> StoreResult<Option<ReviewRecord>> {
        let conn = self.conn.lock();
        let record = conn
            .query_row(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM review_records
                     WHERE learner_id = ?1 AND item_id = ?2"
                ),
                params![learner_id, item_id],
                row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    async fn list_records(&self, learner_id: LearnerId) -> StoreResult<Vec<ReviewRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM review_records WHERE learner_id = ?1 ORDER BY item_id"
        ))?;
        let records = stmt
            .query_map(params![learner_id], row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    async fn list_due(
        &self,
        learner_id: LearnerId,
        as_of: DateTime<Utc>,
    ) -> StoreResult<Vec<ReviewRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM review_records
             WHERE learner_id = ?1 AND due_at <= ?2
             ORDER BY due_at, item_id"
        ))?;
        let records = stmt
            .query_map(params![learner_id, as_of.timestamp()], row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    async fn list_learners_with_due(&self, as_of: DateTime<Utc>) -> StoreResult<Vec<LearnerId>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT learner_id FROM review_records
             WHERE due_at <= ?1 ORDER BY learner_id",
        )?;
        let learners = stmt
            .query_map(params![as_of.timestamp()], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(learners)
    }

    async fn list_learners(&self) -> StoreResult<Vec<LearnerId>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT DISTINCT learner_id FROM review_records ORDER BY learner_id")?;
        let learners = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(learners)
    }

    async fn put_record(&self, record: &ReviewRecord) -> StoreResult<()> {
        let conn = self.conn.lock();

        // Stale-write guard: a record reviewed later than this one is already
        // stored, so applying this write would lose the newer grade.
        let stored_last: Option<Option<i64>> = conn
            .query_row(
                "SELECT last_reviewed_at FROM review_records
                 WHERE learner_id = ?1 AND item_id = ?2",
                params![record.learner_id, record.item_id],
                |row| row.get(0),
            )
            .optional()?;
        let incoming = record.last_reviewed_at.map(|t| t.timestamp());
        if let Some(stored) = stored_last {
            if stored > incoming {
                return Err(StoreError::Conflict {
                    learner_id: record.learner_id,
                    item_id: record.item_id,
                });
            }
        }

        conn.execute(
            "INSERT INTO review_records
                (learner_id, item_id, repetition_count, ease_factor, interval_days, due_at, last_reviewed_at, lapses)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(learner_id, item_id) DO UPDATE SET
                repetition_count = excluded.repetition_count,
                ease_factor      = excluded.ease_factor,
                interval_days    = excluded.interval_days,
                due_at           = excluded.due_at,
                last_reviewed_at = excluded.last_reviewed_at,
                lapses           = excluded.lapses",
            params![
                record.learner_id,
                record.item_id,
                record.repetition_count,
                record.ease_factor,
                record.interval_days,
                record.due_at.timestamp(),
                incoming,
                record.lapses,
            ],
        )?;
        Ok(())
    }

    async fn get_dispatch_marker(&self, kind: TriggerKind) -> StoreResult<Option<String>> {
        let conn = self.conn.lock();
        let period = conn
            .query_row(
                "SELECT period FROM dispatch_markers WHERE trigger = ?1",
                params![kind.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(period)
    }

    async fn set_dispatch_marker(&self, kind: TriggerKind, period: &str) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO dispatch_markers (trigger, period, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(trigger) DO UPDATE SET
                period = excluded.period,
                updated_at = excluded.updated_at",
            params![kind.as_str(), period, Utc::now().timestamp()],
        )?;
        Ok(())
    }

    async fn erase_learner(&self, learner_id: LearnerId) -> StoreResult<()> {
        let conn = self.conn.lock();
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM review_records WHERE learner_id = ?1",
            params![learner_id],
        )?;
        tx.execute("DELETE FROM cards WHERE learner_id = ?1", params![learner_id])?;
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use srs_core::Quality;
    use tempfile::TempDir;

    fn test_store() -> (SqliteStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::open(&dir.path().join("coach.db")).unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn add_card_creates_record_immediately_due() {
        let (store, _dir) = test_store();

        let card = store.add_card(1, "tun", "house").await.unwrap();
        let record = store.get_record(1, card.item_id).await.unwrap().unwrap();
        assert_eq!(record.repetition_count, 0);
        assert_eq!(record.interval_days, 0);
        assert!(record.last_reviewed_at.is_none());
        assert!(record.is_due(Utc::now()));
    }

    #[tokio::test]
    async fn add_card_is_idempotent() {
        let (store, _dir) = test_store();

        let first = store.add_card(1, "Tun ", "house").await.unwrap();
        let second = store.add_card(1, "tun", "building").await.unwrap();
        assert_eq!(first.item_id, second.item_id);
        assert_eq!(second.translation, "house");
        assert_eq!(store.list_cards(1).await.unwrap().len(), 1);

        // Defaults survive the duplicate exposure.
        let record = store.get_record(1, first.item_id).await.unwrap().unwrap();
        assert_eq!(record.ease_factor, srs_core::DEFAULT_EASE_FACTOR);
    }

    #[tokio::test]
    async fn put_record_roundtrips_through_sm2() {
        let (store, _dir) = test_store();
        let card = store.add_card(1, "jur", "water").await.unwrap();

        let record = store.get_record(1, card.item_id).await.unwrap().unwrap();
        let updated = srs_core::update(&record, Quality::new(5).unwrap(), Utc::now());
        store.put_record(&updated).await.unwrap();

        let stored = store.get_record(1, card.item_id).await.unwrap().unwrap();
        assert_eq!(stored.repetition_count, 1);
        assert_eq!(stored.interval_days, 1);
        assert!(stored.last_reviewed_at.is_some());
    }

    #[tokio::test]
    async fn stale_write_is_rejected() {
        let (store, _dir) = test_store();
        let card = store.add_card(1, "hats", "bread").await.unwrap();
        let base = store.get_record(1, card.item_id).await.unwrap().unwrap();

        let now = Utc::now();
        let newer = srs_core::update(&base, Quality::new(4).unwrap(), now);
        store.put_record(&newer).await.unwrap();

        let stale = srs_core::update(&base, Quality::new(1).unwrap(), now - chrono::Duration::minutes(5));
        let err = store.put_record(&stale).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));

        let stored = store.get_record(1, card.item_id).await.unwrap().unwrap();
        assert_eq!(stored.repetition_count, 1);
    }

    #[tokio::test]
    async fn list_due_filters_and_orders() {
        let (store, _dir) = test_store();
        let a = store.add_card(1, "a", "a").await.unwrap();
        let b = store.add_card(1, "b", "b").await.unwrap();

        // Review card b so it is scheduled into the future.
        let rec = store.get_record(1, b.item_id).await.unwrap().unwrap();
        store
            .put_record(&srs_core::update(&rec, Quality::new(5).unwrap(), Utc::now()))
            .await
            .unwrap();

        let due = store.list_due(1, Utc::now()).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].item_id, a.item_id);
    }

    #[tokio::test]
    async fn learners_with_due_excludes_caught_up() {
        let (store, _dir) = test_store();
        store.add_card(1, "a", "a").await.unwrap();
        let card = store.add_card(2, "b", "b").await.unwrap();

        let rec = store.get_record(2, card.item_id).await.unwrap().unwrap();
        store
            .put_record(&srs_core::update(&rec, Quality::new(5).unwrap(), Utc::now()))
            .await
            .unwrap();

        assert_eq!(store.list_learners_with_due(Utc::now()).await.unwrap(), vec![1]);
        assert_eq!(store.list_learners().await.unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn dispatch_markers_persist_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("coach.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            assert!(store
                .get_dispatch_marker(TriggerKind::DueReminder)
                .await
                .unwrap()
                .is_none());
            store
                .set_dispatch_marker(TriggerKind::DueReminder, "2024-06-01")
                .await
                .unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(
            store
                .get_dispatch_marker(TriggerKind::DueReminder)
                .await
                .unwrap()
                .as_deref(),
            Some("2024-06-01")
        );
        assert!(store
            .get_dispatch_marker(TriggerKind::WeeklyReport)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn erase_learner_removes_everything() {
        let (store, _dir) = test_store();
        store.add_card(1, "a", "a").await.unwrap();
        store.add_card(1, "b", "b").await.unwrap();
        store.add_card(2, "c", "c").await.unwrap();

        store.erase_learner(1).await.unwrap();

        assert!(store.list_cards(1).await.unwrap().is_empty());
        assert!(store.list_records(1).await.unwrap().is_empty());
        assert_eq!(store.list_learners().await.unwrap(), vec![2]);
    }
}
