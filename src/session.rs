//! Review session coordination.
//!
//! A session walks a learner through their due cards: the selector picks the
//! batch, each graded answer runs through the SM-2 update and is persisted
//! before it is acknowledged, and the session auto-completes when the batch is
//! exhausted or the learner goes quiet past the idle timeout.

use chrono::{DateTime, Duration, Utc};
use srs_core::{select_due, InvalidQuality, ItemId, LearnerId, Quality, ReviewRecord};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::storage::{ReviewStore, StoreError};

pub type SessionId = Uuid;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no items are due for review")]
    NoItemsDue,
    #[error("unknown session {0}")]
    UnknownSession(SessionId),
    #[error("session is not active")]
    SessionNotActive,
    #[error("item {0} is not part of the active session")]
    UnknownItem(ItemId),
    #[error(transparent)]
    InvalidQuality(#[from] InvalidQuality),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    InProgress,
    Completed,
}

#[derive(Debug)]
struct ReviewSession {
    learner_id: LearnerId,
    /// Ungraded items, in selection order. The front is the cursor.
    remaining: Vec<ItemId>,
    selected: usize,
    graded: usize,
    state: SessionState,
    last_activity_at: DateTime<Utc>,
}

/// Snapshot handed to the caller when a session starts.
#[derive(Debug, Clone)]
pub struct SessionView {
    pub id: SessionId,
    pub learner_id: LearnerId,
    pub items: Vec<ItemId>,
    pub started_at: DateTime<Utc>,
}

/// Outcome counters reported when a session ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    pub selected: usize,
    pub graded: usize,
}

pub struct SessionCoordinator {
    store: Arc<dyn ReviewStore>,
    session_limit: usize,
    idle_timeout: Duration,
    sessions: Mutex<HashMap<SessionId, ReviewSession>>,
}

impl SessionCoordinator {
    pub fn new(store: Arc<dyn ReviewStore>, session_limit: usize, idle_timeout: Duration) -> Self {
        Self {
            store,
            session_limit,
            idle_timeout,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Start a review session from the learner's due records.
    ///
    /// Fails with [`SessionError::NoItemsDue`] when nothing is due; that is a
    /// state to present to the learner, not an internal error.
    pub async fn start_session(
        &self,
        learner_id: LearnerId,
        as_of: DateTime<Utc>,
    ) -> Result<SessionView, SessionError> {
        let due = self.store.list_due(learner_id, as_of).await?;
        let items = select_due(&due, as_of, self.session_limit);
        if items.is_empty() {
            return Err(SessionError::NoItemsDue);
        }

        let id = Uuid::new_v4();
        let session = ReviewSession {
            learner_id,
            remaining: items.clone(),
            selected: items.len(),
            graded: 0,
            state: SessionState::InProgress,
            last_activity_at: as_of,
        };
        self.sessions.lock().await.insert(id, session);
        info!(learner_id, session = %id, items = items.len(), "review session started");

        Ok(SessionView {
            id,
            learner_id,
            items,
            started_at: as_of,
        })
    }

    /// The item currently at the session cursor, or `None` when every item
    /// has been graded.
    pub async fn current_item(
        &self,
        session_id: SessionId,
        now: DateTime<Utc>,
    ) -> Result<Option<ItemId>, SessionError> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(&session_id)
            .ok_or(SessionError::UnknownSession(session_id))?;
        expire_if_idle(session, self.idle_timeout, now);
        if session.state != SessionState::InProgress {
            return Err(SessionError::SessionNotActive);
        }
        Ok(session.remaining.first().copied())
    }

    /// Grade one item. The updated record is durable before this returns, so
    /// a crash mid-session loses at most the in-flight answer.
    pub async fn submit_answer(
        &self,
        session_id: SessionId,
        item_id: ItemId,
        grade: u8,
        now: DateTime<Utc>,
    ) -> Result<ReviewRecord, SessionError> {
        let quality = Quality::new(grade)?;

        // Holding the async lock across the store write serializes grades per
        // session, which keeps the per-record write ordering trivial.
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(&session_id)
            .ok_or(SessionError::UnknownSession(session_id))?;
        expire_if_idle(session, self.idle_timeout, now);
        if session.state != SessionState::InProgress {
            return Err(SessionError::SessionNotActive);
        }
        let position = session
            .remaining
            .iter()
            .position(|&i| i == item_id)
            .ok_or(SessionError::UnknownItem(item_id))?;

        let record = self
            .store
            .get_record(session.learner_id, item_id)
            .await?
            .ok_or(SessionError::UnknownItem(item_id))?;
        let updated = srs_core::update(&record, quality, now);
        self.store.put_record(&updated).await?;

        session.remaining.remove(position);
        session.graded += 1;
        session.last_activity_at = now;
        debug!(
            learner_id = session.learner_id,
            item_id,
            grade,
            interval_days = updated.interval_days,
            "answer graded"
        );
        if session.remaining.is_empty() {
            session.state = SessionState::Completed;
            info!(session = %session_id, "review session completed");
        }
        Ok(updated)
    }

    /// Close a session. Further submits fail with `SessionNotActive`.
    pub async fn end_session(&self, session_id: SessionId) -> Result<SessionSummary, SessionError> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .remove(&session_id)
            .ok_or(SessionError::UnknownSession(session_id))?;
        Ok(SessionSummary {
            selected: session.selected,
            graded: session.graded,
        })
    }

    /// Reap sessions whose learner went quiet, and drop completed ones.
    /// Returns how many sessions were removed.
    pub async fn sweep_idle(&self, now: DateTime<Utc>) -> usize {
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|id, session| {
            expire_if_idle(session, self.idle_timeout, now);
            if session.state == SessionState::Completed {
                debug!(session = %id, graded = session.graded, "session reaped");
                false
            } else {
                true
            }
        });
        before - sessions.len()
    }
}

/// Force the idle-timeout transition; already-persisted answers are untouched.
fn expire_if_idle(session: &mut ReviewSession, idle_timeout: Duration, now: DateTime<Utc>) {
    if session.state == SessionState::InProgress && now - session.last_activity_at > idle_timeout {
        session.state = SessionState::Completed;
        info!(
            learner_id = session.learner_id,
            graded = session.graded,
            "session expired after idle timeout"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn coordinator(store: Arc<dyn ReviewStore>, limit: usize) -> SessionCoordinator {
        SessionCoordinator::new(store, limit, Duration::minutes(30))
    }

    async fn seeded_store(words: &[&str]) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        for word in words {
            store.add_card(1, word, "x").await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn empty_selection_is_no_items_due() {
        let store = Arc::new(MemoryStore::new());
        let coord = coordinator(store, 10);
        let err = coord.start_session(1, Utc::now()).await.unwrap_err();
        assert!(matches!(err, SessionError::NoItemsDue));
    }

    #[tokio::test]
    async fn full_session_grades_everything() {
        let store = seeded_store(&["a", "b", "c"]).await;
        let coord = coordinator(store.clone(), 10);
        let now = Utc::now();

        let view = coord.start_session(1, now).await.unwrap();
        assert_eq!(view.items.len(), 3);

        for &item in &view.items {
            assert_eq!(coord.current_item(view.id, now).await.unwrap(), Some(item));
            let rec = coord.submit_answer(view.id, item, 5, now).await.unwrap();
            assert_eq!(rec.repetition_count, 1);
        }

        // Batch exhausted: the session auto-completed.
        let err = coord.submit_answer(view.id, view.items[0], 5, now).await.unwrap_err();
        assert!(matches!(err, SessionError::SessionNotActive));
    }

    #[tokio::test]
    async fn session_limit_caps_selection() {
        let store = seeded_store(&["a", "b", "c", "d", "e"]).await;
        let coord = coordinator(store, 2);
        let view = coord.start_session(1, Utc::now()).await.unwrap();
        assert_eq!(view.items.len(), 2);
    }

    #[tokio::test]
    async fn unknown_item_is_rejected_without_mutation() {
        let store = seeded_store(&["a"]).await;
        let coord = coordinator(store.clone(), 10);
        let now = Utc::now();
        let view = coord.start_session(1, now).await.unwrap();

        let bogus = view.items[0] + 999;
        let err = coord.submit_answer(view.id, bogus, 4, now).await.unwrap_err();
        assert!(matches!(err, SessionError::UnknownItem(_)));

        // The real item is still gradeable.
        assert!(coord.submit_answer(view.id, view.items[0], 4, now).await.is_ok());
    }

    #[tokio::test]
    async fn invalid_quality_is_rejected_before_any_write() {
        let store = seeded_store(&["a"]).await;
        let coord = coordinator(store.clone(), 10);
        let now = Utc::now();
        let view = coord.start_session(1, now).await.unwrap();

        let err = coord.submit_answer(view.id, view.items[0], 9, now).await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidQuality(_)));

        let rec = store.get_record(1, view.items[0]).await.unwrap().unwrap();
        assert!(rec.last_reviewed_at.is_none());
    }

    #[tokio::test]
    async fn ended_session_is_inert() {
        let store = seeded_store(&["a", "b"]).await;
        let coord = coordinator(store, 10);
        let now = Utc::now();
        let view = coord.start_session(1, now).await.unwrap();

        coord.submit_answer(view.id, view.items[0], 3, now).await.unwrap();
        let summary = coord.end_session(view.id).await.unwrap();
        assert_eq!(summary, SessionSummary { selected: 2, graded: 1 });

        let err = coord.submit_answer(view.id, view.items[1], 3, now).await.unwrap_err();
        assert!(matches!(err, SessionError::UnknownSession(_)));
    }

    #[tokio::test]
    async fn idle_session_expires_but_keeps_persisted_answers() {
        let store = seeded_store(&["a", "b"]).await;
        let coord = coordinator(store.clone(), 10);
        let start = Utc::now();
        let view = coord.start_session(1, start).await.unwrap();

        coord.submit_answer(view.id, view.items[0], 5, start).await.unwrap();

        let later = start + Duration::minutes(31);
        let err = coord.submit_answer(view.id, view.items[1], 5, later).await.unwrap_err();
        assert!(matches!(err, SessionError::SessionNotActive));

        // The graded answer stayed durable.
        let rec = store.get_record(1, view.items[0]).await.unwrap().unwrap();
        assert_eq!(rec.repetition_count, 1);
        // The idle one was never touched.
        let untouched = store.get_record(1, view.items[1]).await.unwrap().unwrap();
        assert!(untouched.last_reviewed_at.is_none());
    }

    #[tokio::test]
    async fn sweep_reaps_expired_and_completed() {
        let store = seeded_store(&["a"]).await;
        let coord = coordinator(store, 10);
        let start = Utc::now();
        let view = coord.start_session(1, start).await.unwrap();

        assert_eq!(coord.sweep_idle(start).await, 0);
        assert_eq!(coord.sweep_idle(start + Duration::minutes(31)).await, 1);

        let err = coord.current_item(view.id, start).await.unwrap_err();
        assert!(matches!(err, SessionError::UnknownSession(_)));
    }

    #[tokio::test]
    async fn restarted_session_resurfaces_unfinished_items() {
        let store = seeded_store(&["a", "b"]).await;
        let coord = coordinator(store.clone(), 10);
        let start = Utc::now();

        let first = coord.start_session(1, start).await.unwrap();
        coord.submit_answer(first.id, first.items[0], 5, start).await.unwrap();
        coord.end_session(first.id).await.unwrap();

        // The ungraded card is still due; the graded one is scheduled out.
        let second = coord.start_session(1, start).await.unwrap();
        assert_eq!(second.items, vec![first.items[1]]);
    }
}
