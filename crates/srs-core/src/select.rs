//! Due-item selection and ordering.

use chrono::{DateTime, Utc};

use crate::types::{ItemId, ReviewRecord};

/// Pick the items eligible for review at `as_of`, most urgent first.
///
/// Ordering: most overdue first, ties broken by lowest ease factor (weakest
/// items surface first), then by item id so the result is fully deterministic.
/// `limit` caps the output; items beyond it stay due and reappear on the next
/// call with the same ordering, so nothing is starved.
pub fn select_due(records: &[ReviewRecord], as_of: DateTime<Utc>, limit: usize) -> Vec<ItemId> {
    let mut due: Vec<&ReviewRecord> = records.iter().filter(|r| r.is_due(as_of)).collect();

    due.sort_by(|a, b| {
        a.due_at
            .cmp(&b.due_at)
            .then_with(|| a.ease_factor.total_cmp(&b.ease_factor))
            .then_with(|| a.item_id.cmp(&b.item_id))
    });

    due.into_iter().take(limit).map(|r| r.item_id).collect()
}
