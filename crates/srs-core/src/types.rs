//! Core types for the review engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Learner identifier (chat user id in the delivery layer).
pub type LearnerId = i64;

/// Vocabulary item identifier (card rowid in the store).
pub type ItemId = i64;

/// Ease factor assigned to a record on first exposure.
pub const DEFAULT_EASE_FACTOR: f64 = 2.5;

/// Hard floor for the ease factor. The SM-2 update clamps here.
pub const MIN_EASE_FACTOR: f64 = 1.3;

/// Upper bound for review intervals, in days.
pub const MAX_INTERVAL_DAYS: u32 = 365;

/// Per-(learner, item) review state.
///
/// `due_at` is always derived as `last_reviewed_at + interval_days` by the
/// update rule; nothing else writes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewRecord {
    pub learner_id: LearnerId,
    pub item_id: ItemId,
    /// Consecutive successful recalls.
    pub repetition_count: u32,
    /// Interval growth multiplier, never below [`MIN_EASE_FACTOR`].
    pub ease_factor: f64,
    /// Days until the next scheduled review.
    pub interval_days: u32,
    /// When the item becomes eligible for review again.
    pub due_at: DateTime<Utc>,
    /// Time of the last graded recall, absent if never reviewed.
    pub last_reviewed_at: Option<DateTime<Utc>>,
    /// Count of recalls graded below the pass threshold.
    pub lapses: u32,
}

impl ReviewRecord {
    /// Fresh record for a first exposure: default ease, immediately due.
    pub fn new(learner_id: LearnerId, item_id: ItemId, created_at: DateTime<Utc>) -> Self {
        Self {
            learner_id,
            item_id,
            repetition_count: 0,
            ease_factor: DEFAULT_EASE_FACTOR,
            interval_days: 0,
            due_at: created_at,
            last_reviewed_at: None,
            lapses: 0,
        }
    }

    pub fn is_due(&self, as_of: DateTime<Utc>) -> bool {
        self.due_at <= as_of
    }
}

/// Recall quality grade, validated to the SM-2 range 0..=5.
///
/// 0-2 is a failed or hard recall, 3-5 a successful one at increasing ease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Quality(u8);

/// Grade outside the 0..=5 range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("quality grade {0} is out of range (expected 0..=5)")]
pub struct InvalidQuality(pub u8);

impl Quality {
    pub const MAX: u8 = 5;
    /// Lowest grade counted as a successful recall.
    pub const PASS: u8 = 3;

    pub fn new(grade: u8) -> Result<Self, InvalidQuality> {
        if grade <= Self::MAX {
            Ok(Self(grade))
        } else {
            Err(InvalidQuality(grade))
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }

    pub fn is_pass(self) -> bool {
        self.0 >= Self::PASS
    }
}

impl TryFrom<u8> for Quality {
    type Error = InvalidQuality;

    fn try_from(grade: u8) -> Result<Self, Self::Error> {
        Self::new(grade)
    }
}

impl From<Quality> for u8 {
    fn from(q: Quality) -> u8 {
        q.0
    }
}

impl std::fmt::Display for Quality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
