//! SM-2 review state, update rule, and due-item selection for vocab-coach.
//!
//! This crate is the pure part of the spaced-repetition engine: no I/O, no
//! clock access. Callers pass explicit timestamps, which keeps every function
//! here deterministic and testable without a database fixture.

pub mod select;
pub mod sm2;
pub mod types;

pub use select::select_due;
pub use sm2::{estimated_retention, update};
pub use types::{
    InvalidQuality, ItemId, LearnerId, Quality, ReviewRecord, DEFAULT_EASE_FACTOR,
    MAX_INTERVAL_DAYS, MIN_EASE_FACTOR,
};
