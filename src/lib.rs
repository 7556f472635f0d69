//! vocab-coach: spaced-repetition review scheduling for a vocabulary
//! learning assistant.
//!
//! The pure SM-2 algorithm and due-item selection live in the `srs-core`
//! crate; this crate adds persistence, session coordination, the background
//! notification scheduler, and configuration. Message delivery, dictionary
//! lookup, and any chat transport are external collaborators that consume the
//! [`scheduler::NotificationIntent`] stream and drive [`session`] calls.

pub mod cli;
pub mod config;
pub mod scheduler;
pub mod session;
pub mod storage;
