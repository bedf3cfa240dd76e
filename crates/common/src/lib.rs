//! Shared identifier types used across the enrollment workflow crates.

pub mod types;

pub use types::{CourseId, TransactionId, UserId};
