//! Enrollment and payment records.

use chrono::{DateTime, Utc};
use common::{CourseId, TransactionId, UserId};
use serde::{Deserialize, Serialize};

use crate::money::Money;
use crate::progress::Progress;

/// A user's enrollment in a course. Unique per (user, course).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentRecord {
    pub user_id: UserId,
    pub course_id: CourseId,
    /// Absent when the record was lazily created by a progress update.
    pub course_code: Option<String>,
    pub progress_percentage: Progress,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EnrollmentRecord {
    /// Creates a fresh record with zero progress.
    pub fn new(user_id: UserId, course_id: CourseId, course_code: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            course_id,
            course_code,
            progress_percentage: Progress::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Sets the progress percentage and bumps `updated_at`.
    pub fn set_progress(&mut self, progress: Progress) {
        self.progress_percentage = progress;
        self.updated_at = Utc::now();
    }
}

/// The durable effect of the record-payment step. Unique per transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRecord {
    pub transaction_id: TransactionId,
    pub user_id: UserId,
    pub course_id: CourseId,
    pub amount: Money,
    pub recorded_at: DateTime<Utc>,
}
