//! # Notification Contract
//!
//! Compliance notices are fire-and-forget: the sender accepts a notice and
//! delivers it asynchronously. Deduplication of repeated reminders is the
//! delivery layer's concern; the initial notice is deduplicated by the
//! engine's own `initial_email_sent_at` stamp.

use std::future::Future;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::PiplError;
use crate::identity::UserId;

/// Which notice is being sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    /// First notice; starts the notice period.
    Initial,
    /// Recurring reminder; same deadline as the initial notice.
    Reminder,
}

impl std::fmt::Display for NoticeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initial => f.write_str("initial"),
            Self::Reminder => f.write_str("reminder"),
        }
    }
}

/// A compliance notice addressed to one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceNotice {
    /// Recipient.
    pub user_id: UserId,
    /// Recipient address.
    pub email: String,
    /// Initial or reminder.
    pub kind: NoticeKind,
    /// Date after which the account may be blocked.
    pub deadline: NaiveDate,
}

/// Deliver compliance notices.
pub trait NotificationSender: Send + Sync + 'static {
    /// Accept a notice for delivery.
    fn send(&self, notice: ComplianceNotice) -> impl Future<Output = Result<(), PiplError>> + Send;
}
