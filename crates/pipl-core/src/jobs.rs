//! # Job Contract
//!
//! Every mutation in the engine runs as a scheduled unit of work for one
//! user (or the global sweep). The queue infrastructure is external; the
//! engine only needs `enqueue(job, delay)`.
//!
//! ## Idempotency
//!
//! Each step is safe to run twice by construction. Queues MAY additionally
//! drop a job whose [`Job::idempotency_key`] is already pending, as an
//! optimization. Correctness never depends on it.

use std::future::Future;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::PiplError;
use crate::identity::UserId;

/// A schedulable unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "job", rename_all = "snake_case")]
pub enum Job {
    /// Re-evaluate a user after the access threshold was met.
    EvaluateSubject {
        /// Target user.
        user_id: UserId,
    },
    /// Send the initial compliance notice.
    SendInitialNotice {
        /// Target user.
        user_id: UserId,
    },
    /// Send a recurring reminder.
    SendReminder {
        /// Target user.
        user_id: UserId,
    },
    /// Block a user whose notice period elapsed.
    BlockUser {
        /// Target user.
        user_id: UserId,
    },
    /// Delete a blocked user whose deletion period elapsed.
    DeleteUser {
        /// Target user.
        user_id: UserId,
    },
    /// Re-check paid-namespace exemption.
    CheckPaidStatus {
        /// Target user.
        user_id: UserId,
    },
    /// Periodic lease-protected sweep over all subject records.
    Sweep,
}

impl Job {
    /// Short stable name, used in logs and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EvaluateSubject { .. } => "evaluate_subject",
            Self::SendInitialNotice { .. } => "send_initial_notice",
            Self::SendReminder { .. } => "send_reminder",
            Self::BlockUser { .. } => "block_user",
            Self::DeleteUser { .. } => "delete_user",
            Self::CheckPaidStatus { .. } => "check_paid_status",
            Self::Sweep => "sweep",
        }
    }

    /// The user a job targets, if any.
    pub fn user_id(&self) -> Option<UserId> {
        match self {
            Self::EvaluateSubject { user_id }
            | Self::SendInitialNotice { user_id }
            | Self::SendReminder { user_id }
            | Self::BlockUser { user_id }
            | Self::DeleteUser { user_id }
            | Self::CheckPaidStatus { user_id } => Some(*user_id),
            Self::Sweep => None,
        }
    }

    /// SHA-256 hex digest of the job's kind and arguments.
    ///
    /// Two jobs with equal keys are interchangeable.
    pub fn idempotency_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.kind().as_bytes());
        if let Some(user_id) = self.user_id() {
            hasher.update(b":");
            hasher.update(user_id.get().to_be_bytes());
        }
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }
}

impl std::fmt::Display for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.user_id() {
            Some(user_id) => write!(f, "{}(user {user_id})", self.kind()),
            None => f.write_str(self.kind()),
        }
    }
}

/// Schedule units of work, optionally after a delay.
pub trait JobQueue: Send + Sync + 'static {
    /// Enqueue `job` to run no earlier than `delay` from now.
    fn enqueue(&self, job: Job, delay: Duration) -> impl Future<Output = Result<(), PiplError>> + Send;
}
