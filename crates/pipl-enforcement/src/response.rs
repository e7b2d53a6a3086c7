//! # Step Responses
//!
//! Every public pipeline step returns `Result<ServiceResponse, PiplError>`:
//!
//! - `Ok(ServiceResponse::Success { .. })`: the step did its work.
//! - `Ok(ServiceResponse::Error { reason, message })`: a business outcome
//!   such as [`ErrorReason::ThresholdNotMet`] or [`ErrorReason::PaidUser`].
//!   Never retried.
//! - `Err(PiplError)`: infrastructure failure. The worker retries it.
//!
//! Serialized form:
//!
//! ```json
//! {"status": "success", "message": "User 7 blocked"}
//! {"status": "error", "reason": "threshold_not_met", "message": "..."}
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use pipl_core::{DirectoryError, PiplError, UserId};
use pipl_state::SubjectError;

use crate::guard::Permission;

/// Machine-readable reason carried by an error response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorReason {
    /// SaaS capability flag off.
    FeatureUnavailable,
    /// Instance enforcement setting off.
    FeatureDisabled,
    /// Caller lacks the permission.
    Unauthorized,
    /// User or subject record missing.
    NotFound,
    /// Block or deletion period not yet elapsed.
    ThresholdNotMet,
    /// The step already ran.
    AlreadyProcessed,
    /// The user is exempt.
    PaidUser,
    /// Deletion handed to a human.
    DeferredForReview,
    /// The subject is in the wrong state for this step.
    InvalidState,
    /// The directory refused the block or delete primitive.
    UpstreamActionFailed,
}

impl ErrorReason {
    /// Stable name, used as a metric label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FeatureUnavailable => "feature_unavailable",
            Self::FeatureDisabled => "feature_disabled",
            Self::Unauthorized => "unauthorized",
            Self::NotFound => "not_found",
            Self::ThresholdNotMet => "threshold_not_met",
            Self::AlreadyProcessed => "already_processed",
            Self::PaidUser => "paid_user",
            Self::DeferredForReview => "deferred_for_review",
            Self::InvalidState => "invalid_state",
            Self::UpstreamActionFailed => "upstream_action_failed",
        }
    }
}

impl std::fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Business outcomes that stop a step.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnforcementError {
    /// SaaS capability flag off.
    #[error("PIPL compliance is not available on this instance")]
    FeatureUnavailable,

    /// Instance enforcement setting off.
    #[error("PIPL enforcement is disabled in the instance settings")]
    FeatureDisabled,

    /// Caller lacks the permission.
    #[error("{actor} does not have permission to {permission} users")]
    Unauthorized {
        /// The missing permission.
        permission: Permission,
        /// Username of the caller.
        actor: String,
    },

    /// User or subject record missing.
    #[error("{0}")]
    NotFound(String),

    /// Block or deletion period not yet elapsed.
    #[error("{0}")]
    ThresholdNotMet(String),

    /// The step already ran.
    #[error("{0}")]
    AlreadyProcessed(String),

    /// The user is exempt.
    #[error("User {user_id} is a member of a paid namespace")]
    PaidUser {
        /// The exempt user.
        user_id: UserId,
    },

    /// Deletion handed to a human.
    #[error("{0}")]
    DeferredForReview(String),

    /// Wrong state for this step.
    #[error("{0}")]
    InvalidState(String),

    /// The directory refused the primitive; its message is passed through.
    #[error("{0}")]
    UpstreamActionFailed(String),
}

impl EnforcementError {
    /// The machine-readable reason.
    pub fn reason(&self) -> ErrorReason {
        match self {
            Self::FeatureUnavailable => ErrorReason::FeatureUnavailable,
            Self::FeatureDisabled => ErrorReason::FeatureDisabled,
            Self::Unauthorized { .. } => ErrorReason::Unauthorized,
            Self::NotFound(_) => ErrorReason::NotFound,
            Self::ThresholdNotMet(_) => ErrorReason::ThresholdNotMet,
            Self::AlreadyProcessed(_) => ErrorReason::AlreadyProcessed,
            Self::PaidUser { .. } => ErrorReason::PaidUser,
            Self::DeferredForReview(_) => ErrorReason::DeferredForReview,
            Self::InvalidState(_) => ErrorReason::InvalidState,
            Self::UpstreamActionFailed(_) => ErrorReason::UpstreamActionFailed,
        }
    }
}

/// Structured result of a pipeline step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ServiceResponse {
    /// The step did its work.
    Success {
        /// Human-readable summary.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// The step stopped on a business outcome.
    Error {
        /// Machine-readable reason.
        reason: ErrorReason,
        /// Human-readable message naming the user and the unmet condition.
        message: String,
    },
}

impl ServiceResponse {
    /// A success with a message.
    pub fn success(message: impl Into<String>) -> Self {
        Self::Success {
            message: Some(message.into()),
        }
    }

    /// An error response for `err`.
    pub fn error(err: &EnforcementError) -> Self {
        Self::Error {
            reason: err.reason(),
            message: err.to_string(),
        }
    }

    /// Whether the step succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// The error reason, if any.
    pub fn reason(&self) -> Option<ErrorReason> {
        match self {
            Self::Success { .. } => None,
            Self::Error { reason, .. } => Some(*reason),
        }
    }

    /// The message, if any.
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Success { message } => message.as_deref(),
            Self::Error { message, .. } => Some(message),
        }
    }

    /// Stable outcome label: `success` or the error reason.
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::Error { reason, .. } => reason.as_str(),
        }
    }
}

// ─── Internal step error ─────────────────────────────────────────────

/// Inside a step, business outcomes and infrastructure failures share one
/// `?` channel and are split again at the public boundary.
#[derive(Debug, Error)]
pub(crate) enum StepError {
    #[error(transparent)]
    Rejected(#[from] EnforcementError),
    #[error(transparent)]
    Infra(#[from] PiplError),
}

impl From<SubjectError> for StepError {
    fn from(err: SubjectError) -> Self {
        match err {
            SubjectError::AlreadyNotified { .. } => {
                Self::Rejected(EnforcementError::AlreadyProcessed(err.to_string()))
            }
            SubjectError::InvalidTransition { .. } => {
                Self::Rejected(EnforcementError::InvalidState(err.to_string()))
            }
            SubjectError::UnknownState(_) => Self::Infra(PiplError::Storage(err.to_string())),
        }
    }
}

/// Map a directory failure on a block/delete primitive.
///
/// A refusal is a business outcome; an outage is retried.
pub(crate) fn upstream(err: DirectoryError) -> StepError {
    match err {
        DirectoryError::Rejected(message) => {
            StepError::Rejected(EnforcementError::UpstreamActionFailed(message))
        }
        other @ DirectoryError::Unavailable(_) => StepError::Infra(other.into()),
    }
}
