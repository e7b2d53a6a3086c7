//! # User Directory Contract
//!
//! The engine does not own user accounts, memberships or projects. It reads
//! them, and asks for block/delete/note actions, through [`UserDirectory`].
//!
//! Methods return `Send` futures so a pipeline built over any directory can
//! be driven from a multi-threaded runtime.

use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::error::DirectoryError;
use crate::identity::{NamespaceId, ProjectId, UserId};

/// Account state as reported by the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountState {
    /// Normal, signed-in capable account.
    Active,
    /// Administratively blocked.
    Blocked,
    /// Dormant account deactivated by policy.
    Deactivated,
}

/// A platform user account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    /// Account id.
    pub id: UserId,
    /// Login name.
    pub username: String,
    /// Primary e-mail.
    pub email: String,
    /// Current state.
    pub state: AccountState,
}

impl UserAccount {
    /// Whether the account is blocked.
    pub fn is_blocked(&self) -> bool {
        self.state == AccountState::Blocked
    }
}

/// Membership access level, ordered from least to most privileged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    /// Can see the namespace exists; never a billable seat.
    MinimalAccess,
    /// Read-mostly access.
    Guest,
    /// Issue planning access.
    Planner,
    /// Read access to code.
    Reporter,
    /// Write access.
    Developer,
    /// Administrative access to projects.
    Maintainer,
    /// Full control.
    Owner,
}

/// Subscription plan of a root namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    /// No subscription.
    Free,
    /// Trial of Premium.
    PremiumTrial,
    /// Trial of Ultimate.
    UltimateTrial,
    /// Paid Premium.
    Premium,
    /// Paid Ultimate.
    Ultimate,
}

impl Plan {
    /// Whether the plan is a paid subscription. Trials are not.
    pub fn is_paid(&self) -> bool {
        matches!(self, Self::Premium | Self::Ultimate)
    }

    /// Whether guest members occupy a billable seat on this plan.
    ///
    /// Ultimate does not bill guests.
    pub fn bills_guests(&self) -> bool {
        matches!(self, Self::Premium)
    }
}

/// A user's membership in a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    /// The namespace.
    pub namespace_id: NamespaceId,
    /// Access level held.
    pub access_level: AccessLevel,
    /// Plan of the namespace's root.
    pub plan: Plan,
    /// Inherited through a group share or ancestor rather than granted
    /// directly.
    #[serde(default)]
    pub inherited: bool,
}

/// Project visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// Visible to everyone.
    Public,
    /// Visible to signed-in users.
    Internal,
    /// Visible to members only.
    Private,
}

/// A project owned by a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnedProject {
    /// Project id.
    pub id: ProjectId,
    /// Full path, used in review messages.
    pub path: String,
    /// Visibility level.
    pub visibility: Visibility,
    /// Archived projects are not active.
    #[serde(default)]
    pub archived: bool,
    /// Commits on the default branch.
    pub commit_count: u64,
}

/// A request to delete a user asynchronously.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionRequest {
    /// The user to delete.
    pub user_id: UserId,
    /// The actor recorded as performing the deletion.
    pub deleted_by: UserId,
    /// Hard deletion removes contributions; soft deletion migrates them to
    /// a ghost user.
    pub hard_delete: bool,
    /// Bypass the self-service authorization path.
    pub skip_authorization: bool,
    /// Human-readable reason stored with the request.
    pub reason: String,
}

/// Read and act on platform accounts.
pub trait UserDirectory: Send + Sync + 'static {
    /// Look up a user by id.
    fn find_user(
        &self,
        user_id: UserId,
    ) -> impl Future<Output = Result<Option<UserAccount>, DirectoryError>> + Send;

    /// All memberships, direct and inherited.
    fn memberships(
        &self,
        user_id: UserId,
    ) -> impl Future<Output = Result<Vec<Membership>, DirectoryError>> + Send;

    /// Projects in the user's personal namespace.
    fn owned_projects(
        &self,
        user_id: UserId,
    ) -> impl Future<Output = Result<Vec<OwnedProject>, DirectoryError>> + Send;

    /// Block the user.
    fn block_user(&self, user_id: UserId)
        -> impl Future<Output = Result<(), DirectoryError>> + Send;

    /// Lift a block.
    fn unblock_user(&self, user_id: UserId)
        -> impl Future<Output = Result<(), DirectoryError>> + Send;

    /// Append a line to the user's administrative note.
    fn add_admin_note(
        &self,
        user_id: UserId,
        note: String,
    ) -> impl Future<Output = Result<(), DirectoryError>> + Send;

    /// Enqueue an asynchronous deletion. Completion is the directory's
    /// concern.
    fn enqueue_deletion(
        &self,
        request: DeletionRequest,
    ) -> impl Future<Output = Result<(), DirectoryError>> + Send;
}
