//! # In-Memory Collaborators
//!
//! [`InMemoryDirectory`] and [`RecordingNotifier`] stand in for the host
//! platform's user directory and mailer. The CLI persists both in its
//! state file; tests use them to observe what the pipeline asked for.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use pipl_core::{
    AccountState, ComplianceNotice, DeletionRequest, DirectoryError, Membership,
    NotificationSender, OwnedProject, PiplError, UserAccount, UserDirectory, UserId,
};

// ─── Directory ───────────────────────────────────────────────────────

/// One account with everything the directory knows about it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    /// The account.
    #[serde(flatten)]
    pub account: UserAccount,
    /// Namespace memberships.
    #[serde(default)]
    pub memberships: Vec<Membership>,
    /// Projects in the personal namespace.
    #[serde(default)]
    pub projects: Vec<OwnedProject>,
    /// Administrative note lines, oldest first.
    #[serde(default)]
    pub admin_notes: Vec<String>,
}

impl DirectoryEntry {
    /// An active account with no memberships or projects.
    pub fn active(id: UserId, username: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            account: UserAccount {
                id,
                username: username.into(),
                email: email.into(),
                state: AccountState::Active,
            },
            memberships: Vec::new(),
            projects: Vec::new(),
            admin_notes: Vec::new(),
        }
    }
}

/// Serializable directory contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectorySnapshot {
    /// Accounts.
    #[serde(default)]
    pub users: Vec<DirectoryEntry>,
    /// Deletion requests received, oldest first.
    #[serde(default)]
    pub deletion_requests: Vec<DeletionRequest>,
}

/// In-memory [`UserDirectory`].
#[derive(Debug, Clone, Default)]
pub struct InMemoryDirectory {
    users: Arc<RwLock<BTreeMap<UserId, DirectoryEntry>>>,
    deletions: Arc<Mutex<Vec<DeletionRequest>>>,
    refuse_actions: Arc<Mutex<Option<String>>>,
}

impl InMemoryDirectory {
    /// Empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore from a snapshot.
    pub fn from_snapshot(snapshot: DirectorySnapshot) -> Self {
        let users = snapshot
            .users
            .into_iter()
            .map(|e| (e.account.id, e))
            .collect();
        Self {
            users: Arc::new(RwLock::new(users)),
            deletions: Arc::new(Mutex::new(snapshot.deletion_requests)),
            refuse_actions: Arc::new(Mutex::new(None)),
        }
    }

    /// Copy out the contents.
    pub fn snapshot(&self) -> DirectorySnapshot {
        DirectorySnapshot {
            users: self.users.read().values().cloned().collect(),
            deletion_requests: self.deletions.lock().clone(),
        }
    }

    /// Insert or replace an account entry.
    pub fn upsert(&self, entry: DirectoryEntry) {
        self.users.write().insert(entry.account.id, entry);
    }

    /// Replace a user's memberships. Returns `false` for unknown users.
    pub fn set_memberships(&self, user_id: UserId, memberships: Vec<Membership>) -> bool {
        self.with_entry(user_id, |e| e.memberships = memberships)
    }

    /// Add a project to a user's personal namespace.
    pub fn add_project(&self, user_id: UserId, project: OwnedProject) -> bool {
        self.with_entry(user_id, |e| e.projects.push(project))
    }

    /// A copy of one entry.
    pub fn entry(&self, user_id: UserId) -> Option<DirectoryEntry> {
        self.users.read().get(&user_id).cloned()
    }

    /// Deletion requests received so far.
    pub fn deletion_requests(&self) -> Vec<DeletionRequest> {
        self.deletions.lock().clone()
    }

    /// Make block and delete primitives fail with `message` until cleared.
    pub fn refuse_actions(&self, message: Option<String>) {
        *self.refuse_actions.lock() = message;
    }

    fn with_entry(&self, user_id: UserId, f: impl FnOnce(&mut DirectoryEntry)) -> bool {
        match self.users.write().get_mut(&user_id) {
            Some(entry) => {
                f(entry);
                true
            }
            None => false,
        }
    }

    fn check_refusal(&self) -> Result<(), DirectoryError> {
        match self.refuse_actions.lock().as_ref() {
            Some(message) => Err(DirectoryError::Rejected(message.clone())),
            None => Ok(()),
        }
    }
}

impl UserDirectory for InMemoryDirectory {
    async fn find_user(&self, user_id: UserId) -> Result<Option<UserAccount>, DirectoryError> {
        Ok(self.users.read().get(&user_id).map(|e| e.account.clone()))
    }

    async fn memberships(&self, user_id: UserId) -> Result<Vec<Membership>, DirectoryError> {
        Ok(self
            .users
            .read()
            .get(&user_id)
            .map(|e| e.memberships.clone())
            .unwrap_or_default())
    }

    async fn owned_projects(&self, user_id: UserId) -> Result<Vec<OwnedProject>, DirectoryError> {
        Ok(self
            .users
            .read()
            .get(&user_id)
            .map(|e| e.projects.clone())
            .unwrap_or_default())
    }

    async fn block_user(&self, user_id: UserId) -> Result<(), DirectoryError> {
        self.check_refusal()?;
        if self.with_entry(user_id, |e| e.account.state = AccountState::Blocked) {
            Ok(())
        } else {
            Err(DirectoryError::Rejected(format!("User {user_id} not found")))
        }
    }

    async fn unblock_user(&self, user_id: UserId) -> Result<(), DirectoryError> {
        self.check_refusal()?;
        if self.with_entry(user_id, |e| e.account.state = AccountState::Active) {
            Ok(())
        } else {
            Err(DirectoryError::Rejected(format!("User {user_id} not found")))
        }
    }

    async fn add_admin_note(&self, user_id: UserId, note: String) -> Result<(), DirectoryError> {
        if self.with_entry(user_id, |e| e.admin_notes.push(note)) {
            Ok(())
        } else {
            Err(DirectoryError::Rejected(format!("User {user_id} not found")))
        }
    }

    async fn enqueue_deletion(&self, request: DeletionRequest) -> Result<(), DirectoryError> {
        self.check_refusal()?;
        self.deletions.lock().push(request);
        Ok(())
    }
}

// ─── Notifier ────────────────────────────────────────────────────────

/// [`NotificationSender`] that appends to an outbox.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    outbox: Arc<Mutex<Vec<ComplianceNotice>>>,
    failures_left: Arc<AtomicU32>,
}

impl RecordingNotifier {
    /// Empty outbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore an outbox.
    pub fn from_outbox(outbox: Vec<ComplianceNotice>) -> Self {
        Self {
            outbox: Arc::new(Mutex::new(outbox)),
            failures_left: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Every notice accepted so far.
    pub fn sent(&self) -> Vec<ComplianceNotice> {
        self.outbox.lock().clone()
    }

    /// Notices addressed to one user.
    pub fn sent_to(&self, user_id: UserId) -> Vec<ComplianceNotice> {
        self.outbox
            .lock()
            .iter()
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Fail the next `n` sends.
    pub fn fail_next(&self, n: u32) {
        self.failures_left.store(n, Ordering::SeqCst);
    }
}

impl NotificationSender for RecordingNotifier {
    async fn send(&self, notice: ComplianceNotice) -> Result<(), PiplError> {
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(PiplError::Queue(format!(
                "mailer rejected {} notice for user {}",
                notice.kind, notice.user_id
            )));
        }
        tracing::debug!(user_id = %notice.user_id, kind = %notice.kind, deadline = %notice.deadline, "notice queued");
        self.outbox.lock().push(notice);
        Ok(())
    }
}
