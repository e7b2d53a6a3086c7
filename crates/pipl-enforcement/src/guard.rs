//! # Compliance Guard
//!
//! Shared gate checks composed into every step. Order matters: the
//! capability flag is checked before the instance setting, and both before
//! the caller's permission, so a SaaS-less instance always answers
//! `FeatureUnavailable`.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use pipl_core::{PolicyContext, UserId};

use crate::response::EnforcementError;

/// Permissions an actor may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// Block a user account.
    BlockUser,
    /// Delete a user account.
    DeleteUser,
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BlockUser => f.write_str("block"),
            Self::DeleteUser => f.write_str("delete"),
        }
    }
}

/// The caller on whose behalf a step runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// Account id, recorded as `deleted_by` on deletion requests.
    pub id: UserId,
    /// Login name, used in messages.
    pub username: String,
    /// Granted permissions.
    pub permissions: BTreeSet<Permission>,
}

impl Actor {
    /// An actor with no permissions.
    pub fn new(id: UserId, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            permissions: BTreeSet::new(),
        }
    }

    /// The automation account the worker runs as.
    pub fn compliance_bot(id: UserId) -> Self {
        Self::new(id, "pipl-compliance-bot")
            .with_permission(Permission::BlockUser)
            .with_permission(Permission::DeleteUser)
    }

    /// Builder: grant a permission.
    pub fn with_permission(mut self, permission: Permission) -> Self {
        self.permissions.insert(permission);
        self
    }

    /// Whether the actor holds `permission`.
    pub fn can(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }
}

/// Gate checks over one [`PolicyContext`].
#[derive(Debug, Clone, Copy)]
pub struct ComplianceGuard<'a> {
    ctx: &'a PolicyContext,
}

impl<'a> ComplianceGuard<'a> {
    /// Guard over `ctx`.
    pub fn new(ctx: &'a PolicyContext) -> Self {
        Self { ctx }
    }

    /// The SaaS capability flag.
    pub fn require_available(&self) -> Result<(), EnforcementError> {
        if self.ctx.compliance_available {
            Ok(())
        } else {
            Err(EnforcementError::FeatureUnavailable)
        }
    }

    /// Both gates.
    pub fn require_enforcement(&self) -> Result<(), EnforcementError> {
        self.require_available()?;
        if self.ctx.enforcement_enabled {
            Ok(())
        } else {
            Err(EnforcementError::FeatureDisabled)
        }
    }

    /// Both gates, then the caller's permission.
    pub fn authorize(&self, actor: &Actor, permission: Permission) -> Result<(), EnforcementError> {
        self.require_enforcement()?;
        if actor.can(permission) {
            Ok(())
        } else {
            Err(EnforcementError::Unauthorized {
                permission,
                actor: actor.username.clone(),
            })
        }
    }
}
