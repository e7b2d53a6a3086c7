//! # Paid-Namespace Exemption
//!
//! A user is exempt while they hold a billable seat in a paid namespace.
//!
//! | Access level   | Premium | Ultimate | Trial / Free |
//! |----------------|---------|----------|--------------|
//! | Minimal access | no      | no       | no           |
//! | Guest          | yes     | no       | no           |
//! | Planner and up | yes     | yes      | no           |
//!
//! Inherited memberships (group shares, ancestor groups) count the same as
//! direct ones.

use std::future::Future;
use std::sync::Arc;

use pipl_core::{AccessLevel, Membership, PiplError, UserDirectory, UserId};

/// Whether one membership occupies a billable seat on a paid plan.
pub fn membership_counts_as_paid(membership: &Membership) -> bool {
    if !membership.plan.is_paid() {
        return false;
    }
    match membership.access_level {
        AccessLevel::MinimalAccess => false,
        AccessLevel::Guest => membership.plan.bills_guests(),
        _ => true,
    }
}

/// Whether any membership counts as paid.
pub fn has_paid_membership(memberships: &[Membership]) -> bool {
    memberships.iter().any(membership_counts_as_paid)
}

/// Answers "is this user exempt right now".
pub trait ExemptionOracle: Send + Sync + 'static {
    /// Look the user up. Never cached by callers.
    fn is_exempt(&self, user_id: UserId) -> impl Future<Output = Result<bool, PiplError>> + Send;
}

/// [`ExemptionOracle`] backed by directory memberships.
#[derive(Debug)]
pub struct PaidNamespaceOracle<D> {
    directory: Arc<D>,
}

impl<D> Clone for PaidNamespaceOracle<D> {
    fn clone(&self) -> Self {
        Self {
            directory: Arc::clone(&self.directory),
        }
    }
}

impl<D: UserDirectory> PaidNamespaceOracle<D> {
    /// Wrap a directory.
    pub fn new(directory: Arc<D>) -> Self {
        Self { directory }
    }
}

impl<D: UserDirectory> ExemptionOracle for PaidNamespaceOracle<D> {
    async fn is_exempt(&self, user_id: UserId) -> Result<bool, PiplError> {
        let memberships = self.directory.memberships(user_id).await?;
        let exempt = has_paid_membership(&memberships);
        tracing::debug!(
            user_id = %user_id,
            memberships = memberships.len(),
            exempt,
            "paid namespace lookup"
        );
        Ok(exempt)
    }
}
