//! Delete step and the human review gate.
//!
//! Deletion is a soft, asynchronous request to the directory. The step
//! succeeds once the request is enqueued; completion is the directory's
//! concern.

use pipl_core::{
    DeletionRequest, JobQueue, NotificationSender, OwnedProject, PiplError, PolicyContext,
    UserDirectory, UserId, Visibility,
};
use pipl_ledger::ComplianceStore;
use pipl_state::SubjectState;

use crate::guard::{Actor, ComplianceGuard, Permission};
use crate::pipeline::{finish, EnforcementPipeline};
use crate::response::{upstream, EnforcementError, ServiceResponse, StepError};

const DELETION_REASON: &str = "PIPL deletion period elapsed after the compliance notice";

/// An owned project that needs a human before its owner is deleted.
fn needs_review(project: &OwnedProject, commit_threshold: u64) -> bool {
    project.visibility == Visibility::Public
        && !project.archived
        && project.commit_count > commit_threshold
}

impl<S, D, N, Q> EnforcementPipeline<S, D, N, Q>
where
    S: ComplianceStore,
    D: UserDirectory,
    N: NotificationSender,
    Q: JobQueue,
{
    /// Delete a blocked user whose deletion period has elapsed, or hand
    /// the case to a human when they own an active public project.
    ///
    /// Once handed over, only [`Self::approve_deletion`] releases the
    /// case, even if the project later stops qualifying.
    pub async fn delete_user(
        &self,
        ctx: &PolicyContext,
        actor: &Actor,
        user_id: UserId,
    ) -> Result<ServiceResponse, PiplError> {
        let result = self.delete_user_inner(ctx, actor, user_id).await;
        finish("delete_user", Some(user_id), result)
    }

    async fn delete_user_inner(
        &self,
        ctx: &PolicyContext,
        actor: &Actor,
        user_id: UserId,
    ) -> Result<String, StepError> {
        ComplianceGuard::new(ctx).authorize(actor, Permission::DeleteUser)?;
        let user = self.load_user(user_id).await?;
        let subject = self.load_subject(user_id).await?;
        self.require_not_exempt(user_id).await?;

        if subject.state == SubjectState::DeletionScheduled {
            return Err(EnforcementError::AlreadyProcessed(format!(
                "Deletion of user {user_id} is already scheduled"
            ))
            .into());
        }
        if subject.state == SubjectState::DeletionNeedsReview {
            return Err(EnforcementError::DeferredForReview(format!(
                "Deletion of user {user_id} is awaiting manual review; \
                 only an approval can release it"
            ))
            .into());
        }

        if !self.classifier.deletion_threshold_met(ctx, &subject) {
            let elapsed = subject
                .time_since_notice(self.now())
                .map(|d| d.num_days())
                .unwrap_or_default();
            return Err(EnforcementError::ThresholdNotMet(format!(
                "Pipl deletion threshold has not been exceeded for user: {user_id}; \
                 notice sent {elapsed} days ago, the deletion period is {} days",
                ctx.thresholds.deletion_days
            ))
            .into());
        }

        if !user.is_blocked() || subject.state == SubjectState::Notified {
            return Err(EnforcementError::InvalidState(format!(
                "User {user_id} must be blocked before deletion"
            ))
            .into());
        }
        if subject.state == SubjectState::Tracking {
            return Err(EnforcementError::InvalidState(format!(
                "User {user_id} has not been notified"
            ))
            .into());
        }

        let projects = self
            .directory
            .owned_projects(user_id)
            .await
            .map_err(PiplError::from)?;
        let threshold = ctx.thresholds.deletion_commit_threshold;
        if let Some(project) = projects.iter().find(|p| needs_review(p, threshold)) {
            let message = format!(
                "User {user_id} owns active public project {} with {} commits \
                 (more than {threshold}); deletion needs manual review",
                project.path, project.commit_count
            );
            let now = self.now();
            let reason = message.clone();
            self.transition(user_id, move |s| s.defer_for_review(now, &reason))
                .await?;
            return Err(EnforcementError::DeferredForReview(message).into());
        }

        self.schedule_deletion(actor, user_id).await
    }

    /// Approve a deletion that was deferred for review.
    ///
    /// The caller is the human reviewer. Exemption and gates are checked
    /// again; the project check is not.
    pub async fn approve_deletion(
        &self,
        ctx: &PolicyContext,
        actor: &Actor,
        user_id: UserId,
    ) -> Result<ServiceResponse, PiplError> {
        let result = self.approve_deletion_inner(ctx, actor, user_id).await;
        finish("approve_deletion", Some(user_id), result)
    }

    async fn approve_deletion_inner(
        &self,
        ctx: &PolicyContext,
        actor: &Actor,
        user_id: UserId,
    ) -> Result<String, StepError> {
        ComplianceGuard::new(ctx).authorize(actor, Permission::DeleteUser)?;
        self.load_user(user_id).await?;
        let subject = self.load_subject(user_id).await?;
        self.require_not_exempt(user_id).await?;

        if subject.state != SubjectState::DeletionNeedsReview {
            return Err(EnforcementError::InvalidState(format!(
                "User {user_id} is {}, not awaiting deletion review",
                subject.state
            ))
            .into());
        }
        self.schedule_deletion(actor, user_id).await
    }

    async fn schedule_deletion(&self, actor: &Actor, user_id: UserId) -> Result<String, StepError> {
        self.directory
            .enqueue_deletion(DeletionRequest {
                user_id,
                deleted_by: actor.id,
                hard_delete: false,
                skip_authorization: true,
                reason: DELETION_REASON.to_string(),
            })
            .await
            .map_err(upstream)?;

        let now = self.now();
        let reason = format!("deletion requested by {}", actor.username);
        self.transition(user_id, move |s| s.schedule_deletion(now, &reason))
            .await?;

        Ok(format!("Deletion of user {user_id} scheduled"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipl_core::ProjectId;

    fn project(visibility: Visibility, archived: bool, commits: u64) -> OwnedProject {
        OwnedProject {
            id: ProjectId::new(1),
            path: "li/notes".into(),
            visibility,
            archived,
            commit_count: commits,
        }
    }

    #[test]
    fn review_needs_public_active_and_busy() {
        assert!(needs_review(&project(Visibility::Public, false, 6), 5));
        assert!(!needs_review(&project(Visibility::Public, false, 5), 5));
        assert!(!needs_review(&project(Visibility::Public, true, 50), 5));
        assert!(!needs_review(&project(Visibility::Internal, false, 50), 5));
        assert!(!needs_review(&project(Visibility::Private, false, 50), 5));
    }
}
