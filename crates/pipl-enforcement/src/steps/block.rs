//! Block step.

use pipl_core::{JobQueue, NotificationSender, PiplError, PolicyContext, UserDirectory, UserId};
use pipl_ledger::ComplianceStore;
use pipl_state::SubjectState;

use crate::guard::{Actor, ComplianceGuard, Permission};
use crate::pipeline::{finish, EnforcementPipeline};
use crate::response::{upstream, EnforcementError, ServiceResponse, StepError};

impl<S, D, N, Q> EnforcementPipeline<S, D, N, Q>
where
    S: ComplianceStore,
    D: UserDirectory,
    N: NotificationSender,
    Q: JobQueue,
{
    /// Block a notified user whose notice period has elapsed.
    ///
    /// Calls the block primitive, then writes the admin note, so a refused
    /// block leaves no note behind. A refusal from the directory is
    /// returned as `UpstreamActionFailed` and not retried.
    pub async fn block_user(
        &self,
        ctx: &PolicyContext,
        actor: &Actor,
        user_id: UserId,
    ) -> Result<ServiceResponse, PiplError> {
        let result = self.block_user_inner(ctx, actor, user_id).await;
        finish("block_user", Some(user_id), result)
    }

    async fn block_user_inner(
        &self,
        ctx: &PolicyContext,
        actor: &Actor,
        user_id: UserId,
    ) -> Result<String, StepError> {
        ComplianceGuard::new(ctx).authorize(actor, Permission::BlockUser)?;
        let user = self.load_user(user_id).await?;
        let subject = self.load_subject(user_id).await?;
        self.require_not_exempt(user_id).await?;

        match subject.state {
            SubjectState::Notified => {}
            SubjectState::Tracking => {
                return Err(EnforcementError::ThresholdNotMet(format!(
                    "Pipl block threshold has not been exceeded for user: {user_id}; \
                     no initial notice has been sent"
                ))
                .into());
            }
            other => {
                return Err(EnforcementError::AlreadyProcessed(format!(
                    "User {user_id} is already {other}"
                ))
                .into());
            }
        }

        if !self.classifier.block_threshold_met(ctx, &subject) {
            let elapsed = subject
                .time_since_notice(self.now())
                .map(|d| d.num_days())
                .unwrap_or_default();
            return Err(EnforcementError::ThresholdNotMet(format!(
                "Pipl block threshold has not been exceeded for user: {user_id}; \
                 notice sent {elapsed} days ago, the notice period is {} days",
                ctx.thresholds.block_notice_days
            ))
            .into());
        }

        if !user.is_blocked() {
            self.directory
                .block_user(user_id)
                .await
                .map_err(upstream)?;
        }
        let note = format!(
            "User was blocked due to the {}-day PIPL notice period",
            ctx.thresholds.block_notice_days
        );
        self.directory
            .add_admin_note(user_id, note)
            .await
            .map_err(upstream)?;

        let now = self.now();
        let reason = format!("blocked by {} after PIPL notice period", actor.username);
        self.transition(user_id, move |s| s.mark_blocked(now, &reason))
            .await?;

        Ok(format!("User {user_id} blocked"))
    }
}
