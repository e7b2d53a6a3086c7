//! Paid-status re-check.
//!
//! Exemption interrupts the notice timeline at any live stage. Entering a
//! paid namespace clears the notice stamp and the ledger evidence and
//! returns the subject to tracking; a block this pipeline placed is lifted
//! first. Leaving it clears the exemption marker and makes sure no old
//! stamp survives, so a later notice starts a fresh period.

use pipl_core::{JobQueue, NotificationSender, PiplError, PolicyContext, UserDirectory, UserId};
use pipl_ledger::ComplianceStore;
use pipl_state::{PiplSubject, SubjectError, SubjectState};

use crate::guard::ComplianceGuard;
use crate::pipeline::{finish, EnforcementPipeline};
use crate::response::{upstream, ServiceResponse, StepError};

const BLOCK_LIFTED_NOTE: &str = "PIPL block lifted: user joined a paid namespace";

/// Clear the stamp and return to tracking. A scheduled deletion keeps it.
fn restart_notice(subject: &mut PiplSubject, now: chrono::DateTime<chrono::Utc>, reason: &str) {
    if let Err(err) = subject.reset_notice(now, reason) {
        tracing::debug!(user_id = %subject.user_id, error = %err, "notice stamp kept");
    }
}

/// States in which the account was blocked by the block step.
fn holds_block(state: SubjectState) -> bool {
    matches!(
        state,
        SubjectState::Blocked | SubjectState::DeletionNeedsReview
    )
}

impl<S, D, N, Q> EnforcementPipeline<S, D, N, Q>
where
    S: ComplianceStore,
    D: UserDirectory,
    N: NotificationSender,
    Q: JobQueue,
{
    /// Re-ask the exemption oracle and apply the timeline consequences.
    pub async fn check_paid_status(
        &self,
        ctx: &PolicyContext,
        user_id: UserId,
    ) -> Result<ServiceResponse, PiplError> {
        let result = self.check_paid_status_inner(ctx, user_id).await;
        finish("check_paid_status", Some(user_id), result)
    }

    async fn check_paid_status_inner(
        &self,
        ctx: &PolicyContext,
        user_id: UserId,
    ) -> Result<String, StepError> {
        ComplianceGuard::new(ctx).require_available()?;
        let subject = self.load_subject(user_id).await?;
        let exempt = self.classifier.is_exempt(user_id).await?;
        let now = self.now();

        if exempt {
            let lifted = holds_block(subject.state) && self.lift_block(user_id).await?;
            let newly = self
                .store
                .try_update_subject(user_id, move |s| {
                    let newly = s.mark_exempt(now);
                    restart_notice(s, now, "user joined a paid namespace");
                    Ok::<_, SubjectError>(newly)
                })
                .await?
                .transpose()?
                .unwrap_or(false);
            if newly || subject.is_tracked() || !self.ledger.evidence_reset(user_id).await? {
                let reset = self.ledger.reset_evidence(user_id).await?;
                tracing::info!(user_id = %user_id, records = reset, "user exempt, evidence reset");
            }
            if lifted {
                return Ok(format!(
                    "User {user_id} is in a paid namespace; PIPL block lifted"
                ));
            }
            return Ok(format!("User {user_id} is in a paid namespace"));
        }

        if subject.exempted_at.is_none() {
            return Ok(format!("User {user_id} is not in a paid namespace"));
        }

        self.store
            .update_subject(user_id, move |s| {
                s.clear_exemption(now);
                restart_notice(s, now, "user left all paid namespaces");
            })
            .await?;
        tracing::info!(user_id = %user_id, "exemption lifted, notice period restarts");
        Ok(format!(
            "User {user_id} left all paid namespaces; notice period restarts"
        ))
    }

    /// Unblock the account, then note why. Returns whether it was blocked.
    async fn lift_block(&self, user_id: UserId) -> Result<bool, StepError> {
        let user = self.load_user(user_id).await?;
        if !user.is_blocked() {
            return Ok(false);
        }
        self.directory
            .unblock_user(user_id)
            .await
            .map_err(upstream)?;
        self.directory
            .add_admin_note(user_id, BLOCK_LIFTED_NOTE.to_string())
            .await
            .map_err(upstream)?;
        tracing::info!(user_id = %user_id, "user exempt, PIPL block lifted");
        Ok(true)
    }
}
