//! Evaluation and notice steps.
//!
//! The initial notice is exactly-once: the stamp is written under the
//! subject's row update *before* the mailer is called, so a concurrent or
//! repeated run sees the stamp and stops with `AlreadyProcessed`. If the
//! mailer then fails, the stamp is rolled back and the infrastructure error
//! is returned for retry.

use chrono::Duration;

use pipl_core::{
    ComplianceNotice, Job, JobQueue, NoticeKind, NotificationSender, PiplError, PolicyContext,
    UserDirectory, UserId,
};
use pipl_ledger::ComplianceStore;
use pipl_state::SubjectState;

use crate::guard::ComplianceGuard;
use crate::pipeline::{finish, EnforcementPipeline};
use crate::response::{EnforcementError, ServiceResponse, StepError};

impl<S, D, N, Q> EnforcementPipeline<S, D, N, Q>
where
    S: ComplianceStore,
    D: UserDirectory,
    N: NotificationSender,
    Q: JobQueue,
{
    /// Decide what a freshly qualified user needs next.
    ///
    /// Enqueues the initial notice for a tracked subject that has none.
    pub async fn evaluate_subject(
        &self,
        ctx: &PolicyContext,
        user_id: UserId,
    ) -> Result<ServiceResponse, PiplError> {
        let result = self.evaluate_subject_inner(ctx, user_id).await;
        finish("evaluate_subject", Some(user_id), result)
    }

    async fn evaluate_subject_inner(
        &self,
        ctx: &PolicyContext,
        user_id: UserId,
    ) -> Result<String, StepError> {
        ComplianceGuard::new(ctx).require_enforcement()?;
        let subject = self.load_subject(user_id).await?;
        self.require_subject_to_regime(ctx, user_id).await?;

        if subject.state != SubjectState::Tracking || subject.initial_email_sent_at.is_some() {
            return Err(EnforcementError::AlreadyProcessed(format!(
                "User {user_id} has already been notified (state {})",
                subject.state
            ))
            .into());
        }

        self.queue
            .enqueue(Job::SendInitialNotice { user_id }, Duration::zero())
            .await?;
        Ok(format!("Initial PIPL notice scheduled for user {user_id}"))
    }

    /// Send the initial compliance notice and start the notice period.
    pub async fn send_initial_notice(
        &self,
        ctx: &PolicyContext,
        user_id: UserId,
    ) -> Result<ServiceResponse, PiplError> {
        let result = self.send_initial_notice_inner(ctx, user_id).await;
        finish("send_initial_notice", Some(user_id), result)
    }

    async fn send_initial_notice_inner(
        &self,
        ctx: &PolicyContext,
        user_id: UserId,
    ) -> Result<String, StepError> {
        ComplianceGuard::new(ctx).require_enforcement()?;
        let user = self.load_user(user_id).await?;
        let subject = self.load_subject(user_id).await?;

        if let Some(sent_at) = subject.initial_email_sent_at {
            return Err(EnforcementError::AlreadyProcessed(format!(
                "Initial PIPL notice already sent to user {user_id} at {sent_at}"
            ))
            .into());
        }
        self.require_subject_to_regime(ctx, user_id).await?;

        let now = self.now();
        self.transition(user_id, move |s| s.mark_notified(now)).await?;

        let deadline = (now + ctx.thresholds.block_notice_period()).date_naive();
        let notice = ComplianceNotice {
            user_id,
            email: user.email,
            kind: NoticeKind::Initial,
            deadline,
        };
        if let Err(err) = self.notifier.send(notice).await {
            tracing::warn!(user_id = %user_id, error = %err, "initial notice not delivered, clearing stamp");
            self.store
                .try_update_subject(user_id, move |s| {
                    s.reset_notice(now, "initial notice delivery failed")
                })
                .await?;
            return Err(err.into());
        }

        self.queue
            .enqueue(
                Job::SendReminder { user_id },
                ctx.thresholds.reminder_interval(),
            )
            .await?;

        Ok(format!(
            "Initial PIPL notice sent to user {user_id}; access may be blocked after {deadline}"
        ))
    }

    /// Send a recurring reminder and schedule the next one.
    ///
    /// Does not touch any stamp. Stops rescheduling once the user is
    /// exempt, untracked, past the notice period, or no longer notified.
    pub async fn send_reminder(
        &self,
        ctx: &PolicyContext,
        user_id: UserId,
    ) -> Result<ServiceResponse, PiplError> {
        let result = self.send_reminder_inner(ctx, user_id).await;
        finish("send_reminder", Some(user_id), result)
    }

    async fn send_reminder_inner(
        &self,
        ctx: &PolicyContext,
        user_id: UserId,
    ) -> Result<String, StepError> {
        ComplianceGuard::new(ctx).require_enforcement()?;
        let user = self.load_user(user_id).await?;
        let subject = self.load_subject(user_id).await?;
        self.require_not_exempt(user_id).await?;

        let Some(deadline) = subject.notice_deadline(&ctx.thresholds) else {
            return Err(EnforcementError::InvalidState(format!(
                "Initial PIPL notice has not been sent to user {user_id}"
            ))
            .into());
        };
        if subject.state != SubjectState::Notified {
            return Err(EnforcementError::InvalidState(format!(
                "User {user_id} is {}, reminders stopped",
                subject.state
            ))
            .into());
        }
        self.require_subject_to_regime(ctx, user_id).await?;

        let now = self.now();
        if self.classifier.block_threshold_met(ctx, &subject) {
            return Err(EnforcementError::AlreadyProcessed(format!(
                "Notice period for user {user_id} ended on {deadline}, reminders stopped"
            ))
            .into());
        }

        self.notifier
            .send(ComplianceNotice {
                user_id,
                email: user.email,
                kind: NoticeKind::Reminder,
                deadline,
            })
            .await?;

        self.queue
            .enqueue(
                Job::SendReminder { user_id },
                ctx.thresholds.reminder_interval(),
            )
            .await?;

        let remaining = subject
            .remaining_access_days(now, &ctx.thresholds)
            .unwrap_or_default();
        Ok(format!(
            "PIPL reminder sent to user {user_id}; {remaining} days of access remain"
        ))
    }
}
