//! Periodic sweep.
//!
//! Walks every subject record under a cooperative lease and enqueues the
//! paid-status re-check plus whatever step the subject's phase calls for.
//! The sweep itself decides nothing; each enqueued step re-checks its own
//! preconditions when it runs.

use chrono::Duration;

use pipl_core::{Job, JobQueue, NotificationSender, PiplError, PolicyContext, UserDirectory};
use pipl_ledger::ComplianceStore;
use pipl_state::{PiplSubject, SubjectPhase};

use crate::guard::ComplianceGuard;
use crate::pipeline::{finish, EnforcementPipeline};
use crate::response::{ServiceResponse, StepError};

/// Lease key held while a sweep runs.
pub const SWEEP_LEASE_KEY: &str = "pipl:sweep";

/// The enforcement job a subject's phase calls for, if any.
pub(crate) fn next_step(subject: &PiplSubject, phase: SubjectPhase) -> Option<Job> {
    let user_id = subject.user_id;
    match phase {
        SubjectPhase::Tracking if subject.initial_email_sent_at.is_none() => {
            Some(Job::EvaluateSubject { user_id })
        }
        SubjectPhase::BlockEligible => Some(Job::BlockUser { user_id }),
        SubjectPhase::DeletionEligible => Some(Job::DeleteUser { user_id }),
        _ => None,
    }
}

impl<S, D, N, Q> EnforcementPipeline<S, D, N, Q>
where
    S: ComplianceStore,
    D: UserDirectory,
    N: NotificationSender,
    Q: JobQueue,
{
    /// Enqueue per-user work for every subject record.
    ///
    /// Fails with [`PiplError::LeaseUnavailable`] when another sweep holds
    /// the lease; the worker reschedules it.
    pub async fn sweep(&self, ctx: &PolicyContext) -> Result<ServiceResponse, PiplError> {
        let result = self.sweep_inner(ctx).await;
        finish("sweep", None, result)
    }

    async fn sweep_inner(&self, ctx: &PolicyContext) -> Result<String, StepError> {
        ComplianceGuard::new(ctx).require_available()?;
        let _lease = self
            .leases
            .acquire_with_retry(SWEEP_LEASE_KEY, &self.lease_config)
            .await?;

        let now = self.now();
        let enforce = ctx.enforcement_allowed();
        let mut checks = 0usize;
        let mut steps = 0usize;

        for user_id in self.store.subject_ids().await? {
            let Some(subject) = self.store.find_subject(user_id).await? else {
                continue;
            };
            if subject.state.is_terminal() {
                continue;
            }
            self.queue
                .enqueue(Job::CheckPaidStatus { user_id }, Duration::zero())
                .await?;
            checks += 1;

            if !enforce {
                continue;
            }
            if let Some(job) = next_step(&subject, subject.phase(now, &ctx.thresholds)) {
                tracing::debug!(user_id = %user_id, job = %job, "sweep enqueued step");
                self.queue.enqueue(job, Duration::zero()).await?;
                steps += 1;
            }
        }

        Ok(format!(
            "Sweep enqueued {checks} paid-status checks and {steps} enforcement steps"
        ))
    }
}
