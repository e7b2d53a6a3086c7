//! # Enforcement Pipeline
//!
//! Orchestrates the notify → block → delete progression. Each step is an
//! independent, idempotent unit of work for one user:
//!
//! | Job                 | Step                                         |
//! |---------------------|----------------------------------------------|
//! | `EvaluateSubject`   | [`EnforcementPipeline::evaluate_subject`]    |
//! | `SendInitialNotice` | [`EnforcementPipeline::send_initial_notice`] |
//! | `SendReminder`      | [`EnforcementPipeline::send_reminder`]       |
//! | `BlockUser`         | [`EnforcementPipeline::block_user`]          |
//! | `DeleteUser`        | [`EnforcementPipeline::delete_user`]         |
//! | `CheckPaidStatus`   | [`EnforcementPipeline::check_paid_status`]   |
//! | `Sweep`             | [`EnforcementPipeline::sweep`]               |
//!
//! Every step re-reads the subject record and re-asks the exemption oracle
//! before acting. Nothing is cached between steps, and no step holds a
//! lock or transaction across another step.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use pipl_compliance::{ComplianceClassifier, PaidNamespaceOracle};
use pipl_core::{
    Clock, Job, JobQueue, LeaseConfig, NotificationSender, PiplError, PolicyContext, UserAccount,
    UserDirectory, UserId,
};
use pipl_ledger::{AccessLedger, ComplianceStore};
use pipl_state::PiplSubject;

use crate::guard::Actor;
use crate::lease::LeaseRegistry;
use crate::response::{EnforcementError, ServiceResponse, StepError};

/// The enforcement pipeline over a store, directory, mailer and queue.
#[derive(Debug)]
pub struct EnforcementPipeline<S, D, N, Q> {
    pub(crate) store: Arc<S>,
    pub(crate) directory: Arc<D>,
    pub(crate) notifier: Arc<N>,
    pub(crate) queue: Arc<Q>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) ledger: AccessLedger<S, Q>,
    pub(crate) classifier: ComplianceClassifier<S, PaidNamespaceOracle<D>>,
    pub(crate) leases: LeaseRegistry,
    pub(crate) lease_config: LeaseConfig,
}

impl<S, D, N, Q> EnforcementPipeline<S, D, N, Q>
where
    S: ComplianceStore,
    D: UserDirectory,
    N: NotificationSender,
    Q: JobQueue,
{
    /// Wire a pipeline from its collaborators.
    pub fn new(
        store: Arc<S>,
        directory: Arc<D>,
        notifier: Arc<N>,
        queue: Arc<Q>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let ledger = AccessLedger::new(Arc::clone(&store), Arc::clone(&queue), Arc::clone(&clock));
        let oracle = Arc::new(PaidNamespaceOracle::new(Arc::clone(&directory)));
        let classifier = ComplianceClassifier::new(Arc::clone(&store), oracle, Arc::clone(&clock));
        let leases = LeaseRegistry::new(Arc::clone(&clock));
        Self {
            store,
            directory,
            notifier,
            queue,
            clock,
            ledger,
            classifier,
            leases,
            lease_config: LeaseConfig::default(),
        }
    }

    /// Builder: lease settings for the sweep.
    pub fn with_lease_config(mut self, config: LeaseConfig) -> Self {
        self.lease_config = config;
        self
    }

    /// Builder: share a lease registry with other pipelines.
    pub fn with_leases(mut self, leases: LeaseRegistry) -> Self {
        self.leases = leases;
        self
    }

    /// The access ledger.
    pub fn ledger(&self) -> &AccessLedger<S, Q> {
        &self.ledger
    }

    /// The classifier.
    pub fn classifier(&self) -> &ComplianceClassifier<S, PaidNamespaceOracle<D>> {
        &self.classifier
    }

    /// The compliance store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// The job queue.
    pub fn queue(&self) -> &Arc<Q> {
        &self.queue
    }

    /// The lease registry.
    pub fn leases(&self) -> &LeaseRegistry {
        &self.leases
    }

    /// Run the step a job names.
    pub async fn run_job(
        &self,
        ctx: &PolicyContext,
        actor: &Actor,
        job: &Job,
    ) -> Result<ServiceResponse, PiplError> {
        match *job {
            Job::EvaluateSubject { user_id } => self.evaluate_subject(ctx, user_id).await,
            Job::SendInitialNotice { user_id } => self.send_initial_notice(ctx, user_id).await,
            Job::SendReminder { user_id } => self.send_reminder(ctx, user_id).await,
            Job::BlockUser { user_id } => self.block_user(ctx, actor, user_id).await,
            Job::DeleteUser { user_id } => self.delete_user(ctx, actor, user_id).await,
            Job::CheckPaidStatus { user_id } => self.check_paid_status(ctx, user_id).await,
            Job::Sweep => self.sweep(ctx).await,
        }
    }

    // ── Shared step helpers ──────────────────────────────────────────

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub(crate) async fn load_user(&self, user_id: UserId) -> Result<UserAccount, StepError> {
        self.directory
            .find_user(user_id)
            .await
            .map_err(PiplError::from)?
            .ok_or_else(|| EnforcementError::NotFound(format!("User {user_id} not found")).into())
    }

    pub(crate) async fn load_subject(&self, user_id: UserId) -> Result<PiplSubject, StepError> {
        self.store.find_subject(user_id).await?.ok_or_else(|| {
            EnforcementError::NotFound(format!("No PIPL record found for user {user_id}")).into()
        })
    }

    /// Re-ask the oracle. Never cached.
    pub(crate) async fn require_not_exempt(&self, user_id: UserId) -> Result<(), StepError> {
        if self.classifier.is_exempt(user_id).await? {
            return Err(EnforcementError::PaidUser { user_id }.into());
        }
        Ok(())
    }

    /// Not exempt, tracked, and over the access threshold.
    pub(crate) async fn require_subject_to_regime(
        &self,
        ctx: &PolicyContext,
        user_id: UserId,
    ) -> Result<(), StepError> {
        self.require_not_exempt(user_id).await?;
        if !self.classifier.subject_to_regime(ctx, user_id).await? {
            return Err(EnforcementError::ThresholdNotMet(format!(
                "User {user_id} does not currently meet the PIPL access threshold"
            ))
            .into());
        }
        Ok(())
    }

    /// Apply a lifecycle transition as one single-row update.
    pub(crate) async fn transition<F>(&self, user_id: UserId, f: F) -> Result<(), StepError>
    where
        F: FnOnce(&mut PiplSubject) -> Result<(), pipl_state::SubjectError> + Send,
    {
        match self.store.try_update_subject(user_id, f).await? {
            None => Err(EnforcementError::NotFound(format!(
                "No PIPL record found for user {user_id}"
            ))
            .into()),
            Some(result) => result.map_err(StepError::from),
        }
    }
}

/// Split a step result at the public boundary, with logging and metrics.
pub(crate) fn finish(
    step: &'static str,
    user_id: Option<UserId>,
    result: Result<String, StepError>,
) -> Result<ServiceResponse, PiplError> {
    let user = user_id.map(|u| u.to_string()).unwrap_or_default();
    let response = match result {
        Ok(message) => {
            tracing::info!(step, user_id = %user, %message, "step succeeded");
            ServiceResponse::success(message)
        }
        Err(StepError::Rejected(err)) => {
            tracing::info!(step, user_id = %user, reason = %err.reason(), %err, "step stopped");
            ServiceResponse::error(&err)
        }
        Err(StepError::Infra(err)) => {
            tracing::warn!(step, user_id = %user, error = %err, "step failed");
            metrics::counter!("pipl_step_outcomes_total", "step" => step, "outcome" => "failed")
                .increment(1);
            return Err(err);
        }
    };
    metrics::counter!(
        "pipl_step_outcomes_total",
        "step" => step,
        "outcome" => response.outcome()
    )
    .increment(1);
    Ok(response)
}
