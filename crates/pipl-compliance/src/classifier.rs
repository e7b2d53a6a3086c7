//! # Compliance Classifier
//!
//! Read-only decisions over the ledger, the subject record and the
//! exemption oracle.
//!
//! ```text
//! subject_to_regime = capability flag
//!                   ∧ subject record tracked
//!                   ∧ access threshold met over covered records
//!                   ∧ ¬ exempt
//! ```
//!
//! The block and deletion tests look only at the subject's notice stamp
//! and the configured periods, and are strict: exactly 60 days after the
//! notice is not yet eligible.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use pipl_core::{Clock, PiplError, PolicyContext, UserId};
use pipl_ledger::{covered_access_total, met_access_threshold, ComplianceStore};
use pipl_state::{CountryAccessRecord, PiplSubject, SubjectPhase, SubjectState};

use crate::exemption::ExemptionOracle;

/// Everything the classifier knows about one user, for status output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    /// The user.
    pub user_id: UserId,
    /// When the classification was computed.
    pub evaluated_at: DateTime<Utc>,
    /// Subject record carries the tracking marker.
    pub tracked: bool,
    /// Composite access threshold met.
    pub threshold_met: bool,
    /// Summed covered access count.
    pub covered_access_total: u64,
    /// Paid-namespace exemption.
    pub exempt: bool,
    /// Composite decision.
    pub subject_to_regime: bool,
    /// Stored state, if a subject record exists.
    pub state: Option<SubjectState>,
    /// Projected phase, if a subject record exists.
    pub phase: Option<SubjectPhase>,
    /// Initial notice stamp.
    pub initial_email_sent_at: Option<DateTime<Utc>>,
    /// Date after which the account may be blocked.
    pub notice_deadline: Option<NaiveDate>,
    /// Days of access left before block eligibility.
    pub remaining_access_days: Option<i64>,
    /// Raw ledger rows.
    pub records: Vec<CountryAccessRecord>,
}

/// Decides regime membership and enforcement eligibility.
#[derive(Debug)]
pub struct ComplianceClassifier<S, O> {
    store: Arc<S>,
    oracle: Arc<O>,
    clock: Arc<dyn Clock>,
}

impl<S, O> Clone for ComplianceClassifier<S, O> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            oracle: Arc::clone(&self.oracle),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<S: ComplianceStore, O: ExemptionOracle> ComplianceClassifier<S, O> {
    /// Create a classifier.
    pub fn new(store: Arc<S>, oracle: Arc<O>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            oracle,
            clock,
        }
    }

    /// The exemption oracle.
    pub fn oracle(&self) -> &Arc<O> {
        &self.oracle
    }

    /// Whether the user is exempt right now.
    pub async fn is_exempt(&self, user_id: UserId) -> Result<bool, PiplError> {
        self.oracle.is_exempt(user_id).await
    }

    /// Sufficient covered evidence, currently tracked, and not exempt.
    pub async fn subject_to_regime(
        &self,
        ctx: &PolicyContext,
        user_id: UserId,
    ) -> Result<bool, PiplError> {
        if !ctx.tracking_allowed() {
            return Ok(false);
        }
        let Some(subject) = self.store.find_subject(user_id).await? else {
            return Ok(false);
        };
        if !subject.is_tracked() {
            return Ok(false);
        }
        let records = self.store.access_records(user_id).await?;
        if !met_access_threshold(&records, ctx, self.clock.now()) {
            return Ok(false);
        }
        Ok(!self.oracle.is_exempt(user_id).await?)
    }

    /// Notice sent and the block notice period strictly exceeded.
    pub fn block_threshold_met(&self, ctx: &PolicyContext, subject: &PiplSubject) -> bool {
        subject.block_threshold_met(self.clock.now(), &ctx.thresholds)
    }

    /// Notice sent and the deletion period strictly exceeded.
    pub fn deletion_threshold_met(&self, ctx: &PolicyContext, subject: &PiplSubject) -> bool {
        subject.deletion_threshold_met(self.clock.now(), &ctx.thresholds)
    }

    /// Whether the user's ledger holds no counted evidence.
    pub async fn evidence_reset(&self, user_id: UserId) -> Result<bool, PiplError> {
        let records = self.store.access_records(user_id).await?;
        Ok(records.iter().all(|r| r.access_count == 0))
    }

    /// Whether to show the in-product compliance banner.
    ///
    /// Shown between the initial notice and the block, to users still
    /// subject to the regime, and only while enforcement is on.
    pub async fn show_compliance_alert(
        &self,
        ctx: &PolicyContext,
        user_id: UserId,
    ) -> Result<bool, PiplError> {
        if !ctx.enforcement_allowed() {
            return Ok(false);
        }
        let Some(subject) = self.store.find_subject(user_id).await? else {
            return Ok(false);
        };
        if subject.state != SubjectState::Notified || subject.initial_email_sent_at.is_none() {
            return Ok(false);
        }
        self.subject_to_regime(ctx, user_id).await
    }

    /// Full classification of one user.
    pub async fn evaluate(
        &self,
        ctx: &PolicyContext,
        user_id: UserId,
    ) -> Result<Classification, PiplError> {
        let now = self.clock.now();
        let subject = self.store.find_subject(user_id).await?;
        let records = self.store.access_records(user_id).await?;
        let threshold_met = met_access_threshold(&records, ctx, now);
        let exempt = self.oracle.is_exempt(user_id).await?;
        let tracked = subject.as_ref().is_some_and(PiplSubject::is_tracked);
        let th = &ctx.thresholds;

        Ok(Classification {
            user_id,
            evaluated_at: now,
            tracked,
            threshold_met,
            covered_access_total: covered_access_total(&records, &ctx.covered_countries),
            exempt,
            subject_to_regime: ctx.tracking_allowed() && tracked && threshold_met && !exempt,
            state: subject.as_ref().map(|s| s.state),
            phase: subject.as_ref().map(|s| s.phase(now, th)),
            initial_email_sent_at: subject.as_ref().and_then(|s| s.initial_email_sent_at),
            notice_deadline: subject.as_ref().and_then(|s| s.notice_deadline(th)),
            remaining_access_days: subject
                .as_ref()
                .and_then(|s| s.remaining_access_days(now, th)),
            records,
        })
    }
}
