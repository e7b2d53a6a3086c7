//! # Access Ledger
//!
//! [`AccessLedger::record_access`] is the single entry point for inbound
//! access evidence. It branches on the covered-country set:
//!
//! ```text
//!                 ┌─ covered ──▶ find-or-create row, lock, count once per window
//! record_access ──┤                 └─ threshold met? ─▶ mark subject tracked,
//!                 │                                      enqueue EvaluateSubject
//!                 └─ uncovered ─▶ any rows? ─▶ zero all rows, untrack subject
//! ```
//!
//! The evaluation job is enqueued after the row update commits, never
//! inside it.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use pipl_core::{Clock, CountryCode, Job, JobQueue, PiplError, PolicyContext, UserId};
use pipl_state::CountryAccessRecord;

use crate::store::ComplianceStore;
use crate::threshold;

/// Why an access was ignored before touching storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// No user id on the request.
    MissingUser,
    /// No resolved country.
    MissingCountry,
    /// The resolver produced something that is not a country code.
    InvalidCountry,
    /// The capability flag is off.
    FeatureUnavailable,
}

/// What [`AccessLedger::record_access`] did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AccessOutcome {
    /// Nothing was recorded.
    Skipped {
        /// Why.
        reason: SkipReason,
    },
    /// Covered access inside the current tracking window.
    AlreadyTrackedInWindow,
    /// Covered access counted.
    Recorded {
        /// The row's count after the increment.
        access_count: u32,
        /// Whether the composite threshold is met after this access.
        threshold_met: bool,
    },
    /// Uncovered access zeroed the user's evidence.
    Reset {
        /// Rows zeroed.
        records: usize,
    },
    /// Uncovered access by a user with no evidence.
    NoHistory,
}

/// Records covered-country access evidence.
#[derive(Debug)]
pub struct AccessLedger<S, Q> {
    store: Arc<S>,
    queue: Arc<Q>,
    clock: Arc<dyn Clock>,
}

impl<S, Q> Clone for AccessLedger<S, Q> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            queue: Arc::clone(&self.queue),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<S: ComplianceStore, Q: JobQueue> AccessLedger<S, Q> {
    /// Create a ledger over `store`, enqueuing follow-up work on `queue`.
    pub fn new(store: Arc<S>, queue: Arc<Q>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            queue,
            clock,
        }
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Current time from the injected clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Record one access by `user_id` from the resolved `country`.
    ///
    /// Absent user or country is a no-op, as is any call while the
    /// capability flag is off.
    pub async fn record_access(
        &self,
        ctx: &PolicyContext,
        user_id: Option<UserId>,
        country: Option<&str>,
    ) -> Result<AccessOutcome, PiplError> {
        let Some(user_id) = user_id else {
            return Ok(skipped(SkipReason::MissingUser));
        };
        let Some(raw) = country.filter(|c| !c.trim().is_empty()) else {
            return Ok(skipped(SkipReason::MissingCountry));
        };
        let country = match CountryCode::new(raw) {
            Ok(code) => code,
            Err(e) => {
                tracing::debug!(user_id = %user_id, error = %e, "ignoring unresolvable country");
                return Ok(skipped(SkipReason::InvalidCountry));
            }
        };
        if !ctx.tracking_allowed() {
            return Ok(skipped(SkipReason::FeatureUnavailable));
        }

        let now = self.clock.now();
        if ctx.is_covered(&country) {
            self.record_covered(ctx, user_id, country, now).await
        } else {
            self.record_uncovered(user_id, country).await
        }
    }

    async fn record_covered(
        &self,
        ctx: &PolicyContext,
        user_id: UserId,
        country: CountryCode,
        now: DateTime<Utc>,
    ) -> Result<AccessOutcome, PiplError> {
        let window = ctx.thresholds.tracking_window;

        // Unlocked fast path: most requests land inside the current window.
        if let Some(existing) = self.store.find_access_record(user_id, country.clone()).await? {
            if existing.tracked_within(&window, now) {
                return Ok(AccessOutcome::AlreadyTrackedInWindow);
            }
        }

        let updated = self
            .store
            .update_access_record_locked(user_id, country.clone(), now, move |record| {
                record.register_access(&window, now)
            })
            .await?;

        let Some(record) = updated else {
            return Ok(AccessOutcome::AlreadyTrackedInWindow);
        };

        metrics::counter!("pipl_access_recorded_total", "country" => country.to_string())
            .increment(1);

        let records = self.store.access_records(user_id).await?;
        let threshold_met = threshold::met_access_threshold(&records, ctx, now);

        tracing::info!(
            user_id = %user_id,
            country = %country,
            access_count = record.access_count,
            threshold_met,
            "covered access recorded"
        );

        if threshold_met {
            self.store.mark_subject_tracked(user_id, now).await?;
            self.queue
                .enqueue(Job::EvaluateSubject { user_id }, Duration::zero())
                .await?;
        }

        Ok(AccessOutcome::Recorded {
            access_count: record.access_count,
            threshold_met,
        })
    }

    async fn record_uncovered(
        &self,
        user_id: UserId,
        country: CountryCode,
    ) -> Result<AccessOutcome, PiplError> {
        if !self.store.has_access_records(user_id).await? {
            return Ok(AccessOutcome::NoHistory);
        }

        let records = self.reset_evidence(user_id).await?;
        tracing::info!(
            user_id = %user_id,
            country = %country,
            records,
            "uncovered access, evidence reset"
        );
        Ok(AccessOutcome::Reset { records })
    }

    /// Zero every access record of the user and clear the subject's
    /// tracking marker. Returns the number of rows zeroed.
    pub async fn reset_evidence(&self, user_id: UserId) -> Result<usize, PiplError> {
        let now = self.clock.now();
        let records = self.store.reset_access_records(user_id, now).await?;
        self.store
            .update_subject(user_id, move |subject| subject.untrack(now))
            .await?;
        Ok(records)
    }

    /// Whether the user has no counted evidence left.
    pub async fn evidence_reset(&self, user_id: UserId) -> Result<bool, PiplError> {
        let records = self.store.access_records(user_id).await?;
        Ok(records.iter().all(|r| r.access_count == 0))
    }

    /// Whether the user's subject record carries the tracking marker.
    pub async fn currently_tracked(&self, user_id: UserId) -> Result<bool, PiplError> {
        Ok(self
            .store
            .find_subject(user_id)
            .await?
            .is_some_and(|s| s.is_tracked()))
    }

    /// Whether the composite access threshold is met right now.
    pub async fn met_access_threshold(
        &self,
        ctx: &PolicyContext,
        user_id: UserId,
    ) -> Result<bool, PiplError> {
        let records = self.store.access_records(user_id).await?;
        Ok(threshold::met_access_threshold(&records, ctx, self.clock.now()))
    }

    /// The user's access records.
    pub async fn records(&self, user_id: UserId) -> Result<Vec<CountryAccessRecord>, PiplError> {
        self.store.access_records(user_id).await
    }
}

fn skipped(reason: SkipReason) -> AccessOutcome {
    AccessOutcome::Skipped { reason }
}
