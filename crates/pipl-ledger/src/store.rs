//! # Compliance Store Contract
//!
//! Persistence for access records and subject records. Implementations
//! must provide two guarantees the ledger relies on:
//!
//! 1. [`ComplianceStore::update_access_record_locked`] finds-or-creates the
//!    (user, country) row and runs the closure under an exclusive lock on
//!    that row. A creation race resolves to "already exists, update it".
//! 2. [`ComplianceStore::try_update_subject`] is a single-row
//!    read-modify-write. No lock is held across calls.

use std::future::Future;

use chrono::{DateTime, Utc};

use pipl_core::{CountryCode, PiplError, UserId};
use pipl_state::{CountryAccessRecord, PiplSubject};

/// Durable storage for the ledger and subject records.
pub trait ComplianceStore: Send + Sync + 'static {
    /// All access records for a user, ordered by country code.
    fn access_records(
        &self,
        user_id: UserId,
    ) -> impl Future<Output = Result<Vec<CountryAccessRecord>, PiplError>> + Send;

    /// One access record, without locking.
    fn find_access_record(
        &self,
        user_id: UserId,
        country: CountryCode,
    ) -> impl Future<Output = Result<Option<CountryAccessRecord>, PiplError>> + Send;

    /// Find-or-create the (user, country) row, lock it, and apply `f`.
    ///
    /// When `f` returns `true` the mutated record is saved and returned.
    /// When it returns `false` nothing is written and `None` is returned.
    fn update_access_record_locked<F>(
        &self,
        user_id: UserId,
        country: CountryCode,
        now: DateTime<Utc>,
        f: F,
    ) -> impl Future<Output = Result<Option<CountryAccessRecord>, PiplError>> + Send
    where
        F: FnOnce(&mut CountryAccessRecord) -> bool + Send;

    /// Zero every access record of the user. Returns the number of rows.
    fn reset_access_records(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<usize, PiplError>> + Send;

    /// Whether the user has any access rows.
    fn has_access_records(
        &self,
        user_id: UserId,
    ) -> impl Future<Output = Result<bool, PiplError>> + Send;

    /// The user's subject record.
    fn find_subject(
        &self,
        user_id: UserId,
    ) -> impl Future<Output = Result<Option<PiplSubject>, PiplError>> + Send;

    /// Create the subject record if absent and set its tracking marker.
    fn mark_subject_tracked(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<PiplSubject, PiplError>> + Send;

    /// Atomically read-validate-update a subject record.
    ///
    /// Returns `None` if the record doesn't exist, or `Some(result)` with
    /// the closure's `Result`. The record is saved only when the closure
    /// returns `Ok`.
    fn try_update_subject<R, E, F>(
        &self,
        user_id: UserId,
        f: F,
    ) -> impl Future<Output = Result<Option<Result<R, E>>, PiplError>> + Send
    where
        F: FnOnce(&mut PiplSubject) -> Result<R, E> + Send,
        R: Send,
        E: Send;

    /// Ids of every user with a subject record.
    fn subject_ids(&self) -> impl Future<Output = Result<Vec<UserId>, PiplError>> + Send;

    /// Infallible variant of [`ComplianceStore::try_update_subject`].
    /// Returns whether the record existed.
    fn update_subject<F>(
        &self,
        user_id: UserId,
        f: F,
    ) -> impl Future<Output = Result<bool, PiplError>> + Send
    where
        F: FnOnce(&mut PiplSubject) + Send,
    {
        async move {
            let outcome = self
                .try_update_subject(user_id, move |subject| {
                    f(subject);
                    Ok::<(), std::convert::Infallible>(())
                })
                .await?;
            Ok(outcome.is_some())
        }
    }
}
