//! # In-Memory Compliance Store
//!
//! Thread-safe, cloneable store backed by `parking_lot` locks. All locking
//! is synchronous: no guard is ever held across an `.await`, so the async
//! trait methods complete without yielding.
//!
//! The access map sits behind a single `Mutex`, which makes the whole
//! find-or-create + window check + increment sequence one critical
//! section. Subject records use an `RwLock` so reads do not serialize.
//!
//! [`MemorySnapshot`] serializes the full contents; the CLI persists it in
//! its JSON state file.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use pipl_core::{CountryCode, PiplError, UserId};
use pipl_state::{CountryAccessRecord, PiplSubject};

use crate::store::ComplianceStore;

type AccessKey = (UserId, CountryCode);

/// In-memory [`ComplianceStore`].
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    access: Arc<Mutex<BTreeMap<AccessKey, CountryAccessRecord>>>,
    subjects: Arc<RwLock<BTreeMap<UserId, PiplSubject>>>,
}

/// Serializable contents of a [`MemoryStore`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    /// Every access record.
    #[serde(default)]
    pub access_records: Vec<CountryAccessRecord>,
    /// Every subject record.
    #[serde(default)]
    pub subjects: Vec<PiplSubject>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from a snapshot. Later duplicates replace earlier
    /// ones, so the (user, country) uniqueness invariant holds.
    pub fn from_snapshot(snapshot: MemorySnapshot) -> Self {
        let access = snapshot
            .access_records
            .into_iter()
            .map(|r| ((r.user_id, r.country_code.clone()), r))
            .collect();
        let subjects = snapshot
            .subjects
            .into_iter()
            .map(|s| (s.user_id, s))
            .collect();
        Self {
            access: Arc::new(Mutex::new(access)),
            subjects: Arc::new(RwLock::new(subjects)),
        }
    }

    /// Copy out the current contents.
    pub fn snapshot(&self) -> MemorySnapshot {
        MemorySnapshot {
            access_records: self.access.lock().values().cloned().collect(),
            subjects: self.subjects.read().values().cloned().collect(),
        }
    }

    /// Number of access rows across all users.
    pub fn access_row_count(&self) -> usize {
        self.access.lock().len()
    }

    /// Insert or replace a subject record directly. Intended for seeding
    /// fixtures and imports.
    pub fn put_subject(&self, subject: PiplSubject) {
        self.subjects.write().insert(subject.user_id, subject);
    }

    /// Insert or replace an access record directly.
    pub fn put_access_record(&self, record: CountryAccessRecord) {
        self.access
            .lock()
            .insert((record.user_id, record.country_code.clone()), record);
    }
}

impl ComplianceStore for MemoryStore {
    async fn access_records(&self, user_id: UserId) -> Result<Vec<CountryAccessRecord>, PiplError> {
        Ok(self
            .access
            .lock()
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn find_access_record(
        &self,
        user_id: UserId,
        country: CountryCode,
    ) -> Result<Option<CountryAccessRecord>, PiplError> {
        Ok(self.access.lock().get(&(user_id, country)).cloned())
    }

    async fn update_access_record_locked<F>(
        &self,
        user_id: UserId,
        country: CountryCode,
        now: DateTime<Utc>,
        f: F,
    ) -> Result<Option<CountryAccessRecord>, PiplError>
    where
        F: FnOnce(&mut CountryAccessRecord) -> bool + Send,
    {
        let mut guard = self.access.lock();
        let key = (user_id, country.clone());
        let mut working = guard
            .get(&key)
            .cloned()
            .unwrap_or_else(|| CountryAccessRecord::new(user_id, country, now));
        if !f(&mut working) {
            return Ok(None);
        }
        guard.insert(key, working.clone());
        Ok(Some(working))
    }

    async fn reset_access_records(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<usize, PiplError> {
        let mut guard = self.access.lock();
        let mut count = 0;
        for record in guard.values_mut().filter(|r| r.user_id == user_id) {
            record.reset(now);
            count += 1;
        }
        Ok(count)
    }

    async fn has_access_records(&self, user_id: UserId) -> Result<bool, PiplError> {
        Ok(self.access.lock().keys().any(|(uid, _)| *uid == user_id))
    }

    async fn find_subject(&self, user_id: UserId) -> Result<Option<PiplSubject>, PiplError> {
        Ok(self.subjects.read().get(&user_id).cloned())
    }

    async fn mark_subject_tracked(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<PiplSubject, PiplError> {
        let mut guard = self.subjects.write();
        let subject = guard
            .entry(user_id)
            .and_modify(|s| s.track(now))
            .or_insert_with(|| PiplSubject::new(user_id, now));
        Ok(subject.clone())
    }

    async fn try_update_subject<R, E, F>(
        &self,
        user_id: UserId,
        f: F,
    ) -> Result<Option<Result<R, E>>, PiplError>
    where
        F: FnOnce(&mut PiplSubject) -> Result<R, E> + Send,
        R: Send,
        E: Send,
    {
        let mut guard = self.subjects.write();
        let Some(current) = guard.get(&user_id) else {
            return Ok(None);
        };
        // Mutate a copy so a rejected closure leaves the stored record as-is.
        let mut working = current.clone();
        let result = f(&mut working);
        if result.is_ok() {
            guard.insert(user_id, working);
        }
        Ok(Some(result))
    }

    async fn subject_ids(&self) -> Result<Vec<UserId>, PiplError> {
        Ok(self.subjects.read().keys().copied().collect())
    }
}
