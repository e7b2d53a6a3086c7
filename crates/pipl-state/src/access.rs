//! # Country Access Records
//!
//! A [`CountryAccessRecord`] counts the distinct tracking windows in which a
//! user was seen from one covered country.
//!
//! ```text
//!            register_access (outside window)
//!   count 0 ─────────────────────────────────▶ count n+1, first_access_at ||= now
//!      ▲                                              │
//!      └──────────────── reset (uncovered access) ────┘
//! ```
//!
//! A reset is a hard restart: the count AND `first_access_at` are cleared,
//! so neither the count threshold nor the lookback threshold can be carried
//! across a disqualifying access.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pipl_core::{CountryCode, TrackingWindow, UserId};

/// Access evidence for one user from one covered country.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountryAccessRecord {
    /// The user.
    pub user_id: UserId,
    /// The covered country.
    pub country_code: CountryCode,
    /// First counted access since creation or the last reset.
    pub first_access_at: Option<DateTime<Utc>>,
    /// Last counted access.
    pub last_access_at: Option<DateTime<Utc>>,
    /// Number of tracking windows with at least one access.
    pub access_count: u32,
    /// When the counters were last zeroed.
    pub access_count_reset_at: Option<DateTime<Utc>>,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl CountryAccessRecord {
    /// A fresh, uncounted record.
    pub fn new(user_id: UserId, country_code: CountryCode, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            country_code,
            first_access_at: None,
            last_access_at: None,
            access_count: 0,
            access_count_reset_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether an access at `now` falls inside the window of the last
    /// counted access. Zeroed records are never inside a window, so the
    /// first access after a reset always counts.
    pub fn tracked_within(&self, window: &TrackingWindow, now: DateTime<Utc>) -> bool {
        if self.access_count == 0 {
            return false;
        }
        self.last_access_at
            .is_some_and(|last| window.contains(last, now))
    }

    /// Count an access at `now`.
    ///
    /// Returns `false` without mutating when the access falls inside the
    /// current window. Callers hold the row lock across the check and the
    /// mutation.
    pub fn register_access(&mut self, window: &TrackingWindow, now: DateTime<Utc>) -> bool {
        if self.tracked_within(window, now) {
            return false;
        }
        if self.access_count == 0 || self.first_access_at.is_none() {
            self.first_access_at = Some(now);
        }
        self.last_access_at = Some(now);
        self.access_count = self.access_count.saturating_add(1);
        self.updated_at = now;
        true
    }

    /// Zero the counters.
    pub fn reset(&mut self, now: DateTime<Utc>) {
        self.access_count = 0;
        self.first_access_at = None;
        self.access_count_reset_at = Some(now);
        self.updated_at = now;
    }
}
