//! # Subject Lifecycle State Machine
//!
//! A [`PiplSubject`] exists once a user has met the covered-access
//! threshold. It records when the initial notice went out and how far
//! enforcement has progressed.
//!
//! ## States
//!
//! ```text
//! Tracking ──▶ Notified ──▶ Blocked ──▶ DeletionScheduled (terminal)
//!    ▲            │            │                ▲
//!    │            │            └──▶ DeletionNeedsReview
//!    │            │                 (human review gate)
//!    └────────────┴─── exemption ───────┘
//! ```
//!
//! Exemption returns every non-terminal state to `Tracking` and clears the
//! notice stamp, so the notice period never resumes from an old stamp.
//!
//! ## Derived phases
//!
//! Block and deletion eligibility depend on the clock, not on a write, so
//! they are projected by [`PiplSubject::phase`]:
//!
//! | Stored state | Condition | Phase |
//! |---|---|---|
//! | Tracking | `last_tracked_at` unset | `Untracked` |
//! | Tracking | otherwise | `Tracking` |
//! | Notified | block threshold met | `BlockEligible` |
//! | Blocked | deletion threshold met | `DeletionEligible` |

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use pipl_core::{Thresholds, UserId};

// ─── Subject State ───────────────────────────────────────────────────

/// Stored lifecycle state of a subject record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectState {
    /// Covered access observed; no notice sent yet.
    Tracking,
    /// Initial notice sent; notice period running.
    Notified,
    /// Account blocked after the notice period.
    Blocked,
    /// Deletion criteria met but an active public project needs a human.
    DeletionNeedsReview,
    /// Soft deletion enqueued (terminal).
    DeletionScheduled,
}

impl SubjectState {
    /// All states, in lifecycle order.
    pub const ALL: [SubjectState; 5] = [
        Self::Tracking,
        Self::Notified,
        Self::Blocked,
        Self::DeletionNeedsReview,
        Self::DeletionScheduled,
    ];

    /// States reachable in one step.
    pub fn valid_transitions(&self) -> &'static [SubjectState] {
        match self {
            Self::Tracking => &[Self::Notified],
            Self::Notified => &[Self::Blocked, Self::Tracking],
            Self::Blocked => &[
                Self::DeletionNeedsReview,
                Self::DeletionScheduled,
                Self::Tracking,
            ],
            Self::DeletionNeedsReview => &[Self::DeletionScheduled, Self::Tracking],
            Self::DeletionScheduled => &[],
        }
    }

    /// Whether this state is terminal.
    pub fn is_terminal(&self) -> bool {
        self.valid_transitions().is_empty()
    }

    /// The snake_case name stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tracking => "tracking",
            Self::Notified => "notified",
            Self::Blocked => "blocked",
            Self::DeletionNeedsReview => "deletion_needs_review",
            Self::DeletionScheduled => "deletion_scheduled",
        }
    }
}

impl std::str::FromStr for SubjectState {
    type Err = SubjectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| SubjectError::UnknownState(s.to_string()))
    }
}

impl std::fmt::Display for SubjectState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Projected phase: stored state plus clock-dependent eligibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectPhase {
    /// Record exists but the tracking marker is cleared.
    Untracked,
    /// Tracked, no notice yet.
    Tracking,
    /// Notice period running.
    Notified,
    /// Notice period elapsed; block step may proceed.
    BlockEligible,
    /// Blocked; deletion period still running.
    Blocked,
    /// Deletion period elapsed; delete step may proceed.
    DeletionEligible,
    /// Waiting for human review.
    DeletionReview,
    /// Deletion enqueued.
    DeletionScheduled,
}

impl std::fmt::Display for SubjectPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Untracked => "untracked",
            Self::Tracking => "tracking",
            Self::Notified => "notified",
            Self::BlockEligible => "block_eligible",
            Self::Blocked => "blocked",
            Self::DeletionEligible => "deletion_eligible",
            Self::DeletionReview => "deletion_review",
            Self::DeletionScheduled => "deletion_scheduled",
        };
        f.write_str(s)
    }
}

// ─── Errors ──────────────────────────────────────────────────────────

/// Errors from subject lifecycle transitions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubjectError {
    /// The initial notice stamp is already set.
    #[error("initial notice already sent to user {user_id} at {sent_at}")]
    AlreadyNotified {
        /// The subject's user.
        user_id: UserId,
        /// The existing stamp.
        sent_at: DateTime<Utc>,
    },

    /// Attempted transition is not in the transition table.
    #[error("invalid subject transition for user {user_id}: {from} -> {to}")]
    InvalidTransition {
        /// The subject's user.
        user_id: UserId,
        /// Current state.
        from: SubjectState,
        /// Attempted target state.
        to: SubjectState,
    },

    /// A stored state name could not be parsed.
    #[error("unknown subject state {0:?}")]
    UnknownState(String),
}

// ─── Transition Record ───────────────────────────────────────────────

/// Record of a subject state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectTransitionRecord {
    /// State before the transition.
    pub from_state: SubjectState,
    /// State after the transition.
    pub to_state: SubjectState,
    /// When the transition occurred.
    pub timestamp: DateTime<Utc>,
    /// Reason for the transition.
    pub reason: String,
}

// ─── Subject ─────────────────────────────────────────────────────────

/// Per-user compliance record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PiplSubject {
    /// The user.
    pub user_id: UserId,
    /// Stored lifecycle state.
    pub state: SubjectState,
    /// When the initial notice went out. Set once; cleared only by
    /// exemption.
    pub initial_email_sent_at: Option<DateTime<Utc>>,
    /// Last time the access threshold was observed met. `None` means
    /// untracked.
    pub last_tracked_at: Option<DateTime<Utc>>,
    /// Set while the user is known to be exempt.
    pub exempted_at: Option<DateTime<Utc>>,
    /// Record creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
    /// Ordered log of state transitions.
    #[serde(default)]
    pub transitions: Vec<SubjectTransitionRecord>,
}

impl PiplSubject {
    /// A newly tracked subject.
    pub fn new(user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            state: SubjectState::Tracking,
            initial_email_sent_at: None,
            last_tracked_at: Some(now),
            exempted_at: None,
            created_at: now,
            updated_at: now,
            transitions: Vec::new(),
        }
    }

    /// Whether the tracking marker is set.
    pub fn is_tracked(&self) -> bool {
        self.last_tracked_at.is_some()
    }

    /// Set the tracking marker.
    pub fn track(&mut self, now: DateTime<Utc>) {
        self.last_tracked_at = Some(now);
        self.updated_at = now;
    }

    /// Clear the tracking marker. History is kept.
    pub fn untrack(&mut self, now: DateTime<Utc>) {
        self.last_tracked_at = None;
        self.updated_at = now;
    }

    /// Stamp the initial notice (TRACKING → NOTIFIED).
    ///
    /// The stamp check comes first so a re-run after success reports
    /// [`SubjectError::AlreadyNotified`] rather than a transition error.
    pub fn mark_notified(&mut self, now: DateTime<Utc>) -> Result<(), SubjectError> {
        if let Some(sent_at) = self.initial_email_sent_at {
            return Err(SubjectError::AlreadyNotified {
                user_id: self.user_id,
                sent_at,
            });
        }
        self.require_transition(SubjectState::Notified)?;
        self.initial_email_sent_at = Some(now);
        self.do_transition(SubjectState::Notified, now, "initial compliance notice sent");
        Ok(())
    }

    /// Record the block (NOTIFIED → BLOCKED).
    pub fn mark_blocked(&mut self, now: DateTime<Utc>, reason: &str) -> Result<(), SubjectError> {
        self.require_transition(SubjectState::Blocked)?;
        self.do_transition(SubjectState::Blocked, now, reason);
        Ok(())
    }

    /// Hand deletion to a human (BLOCKED → DELETION_NEEDS_REVIEW).
    pub fn defer_for_review(
        &mut self,
        now: DateTime<Utc>,
        reason: &str,
    ) -> Result<(), SubjectError> {
        self.require_transition(SubjectState::DeletionNeedsReview)?;
        self.do_transition(SubjectState::DeletionNeedsReview, now, reason);
        Ok(())
    }

    /// Record that deletion was enqueued
    /// (BLOCKED | DELETION_NEEDS_REVIEW → DELETION_SCHEDULED).
    pub fn schedule_deletion(
        &mut self,
        now: DateTime<Utc>,
        reason: &str,
    ) -> Result<(), SubjectError> {
        self.require_transition(SubjectState::DeletionScheduled)?;
        self.do_transition(SubjectState::DeletionScheduled, now, reason);
        Ok(())
    }

    /// Clear the notice stamp so the notice period restarts.
    ///
    /// NOTIFIED, BLOCKED and DELETION_NEEDS_REVIEW return to TRACKING;
    /// TRACKING only loses a stray stamp. Returns whether anything changed.
    /// A scheduled deletion cannot be reset.
    pub fn reset_notice(&mut self, now: DateTime<Utc>, reason: &str) -> Result<bool, SubjectError> {
        if self.state == SubjectState::Tracking {
            let changed = self.initial_email_sent_at.take().is_some();
            if changed {
                self.updated_at = now;
            }
            return Ok(changed);
        }
        self.require_transition(SubjectState::Tracking)?;
        self.initial_email_sent_at = None;
        self.do_transition(SubjectState::Tracking, now, reason);
        Ok(true)
    }

    /// Record that the user is exempt. Returns `true` if newly exempt.
    pub fn mark_exempt(&mut self, now: DateTime<Utc>) -> bool {
        if self.exempted_at.is_some() {
            return false;
        }
        self.exempted_at = Some(now);
        self.updated_at = now;
        true
    }

    /// Clear the exemption marker. Returns `true` if it was set.
    pub fn clear_exemption(&mut self, now: DateTime<Utc>) -> bool {
        if self.exempted_at.take().is_none() {
            return false;
        }
        self.updated_at = now;
        true
    }

    /// Time since the initial notice, if sent.
    pub fn time_since_notice(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.initial_email_sent_at.map(|sent| now - sent)
    }

    /// Notice sent and the block notice period strictly exceeded.
    pub fn block_threshold_met(&self, now: DateTime<Utc>, thresholds: &Thresholds) -> bool {
        self.time_since_notice(now)
            .is_some_and(|elapsed| elapsed > thresholds.block_notice_period())
    }

    /// Notice sent and the deletion period strictly exceeded.
    pub fn deletion_threshold_met(&self, now: DateTime<Utc>, thresholds: &Thresholds) -> bool {
        self.time_since_notice(now)
            .is_some_and(|elapsed| elapsed > thresholds.deletion_period())
    }

    /// The date after which the account may be blocked.
    pub fn notice_deadline(&self, thresholds: &Thresholds) -> Option<NaiveDate> {
        self.initial_email_sent_at
            .map(|sent| (sent + thresholds.block_notice_period()).date_naive())
    }

    /// Whole days of access left before block eligibility, floored at 0.
    pub fn remaining_access_days(&self, now: DateTime<Utc>, thresholds: &Thresholds) -> Option<i64> {
        self.time_since_notice(now)
            .map(|elapsed| (thresholds.block_notice_days - elapsed.num_days()).max(0))
    }

    /// The projected lifecycle phase at `now`.
    pub fn phase(&self, now: DateTime<Utc>, thresholds: &Thresholds) -> SubjectPhase {
        match self.state {
            SubjectState::Tracking if !self.is_tracked() => SubjectPhase::Untracked,
            SubjectState::Tracking => SubjectPhase::Tracking,
            SubjectState::Notified if self.block_threshold_met(now, thresholds) => {
                SubjectPhase::BlockEligible
            }
            SubjectState::Notified => SubjectPhase::Notified,
            SubjectState::Blocked if self.deletion_threshold_met(now, thresholds) => {
                SubjectPhase::DeletionEligible
            }
            SubjectState::Blocked => SubjectPhase::Blocked,
            SubjectState::DeletionNeedsReview => SubjectPhase::DeletionReview,
            SubjectState::DeletionScheduled => SubjectPhase::DeletionScheduled,
        }
    }

    // ── Internal helpers ─────────────────────────────────────────────

    fn require_transition(&self, to: SubjectState) -> Result<(), SubjectError> {
        if self.state.valid_transitions().contains(&to) {
            Ok(())
        } else {
            Err(SubjectError::InvalidTransition {
                user_id: self.user_id,
                from: self.state,
                to,
            })
        }
    }

    fn do_transition(&mut self, to: SubjectState, now: DateTime<Utc>, reason: &str) {
        self.transitions.push(SubjectTransitionRecord {
            from_state: self.state,
            to_state: to,
            timestamp: now,
            reason: reason.to_string(),
        });
        self.state = to;
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 10, 8, 0, 0).unwrap()
    }

    fn notified_at(at: DateTime<Utc>) -> PiplSubject {
        let mut s = PiplSubject::new(UserId::new(7), at);
        s.mark_notified(at).unwrap();
        s
    }

    #[test]
    fn new_subject_is_tracking_and_tracked() {
        let s = PiplSubject::new(UserId::new(7), t0());
        assert_eq!(s.state, SubjectState::Tracking);
        assert!(s.is_tracked());
        assert_eq!(s.phase(t0(), &Thresholds::default()), SubjectPhase::Tracking);
    }

    #[test]
    fn untracked_phase() {
        let mut s = PiplSubject::new(UserId::new(7), t0());
        s.untrack(t0());
        assert_eq!(s.phase(t0(), &Thresholds::default()), SubjectPhase::Untracked);
    }

    #[test]
    fn second_notification_reports_existing_stamp() {
        let mut s = notified_at(t0());
        let err = s.mark_notified(t0() + Duration::days(1)).unwrap_err();
        assert_eq!(
            err,
            SubjectError::AlreadyNotified {
                user_id: UserId::new(7),
                sent_at: t0()
            }
        );
        assert_eq!(s.initial_email_sent_at, Some(t0()));
        assert_eq!(s.transitions.len(), 1);
    }

    #[test]
    fn block_threshold_is_strict() {
        let th = Thresholds::default();
        let s = notified_at(t0());
        assert!(!s.block_threshold_met(t0() + Duration::days(59), &th));
        assert!(!s.block_threshold_met(t0() + Duration::days(60), &th));
        assert!(s.block_threshold_met(t0() + Duration::days(60) + Duration::seconds(1), &th));
        assert!(s.block_threshold_met(t0() + Duration::days(61), &th));
    }

    #[test]
    fn thresholds_need_a_notice() {
        let th = Thresholds::default();
        let s = PiplSubject::new(UserId::new(7), t0());
        assert!(!s.block_threshold_met(t0() + Duration::days(500), &th));
        assert!(!s.deletion_threshold_met(t0() + Duration::days(500), &th));
        assert_eq!(s.notice_deadline(&th), None);
        assert_eq!(s.remaining_access_days(t0(), &th), None);
    }

    #[test]
    fn phases_follow_the_clock() {
        let th = Thresholds::default();
        let mut s = notified_at(t0());
        assert_eq!(s.phase(t0() + Duration::days(30), &th), SubjectPhase::Notified);
        assert_eq!(s.phase(t0() + Duration::days(61), &th), SubjectPhase::BlockEligible);
        s.mark_blocked(t0() + Duration::days(61), "notice period elapsed").unwrap();
        assert_eq!(s.phase(t0() + Duration::days(90), &th), SubjectPhase::Blocked);
        assert_eq!(s.phase(t0() + Duration::days(121), &th), SubjectPhase::DeletionEligible);
    }

    #[test]
    fn deadline_and_remaining_days() {
        let th = Thresholds::default();
        let s = notified_at(t0());
        assert_eq!(
            s.notice_deadline(&th),
            Some(NaiveDate::from_ymd_opt(2026, 3, 11).unwrap())
        );
        assert_eq!(s.remaining_access_days(t0() + Duration::days(10), &th), Some(50));
        assert_eq!(s.remaining_access_days(t0() + Duration::days(75), &th), Some(0));
    }

    #[test]
    fn cannot_block_without_notice() {
        let mut s = PiplSubject::new(UserId::new(7), t0());
        assert!(matches!(
            s.mark_blocked(t0(), "x"),
            Err(SubjectError::InvalidTransition {
                from: SubjectState::Tracking,
                to: SubjectState::Blocked,
                ..
            })
        ));
    }

    #[test]
    fn review_then_schedule() {
        let mut s = notified_at(t0());
        s.mark_blocked(t0(), "blocked").unwrap();
        s.defer_for_review(t0(), "public project").unwrap();
        assert_eq!(s.state, SubjectState::DeletionNeedsReview);
        s.schedule_deletion(t0(), "review approved").unwrap();
        assert!(s.state.is_terminal());
        assert!(s.schedule_deletion(t0(), "again").is_err());
    }

    #[test]
    fn reset_notice_from_notified() {
        let mut s = notified_at(t0());
        assert!(s.reset_notice(t0() + Duration::days(3), "exempt").unwrap());
        assert_eq!(s.state, SubjectState::Tracking);
        assert_eq!(s.initial_email_sent_at, None);
        assert!(!s.reset_notice(t0() + Duration::days(4), "exempt").unwrap());
        // The timeline restarts from a fresh stamp.
        s.mark_notified(t0() + Duration::days(5)).unwrap();
        assert_eq!(s.initial_email_sent_at, Some(t0() + Duration::days(5)));
    }

    #[test]
    fn reset_notice_releases_blocked_and_review_states() {
        let later = t0() + Duration::days(70);
        let mut blocked = notified_at(t0());
        blocked.mark_blocked(t0() + Duration::days(61), "blocked").unwrap();
        assert!(blocked.reset_notice(later, "exempt").unwrap());
        assert_eq!(blocked.state, SubjectState::Tracking);
        assert_eq!(blocked.initial_email_sent_at, None);
        let last = blocked.transitions.last().unwrap();
        assert_eq!(last.from_state, SubjectState::Blocked);
        assert_eq!(last.to_state, SubjectState::Tracking);
        assert_eq!(last.timestamp, later);

        let mut review = notified_at(t0());
        review.mark_blocked(t0(), "blocked").unwrap();
        review.defer_for_review(t0(), "public project").unwrap();
        assert!(review.reset_notice(later, "exempt").unwrap());
        assert_eq!(review.state, SubjectState::Tracking);
        assert_eq!(review.initial_email_sent_at, None);
    }

    #[test]
    fn reset_notice_refused_once_deletion_is_scheduled() {
        let mut s = notified_at(t0());
        s.mark_blocked(t0(), "blocked").unwrap();
        s.schedule_deletion(t0(), "deleted").unwrap();
        assert!(matches!(
            s.reset_notice(t0(), "exempt"),
            Err(SubjectError::InvalidTransition {
                from: SubjectState::DeletionScheduled,
                ..
            })
        ));
        assert_eq!(s.initial_email_sent_at, Some(t0()));
    }

    #[test]
    fn exemption_marker_toggles() {
        let mut s = PiplSubject::new(UserId::new(7), t0());
        assert!(s.mark_exempt(t0()));
        assert!(!s.mark_exempt(t0() + Duration::days(1)));
        assert_eq!(s.exempted_at, Some(t0()));
        assert!(s.clear_exemption(t0()));
        assert!(!s.clear_exemption(t0()));
    }

    #[test]
    fn state_names_round_trip() {
        for state in SubjectState::ALL {
            assert_eq!(state.as_str().parse::<SubjectState>().unwrap(), state);
            assert_eq!(
                serde_json::to_value(state).unwrap(),
                serde_json::Value::String(state.as_str().into())
            );
        }
        assert!("deleted".parse::<SubjectState>().is_err());
    }
}
