//! # pipl-state — Access Records and the Subject Lifecycle
//!
//! ## Records
//!
//! - **Country access** (`access.rs`): one [`CountryAccessRecord`] per
//!   user × covered country, counted at most once per tracking window and
//!   hard-reset when the user is seen from an uncovered country.
//!
//! - **Subject** (`subject.rs`): the per-user [`PiplSubject`] and its
//!   lifecycle
//!   (`Tracking → Notified → Blocked → DeletionNeedsReview | DeletionScheduled`),
//!   with exemption returning any live state to `Tracking`.
//!   Block and deletion eligibility are derived from the notice timestamp and
//!   exposed as a [`SubjectPhase`] projection rather than stored.
//!
//! ## Design
//!
//! Stored state uses a runtime enum with an explicit transition table
//! ([`SubjectState::valid_transitions`]) because records round-trip through
//! Postgres and JSON; every mutation goes through a method that checks the
//! table and appends a [`SubjectTransitionRecord`].

pub mod access;
pub mod subject;

pub use access::CountryAccessRecord;
pub use subject::{
    PiplSubject, SubjectError, SubjectPhase, SubjectState, SubjectTransitionRecord,
};
