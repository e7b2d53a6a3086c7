//! # pipl-core — Foundational Types for the PIPL Compliance Engine
//!
//! Every other crate in the workspace depends on `pipl-core`; it depends on
//! nothing internal.
//!
//! ## Key Design Principles
//!
//! 1. **Newtype wrappers for identifiers.** `UserId`, `NamespaceId`,
//!    `ProjectId` and `CountryCode` are distinct types. A country code is
//!    validated and upper-cased at construction, so `"cn"` and `"CN"` are the
//!    same key everywhere.
//!
//! 2. **Explicit policy.** Feature gates, the covered-country set and every
//!    threshold travel in a [`PolicyContext`] value passed into each
//!    operation. Nothing reads ambient global settings.
//!
//! 3. **Injected time.** All decisions take "now" from a [`Clock`], so the
//!    60/120-day thresholds are testable without sleeping.
//!
//! 4. **Collaborators are traits.** The user directory, notification sender
//!    and job queue are consumed through traits in [`directory`], [`notify`]
//!    and [`jobs`]. The engine never owns their implementation.
//!
//! ## Crate Policy
//!
//! - No dependencies on other `pipl-*` crates.
//! - No `unsafe` code.
//! - No `panic!()` or `.unwrap()` outside tests.

pub mod config;
pub mod directory;
pub mod error;
pub mod identity;
pub mod jobs;
pub mod notify;
pub mod policy;
pub mod temporal;

pub use config::{LeaseConfig, PiplConfig, RetryConfig, Thresholds, TrackingWindow, WorkerConfig};
pub use directory::{
    AccessLevel, AccountState, DeletionRequest, Membership, OwnedProject, Plan, UserAccount,
    UserDirectory, Visibility,
};
pub use error::{DirectoryError, PiplError, ValidationError};
pub use identity::{CountryCode, NamespaceId, ProjectId, UserId};
pub use jobs::{Job, JobQueue};
pub use notify::{ComplianceNotice, NoticeKind, NotificationSender};
pub use policy::PolicyContext;
pub use temporal::{Clock, ManualClock, SystemClock};
