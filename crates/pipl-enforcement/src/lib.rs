//! # pipl-enforcement — Enforcement Pipeline
//!
//! Turns classification into action: initial notice, reminders, block,
//! deletion, and the paid-status re-check, each a separately schedulable
//! and idempotent unit of work. A lease-protected sweep re-derives what
//! every subject needs next.
//!
//! ## Modules
//!
//! - [`pipeline`]: [`EnforcementPipeline`] and job dispatch.
//! - `steps`: one file per step.
//! - [`guard`]: feature gates and actor permissions ([`ComplianceGuard`]).
//! - [`response`]: [`ServiceResponse`] and the [`EnforcementError`]
//!   taxonomy.
//! - [`queue`], [`worker`], [`lease`]: in-process job execution.
//! - [`memory`]: in-memory directory and mailer.
//!
//! ## Failure Model
//!
//! Business outcomes (threshold not met, paid user, already processed) are
//! returned as structured error responses and never retried. Infrastructure
//! failures propagate as `Err(PiplError)` for the worker's retry policy.

pub mod guard;
pub mod lease;
pub mod memory;
pub mod pipeline;
pub mod queue;
pub mod response;
mod steps;
pub mod worker;

pub use guard::{Actor, ComplianceGuard, Permission};
pub use lease::{LeaseGuard, LeaseRegistry};
pub use memory::{DirectoryEntry, DirectorySnapshot, InMemoryDirectory, RecordingNotifier};
pub use pipeline::EnforcementPipeline;
pub use queue::{InMemoryJobQueue, JobStatus, QueueSnapshot, QueuedJob};
pub use response::{EnforcementError, ErrorReason, ServiceResponse};
pub use steps::SWEEP_LEASE_KEY;
pub use worker::{Worker, WorkerReport};
