//! # pipl-ledger — Access Ledger
//!
//! The factual substrate of the engine: per-user, per-country access
//! counters and the subject records derived from them.
//!
//! ## Modules
//!
//! - [`store`] — the [`ComplianceStore`] persistence contract.
//! - [`memory`] — [`MemoryStore`], mutex-guarded maps with serde snapshots.
//! - [`pg`] — [`PgStore`], Postgres via `sqlx` with row locks and a
//!   uniqueness constraint on (user, country).
//! - [`threshold`] — the pure "covered enough, for long enough, OR often
//!   enough" test.
//! - [`ledger`] — [`AccessLedger::record_access`] and the reset path.
//!
//! ## Concurrency
//!
//! The per-(user, country) row update is the only locked section in the
//! engine. Both stores run the window check and the increment inside one
//! critical section, so concurrent same-window accesses produce exactly
//! one increment.

pub mod ledger;
pub mod memory;
pub mod pg;
pub mod store;
pub mod threshold;

pub use ledger::{AccessLedger, AccessOutcome, SkipReason};
pub use memory::{MemorySnapshot, MemoryStore};
pub use pg::PgStore;
pub use store::ComplianceStore;
pub use threshold::{covered_access_total, met_access_threshold};
