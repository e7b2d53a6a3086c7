//! Pipeline steps, one file per stage. Each adds inherent methods to
//! [`EnforcementPipeline`](crate::EnforcementPipeline).

mod block;
mod delete;
mod notify;
mod paid_status;
mod sweep;

pub use sweep::SWEEP_LEASE_KEY;
