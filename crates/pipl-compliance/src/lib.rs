//! # pipl-compliance — Compliance Classifier
//!
//! Decides whether a user is subject to the PIPL regime and whether the
//! block and deletion thresholds have elapsed. Classification never writes.
//!
//! ## Architecture
//!
//! ```text
//! pipl-ledger (evidence)  -->  pipl-compliance (decision)  -->  pipl-enforcement (action)
//!   ComplianceStore              ComplianceClassifier<S, O>         EnforcementPipeline
//!                                ExemptionOracle trait
//! ```
//!
//! Exemption is looked up on every call. A user can leave the pipeline at
//! any stage by joining a paid namespace.

pub mod classifier;
pub mod exemption;

pub use classifier::{Classification, ComplianceClassifier};
pub use exemption::{
    has_paid_membership, membership_counts_as_paid, ExemptionOracle, PaidNamespaceOracle,
};
