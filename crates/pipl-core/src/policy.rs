//! # Policy Context
//!
//! The value object every ledger, classifier and pipeline operation
//! receives. It carries the two feature gates, the covered-country set and
//! the thresholds, so an operation's behavior is fully determined by its
//! arguments plus collaborator state.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::config::{PiplConfig, Thresholds};
use crate::error::ValidationError;
use crate::identity::CountryCode;

/// Gates, covered countries and thresholds for one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyContext {
    /// SaaS-only capability flag.
    pub compliance_available: bool,
    /// Instance-wide enforcement setting.
    pub enforcement_enabled: bool,
    /// Codes on the applicability list.
    pub covered_countries: BTreeSet<CountryCode>,
    /// Access and enforcement thresholds.
    pub thresholds: Thresholds,
}

impl PolicyContext {
    /// Build a context from a validated configuration.
    pub fn from_config(config: &PiplConfig) -> Result<Self, ValidationError> {
        config.validate()?;
        Ok(Self {
            compliance_available: config.compliance_available,
            enforcement_enabled: config.enforcement_enabled,
            covered_countries: config.covered_country_codes()?,
            thresholds: config.thresholds.clone(),
        })
    }

    /// Whether `code` is on the applicability list.
    pub fn is_covered(&self, code: &CountryCode) -> bool {
        self.covered_countries.contains(code)
    }

    /// Tracking and ledger steps need only the capability flag.
    pub fn tracking_allowed(&self) -> bool {
        self.compliance_available
    }

    /// Enforcement steps need both gates.
    pub fn enforcement_allowed(&self) -> bool {
        self.compliance_available && self.enforcement_enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(available: bool, enabled: bool) -> PolicyContext {
        PolicyContext::from_config(&PiplConfig {
            compliance_available: available,
            enforcement_enabled: enabled,
            ..PiplConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn default_covered_set() {
        let c = ctx(true, true);
        for code in ["CN", "HK", "MO"] {
            assert!(c.is_covered(&CountryCode::new(code).unwrap()));
        }
        assert!(!c.is_covered(&CountryCode::new("US").unwrap()));
    }

    #[test]
    fn gate_matrix() {
        assert!(ctx(true, true).enforcement_allowed());
        assert!(!ctx(true, false).enforcement_allowed());
        assert!(!ctx(false, true).enforcement_allowed());
        assert!(ctx(true, false).tracking_allowed());
        assert!(!ctx(false, true).tracking_allowed());
    }

    #[test]
    fn invalid_config_rejected() {
        let cfg = PiplConfig {
            covered_countries: vec!["China".into()],
            ..PiplConfig::default()
        };
        assert!(PolicyContext::from_config(&cfg).is_err());
    }
}
