//! # Engine Configuration
//!
//! [`PiplConfig`] is the single deserializable configuration document for
//! the engine. It is loaded from YAML, optionally overridden from the
//! environment, validated, and then turned into a [`PolicyContext`] that is
//! handed to every operation.
//!
//! ```yaml
//! compliance_available: true
//! enforcement_enabled: true
//! covered_countries: [CN, HK, MO]
//! thresholds:
//!   access_lookback_months: 6
//!   access_count_threshold: 5
//!   tracking_window: { kind: calendar_day }
//!   block_notice_days: 60
//!   deletion_days: 120
//!   deletion_commit_threshold: 5
//!   reminder_interval_days: 14
//! worker:
//!   sweep_interval_secs: 86400
//!   dead_letter_retention_days: 30
//! ```
//!
//! Every field has a default; an empty document is a valid configuration
//! with the SaaS capability flag off.
//!
//! [`PolicyContext`]: crate::policy::PolicyContext

use std::collections::BTreeSet;
use std::path::Path;

use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{PiplError, ValidationError};
use crate::identity::CountryCode;

/// Countries on the PIPL applicability list when none are configured.
pub const DEFAULT_COVERED_COUNTRIES: [&str; 3] = ["CN", "HK", "MO"];

/// Top-level configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PiplConfig {
    /// SaaS-only capability flag. Gates everything, including tracking.
    pub compliance_available: bool,
    /// Instance-wide enforcement setting. Gates notify/block/delete.
    pub enforcement_enabled: bool,
    /// ISO 3166-1 alpha-2 codes on the applicability list.
    pub covered_countries: Vec<String>,
    /// Access and enforcement thresholds.
    pub thresholds: Thresholds,
    /// Job worker tuning.
    pub worker: WorkerConfig,
}

impl Default for PiplConfig {
    fn default() -> Self {
        Self {
            compliance_available: false,
            enforcement_enabled: true,
            covered_countries: DEFAULT_COVERED_COUNTRIES
                .iter()
                .map(|c| (*c).to_string())
                .collect(),
            thresholds: Thresholds::default(),
            worker: WorkerConfig::default(),
        }
    }
}

impl PiplConfig {
    /// Parse a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, PiplError> {
        serde_yaml::from_str(yaml).map_err(|e| PiplError::Config(format!("invalid YAML: {e}")))
    }

    /// Read and parse a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, PiplError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            PiplError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_yaml_str(&raw)
    }

    /// Apply overrides from the process environment.
    ///
    /// Recognized variables: `PIPL_COMPLIANCE_AVAILABLE`,
    /// `PIPL_ENFORCEMENT_ENABLED` (booleans) and `PIPL_COVERED_COUNTRIES`
    /// (comma-separated codes).
    pub fn with_env_overrides(self) -> Result<Self, PiplError> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup.
    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, PiplError> {
        if let Some(v) = lookup("PIPL_COMPLIANCE_AVAILABLE") {
            self.compliance_available = parse_bool("PIPL_COMPLIANCE_AVAILABLE", &v)?;
        }
        if let Some(v) = lookup("PIPL_ENFORCEMENT_ENABLED") {
            self.enforcement_enabled = parse_bool("PIPL_ENFORCEMENT_ENABLED", &v)?;
        }
        if let Some(v) = lookup("PIPL_COVERED_COUNTRIES") {
            self.covered_countries = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        Ok(self)
    }

    /// Parse the configured country list into validated codes.
    pub fn covered_country_codes(&self) -> Result<BTreeSet<CountryCode>, ValidationError> {
        let codes = self
            .covered_countries
            .iter()
            .map(CountryCode::new)
            .collect::<Result<BTreeSet<_>, _>>()?;
        if codes.is_empty() {
            return Err(ValidationError::EmptyCoveredCountries);
        }
        Ok(codes)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.covered_country_codes()?;
        self.thresholds.validate()?;
        self.worker.validate()
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, PiplError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(PiplError::Config(format!(
            "{key} must be a boolean, got {other:?}"
        ))),
    }
}

/// How long a covered access suppresses further counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrackingWindow {
    /// Same UTC calendar date.
    CalendarDay,
    /// A rolling window of `hours` since the last counted access.
    Rolling {
        /// Window length in hours.
        hours: u32,
    },
}

impl TrackingWindow {
    /// Whether an access counted at `last` still covers `now`.
    ///
    /// A `last` in the future (clock skew between writers) counts as inside
    /// the window, so skew never produces a double increment.
    pub fn contains(&self, last: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        if last > now {
            return true;
        }
        match self {
            Self::CalendarDay => last.date_naive() == now.date_naive(),
            Self::Rolling { hours } => now - last < Duration::hours(i64::from(*hours)),
        }
    }
}

/// Access and enforcement thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Thresholds {
    /// A covered record whose first access is older than this many months
    /// meets the access threshold on its own.
    pub access_lookback_months: u32,
    /// Summed covered `access_count` at which the threshold is met.
    pub access_count_threshold: u32,
    /// Per-country counting window.
    pub tracking_window: TrackingWindow,
    /// Days between the initial notice and block eligibility.
    pub block_notice_days: i64,
    /// Days between the initial notice and deletion eligibility.
    pub deletion_days: i64,
    /// Public projects with more commits than this defer deletion.
    pub deletion_commit_threshold: u64,
    /// Days between reminder notices.
    pub reminder_interval_days: i64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            access_lookback_months: 6,
            access_count_threshold: 5,
            tracking_window: TrackingWindow::CalendarDay,
            block_notice_days: 60,
            deletion_days: 120,
            deletion_commit_threshold: 5,
            reminder_interval_days: 14,
        }
    }
}

impl Thresholds {
    /// The block notice period.
    pub fn block_notice_period(&self) -> Duration {
        Duration::days(self.block_notice_days)
    }

    /// The deletion period.
    pub fn deletion_period(&self) -> Duration {
        Duration::days(self.deletion_days)
    }

    /// Interval between reminder notices.
    pub fn reminder_interval(&self) -> Duration {
        Duration::days(self.reminder_interval_days)
    }

    /// The instant before which a first access satisfies the lookback.
    pub fn lookback_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_months(Months::new(self.access_lookback_months))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Check ranges and ordering.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.access_count_threshold == 0 {
            return Err(ValidationError::InvalidThreshold {
                name: "access_count_threshold",
                reason: "must be at least 1".into(),
            });
        }
        if self.block_notice_days <= 0 {
            return Err(ValidationError::InvalidThreshold {
                name: "block_notice_days",
                reason: format!("must be positive, got {}", self.block_notice_days),
            });
        }
        if self.deletion_days <= self.block_notice_days {
            return Err(ValidationError::InvalidThreshold {
                name: "deletion_days",
                reason: format!(
                    "must exceed block_notice_days ({}), got {}",
                    self.block_notice_days, self.deletion_days
                ),
            });
        }
        if self.reminder_interval_days <= 0 {
            return Err(ValidationError::InvalidThreshold {
                name: "reminder_interval_days",
                reason: format!("must be positive, got {}", self.reminder_interval_days),
            });
        }
        if let TrackingWindow::Rolling { hours: 0 } = self.tracking_window {
            return Err(ValidationError::InvalidThreshold {
                name: "tracking_window",
                reason: "rolling window must be at least one hour".into(),
            });
        }
        Ok(())
    }
}

/// Job worker tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkerConfig {
    /// Seconds between periodic sweeps.
    pub sweep_interval_secs: u64,
    /// Cooperative lease settings for the sweep.
    pub lease: LeaseConfig,
    /// Retry policy for failed jobs.
    pub retry: RetryConfig,
    /// Days a dead-lettered job is kept for inspection before pruning.
    pub dead_letter_retention_days: i64,
}

impl WorkerConfig {
    /// Reject intervals and attempt counts the worker cannot honour.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.sweep_interval_secs == 0 || self.sweep_interval_secs > MAX_SWEEP_INTERVAL_SECS {
            return Err(ValidationError::InvalidThreshold {
                name: "sweep_interval_secs",
                reason: format!(
                    "must be between 1 and {MAX_SWEEP_INTERVAL_SECS}, got {}",
                    self.sweep_interval_secs
                ),
            });
        }
        if self.dead_letter_retention_days < 1 {
            return Err(ValidationError::InvalidThreshold {
                name: "dead_letter_retention_days",
                reason: format!(
                    "must be at least 1, got {}",
                    self.dead_letter_retention_days
                ),
            });
        }
        if self.retry.max_attempts == 0 {
            return Err(ValidationError::InvalidThreshold {
                name: "retry.max_attempts",
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }

    /// The sweep interval as a chrono duration.
    pub fn sweep_interval(&self) -> Duration {
        let secs = self.sweep_interval_secs.min(MAX_SWEEP_INTERVAL_SECS);
        Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX))
    }

    /// How long dead letters are kept.
    pub fn dead_letter_retention(&self) -> Duration {
        Duration::days(self.dead_letter_retention_days.clamp(1, MAX_RETENTION_DAYS))
    }
}

const MAX_RETENTION_DAYS: i64 = 3_650;

/// One year.
const MAX_SWEEP_INTERVAL_SECS: u64 = 366 * 86_400;

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 86_400,
            lease: LeaseConfig::default(),
            retry: RetryConfig::default(),
            dead_letter_retention_days: 30,
        }
    }
}

/// Lease acquisition for lease-protected jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LeaseConfig {
    /// Lease lifetime in seconds. An expired lease can be taken over.
    pub ttl_secs: i64,
    /// Extra acquisition attempts after the first.
    pub retries: u32,
    /// Fixed sleep between attempts, in milliseconds.
    pub backoff_ms: u64,
    /// When all attempts fail, the job is rescheduled this far out.
    pub reschedule_after_secs: i64,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 3_600,
            retries: 3,
            backoff_ms: 500,
            reschedule_after_secs: 7_200,
        }
    }
}

/// Retry policy for jobs that fail with a retryable error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// Total attempts including the first.
    pub max_attempts: u32,
    /// Base backoff in seconds, multiplied by the attempt number.
    pub backoff_secs: i64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_secs: 60,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        Duration::seconds(self.backoff_secs.saturating_mul(i64::from(attempt.max(1))))
    }
}
