//! # Access Threshold
//!
//! A user has met the access threshold when either
//!
//! - any covered record's `first_access_at` is older than the lookback
//!   (6 months by default), or
//! - the summed covered `access_count` reaches the count threshold (5).
//!
//! An access from an uncovered country zeroes every record and clears
//! `first_access_at`, so both arms fail until the user again accumulates
//! evidence exclusively from covered countries.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use pipl_core::{CountryCode, PolicyContext};
use pipl_state::CountryAccessRecord;

/// Sum of `access_count` over records whose country is covered.
pub fn covered_access_total(
    records: &[CountryAccessRecord],
    covered: &BTreeSet<CountryCode>,
) -> u64 {
    records
        .iter()
        .filter(|r| covered.contains(&r.country_code))
        .map(|r| u64::from(r.access_count))
        .sum()
}

/// Whether the composite access threshold is met at `now`.
pub fn met_access_threshold(
    records: &[CountryAccessRecord],
    ctx: &PolicyContext,
    now: DateTime<Utc>,
) -> bool {
    let cutoff = ctx.thresholds.lookback_cutoff(now);
    let long_enough = records
        .iter()
        .filter(|r| ctx.is_covered(&r.country_code) && r.access_count > 0)
        .filter_map(|r| r.first_access_at)
        .any(|first| first < cutoff);

    long_enough
        || covered_access_total(records, &ctx.covered_countries)
            >= u64::from(ctx.thresholds.access_count_threshold)
}
