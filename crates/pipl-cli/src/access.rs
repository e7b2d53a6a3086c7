//! `pipl record-access`: feed one resolved request into the ledger.

use anyhow::Result;
use clap::Args;

use pipl_core::UserId;
use pipl_ledger::ComplianceStore;

use crate::{print_json, Session};

/// Arguments for `pipl record-access`.
#[derive(Args, Debug)]
pub struct RecordAccessArgs {
    /// Requesting user id. Omit for anonymous requests.
    #[arg(long)]
    pub user: Option<i64>,
    /// Resolved ISO 3166-1 alpha-2 country code.
    #[arg(long)]
    pub country: Option<String>,
}

/// Execute `pipl record-access`. Prints the ledger outcome.
pub async fn run_record_access<S: ComplianceStore>(
    args: &RecordAccessArgs,
    session: &Session<S>,
) -> Result<u8> {
    let outcome = session
        .engine
        .ledger()
        .record_access(
            &session.ctx,
            args.user.map(UserId::new),
            args.country.as_deref(),
        )
        .await?;
    print_json(&outcome)?;
    Ok(0)
}
