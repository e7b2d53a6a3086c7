//! # Job Subcommands
//!
//! - `run-jobs`: drain everything due now.
//! - `step`: run one pipeline step for one user immediately.
//! - `sweep`: run the sweep, optionally draining what it enqueued.
//! - `approve-deletion`: a reviewer releases a deferred deletion.
//! - `worker`: drain on a wall-clock interval.
//! - `prune-jobs`: drop old dead letters from the queue.

use std::sync::Arc;

use anyhow::{ensure, Result};
use chrono::Duration;
use clap::{Args, ValueEnum};

use pipl_core::{Job, UserId};
use pipl_enforcement::{
    Actor, InMemoryDirectory, Permission, RecordingNotifier, ServiceResponse, Worker,
};
use pipl_ledger::ComplianceStore;

use crate::{print_json, Session};

/// Exit code for a step that stopped on a business outcome.
pub const EXIT_REJECTED: u8 = 2;

fn response_code(response: &ServiceResponse) -> u8 {
    if response.is_success() {
        0
    } else {
        EXIT_REJECTED
    }
}

fn worker<S: ComplianceStore>(session: &Session<S>) -> Worker<S, InMemoryDirectory, RecordingNotifier> {
    Worker::new(
        Arc::clone(&session.engine),
        session.ctx.clone(),
        session.actor.clone(),
        session.config.worker.clone(),
    )
}

// ─── run-jobs ────────────────────────────────────────────────────────

/// Arguments for `pipl run-jobs`.
#[derive(Args, Debug)]
pub struct RunJobsArgs {
    /// Stop after this many rounds even if jobs keep becoming due.
    #[arg(long, default_value_t = 16)]
    pub max_rounds: usize,
}

/// Execute `pipl run-jobs`. Prints the worker report.
pub async fn run_jobs<S: ComplianceStore>(args: &RunJobsArgs, session: &Session<S>) -> Result<u8> {
    let report = worker(session).run_until_idle(args.max_rounds).await;
    print_json(&report)?;
    Ok(0)
}

// ─── step ────────────────────────────────────────────────────────────

/// A single-user pipeline step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StepKind {
    /// Decide whether the initial notice is due.
    Evaluate,
    /// Send the initial notice.
    Notify,
    /// Send a reminder.
    Remind,
    /// Block the account.
    Block,
    /// Delete the account.
    Delete,
    /// Re-check paid-namespace membership.
    CheckPaid,
}

impl StepKind {
    /// The job this step runs as.
    pub fn job(self, user_id: UserId) -> Job {
        match self {
            Self::Evaluate => Job::EvaluateSubject { user_id },
            Self::Notify => Job::SendInitialNotice { user_id },
            Self::Remind => Job::SendReminder { user_id },
            Self::Block => Job::BlockUser { user_id },
            Self::Delete => Job::DeleteUser { user_id },
            Self::CheckPaid => Job::CheckPaidStatus { user_id },
        }
    }
}

/// Arguments for `pipl step`.
#[derive(Args, Debug)]
pub struct StepArgs {
    /// Which step.
    #[arg(value_enum)]
    pub step: StepKind,
    /// Target user id.
    #[arg(long)]
    pub user: i64,
}

/// Execute `pipl step`. Prints the step response.
pub async fn run_step<S: ComplianceStore>(args: &StepArgs, session: &Session<S>) -> Result<u8> {
    let job = args.step.job(UserId::new(args.user));
    let response = session
        .engine
        .run_job(&session.ctx, &session.actor, &job)
        .await?;
    print_json(&response)?;
    Ok(response_code(&response))
}

// ─── sweep ───────────────────────────────────────────────────────────

/// Arguments for `pipl sweep`.
#[derive(Args, Debug)]
pub struct SweepArgs {
    /// Also run the jobs the sweep enqueued.
    #[arg(long)]
    pub run: bool,
}

/// Execute `pipl sweep`.
pub async fn run_sweep<S: ComplianceStore>(args: &SweepArgs, session: &Session<S>) -> Result<u8> {
    let response = session.engine.sweep(&session.ctx).await?;
    print_json(&response)?;
    if args.run && response.is_success() {
        let report = worker(session).run_until_idle(16).await;
        print_json(&report)?;
    }
    Ok(response_code(&response))
}

// ─── approve-deletion ────────────────────────────────────────────────

/// Arguments for `pipl approve-deletion`.
#[derive(Args, Debug)]
pub struct ApproveArgs {
    /// User whose deletion was deferred.
    #[arg(long)]
    pub user: i64,
    /// Reviewer account id, recorded as the deleting user.
    #[arg(long)]
    pub reviewer: i64,
    /// Reviewer login name.
    #[arg(long)]
    pub reviewer_name: String,
}

/// Execute `pipl approve-deletion`.
pub async fn run_approve<S: ComplianceStore>(args: &ApproveArgs, session: &Session<S>) -> Result<u8> {
    let reviewer = Actor::new(UserId::new(args.reviewer), args.reviewer_name.as_str())
        .with_permission(Permission::DeleteUser);
    let response = session
        .engine
        .approve_deletion(&session.ctx, &reviewer, UserId::new(args.user))
        .await?;
    print_json(&response)?;
    Ok(response_code(&response))
}

// ─── worker ──────────────────────────────────────────────────────────

/// Arguments for `pipl worker`.
#[derive(Args, Debug)]
pub struct WorkerArgs {
    /// Stop after this many intervals. Runs until interrupted when absent.
    #[arg(long)]
    pub ticks: Option<u64>,
}

/// Execute `pipl worker`.
pub async fn run_worker<S: ComplianceStore>(args: &WorkerArgs, session: &Session<S>) -> Result<u8> {
    tracing::info!(
        interval_secs = session.config.worker.sweep_interval_secs,
        ticks = ?args.ticks,
        "worker starting"
    );
    let report = worker(session).run_periodic(args.ticks).await;
    print_json(&report)?;
    Ok(0)
}

// ─── prune-jobs ──────────────────────────────────────────────────────

/// Arguments for `pipl prune-jobs`.
#[derive(Args, Debug)]
pub struct PruneArgs {
    /// Drop dead letters older than this many days. Defaults to the
    /// configured retention.
    #[arg(long)]
    pub older_than_days: Option<i64>,
}

/// Execute `pipl prune-jobs`.
pub async fn run_prune<S: ComplianceStore>(args: &PruneArgs, session: &Session<S>) -> Result<u8> {
    let pruned = match args.older_than_days {
        Some(days) => {
            ensure!(days >= 0, "--older-than-days must not be negative, got {days}");
            let cutoff = session.engine.ledger().now() - Duration::days(days);
            session.engine.queue().prune_failed(cutoff)
        }
        None => worker(session).prune_dead_letters(),
    };
    println!("OK: pruned {pruned} dead-lettered job(s)");
    Ok(0)
}
