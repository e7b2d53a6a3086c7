//! # pipl-cli — Command-Line Front End
//!
//! Provides the `pipl` binary. Each invocation loads a JSON state file (or
//! a Postgres compliance store plus the state file), runs one command and
//! writes the state back.
//!
//! ## Subcommands
//!
//! - `pipl user add|join|leave|project` — edit the user directory.
//! - `pipl record-access --user 7 --country CN` — feed the ledger.
//! - `pipl run-jobs` — drain due jobs through the pipeline.
//! - `pipl step block --user 7` — run one step now.
//! - `pipl sweep [--run]` — lease-protected sweep.
//! - `pipl approve-deletion --user 7 --reviewer 2 --reviewer-name ana`
//! - `pipl status [--user 7]` — classification or overview.
//! - `pipl worker [--ticks N]` — periodic worker loop.
//! - `pipl prune-jobs [--older-than-days N]` — drop old dead letters.
//! - `pipl migrate` — apply the Postgres schema.
//!
//! Pass `--now 2026-05-01T00:00:00Z` to pin the clock.

pub mod access;
pub mod jobs;
pub mod settings;
pub mod status;
pub mod users;
pub mod world;

use std::sync::Arc;

use anyhow::Result;
use clap::Subcommand;
use serde::Serialize;

use pipl_core::{PiplConfig, PolicyContext};
use pipl_enforcement::Actor;
use pipl_ledger::ComplianceStore;

use crate::world::{Engine, World};

/// Top-level commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Edit the user directory in the state file.
    User(users::UserArgs),

    /// Record one access by a user from a resolved country.
    RecordAccess(access::RecordAccessArgs),

    /// Run every job that is due, until the queue is idle.
    RunJobs(jobs::RunJobsArgs),

    /// Run one pipeline step for one user immediately.
    Step(jobs::StepArgs),

    /// Enqueue per-user work for every subject record.
    Sweep(jobs::SweepArgs),

    /// Release a deletion that was deferred for review.
    ApproveDeletion(jobs::ApproveArgs),

    /// Show one user's classification, or an overview.
    Status(status::StatusArgs),

    /// Drain the queue on an interval.
    Worker(jobs::WorkerArgs),

    /// Drop dead-lettered jobs past their retention.
    PruneJobs(jobs::PruneArgs),

    /// Apply the compliance schema to Postgres.
    Migrate,
}

/// Everything a command needs besides its arguments.
pub struct Session<S> {
    pub engine: Arc<Engine<S>>,
    pub config: PiplConfig,
    pub ctx: PolicyContext,
    pub actor: Actor,
}

impl<S: ComplianceStore> Session<S> {
    /// A session over `world` with `store` as the compliance store.
    pub fn new(world: &World, store: Arc<S>, config: PiplConfig, actor: Actor) -> Result<Self> {
        let ctx = settings::policy(&config)?;
        let engine = Arc::new(world.engine(store, config.worker.lease.clone()));
        Ok(Self {
            engine,
            config,
            ctx,
            actor,
        })
    }
}

/// Run a command that needs a session.
///
/// `user` only touches the directory; `migrate` is handled by the binary
/// before a session exists.
pub async fn dispatch<S: ComplianceStore>(
    command: &Command,
    world: &World,
    session: &Session<S>,
) -> Result<u8> {
    match command {
        Command::User(args) => users::run_user(args, &world.directory),
        Command::RecordAccess(args) => access::run_record_access(args, session).await,
        Command::RunJobs(args) => jobs::run_jobs(args, session).await,
        Command::Step(args) => jobs::run_step(args, session).await,
        Command::Sweep(args) => jobs::run_sweep(args, session).await,
        Command::ApproveDeletion(args) => jobs::run_approve(args, session).await,
        Command::Status(args) => status::run_status(args, session).await,
        Command::Worker(args) => jobs::run_worker(args, session).await,
        Command::PruneJobs(args) => jobs::run_prune(args, session).await,
        Command::Migrate => anyhow::bail!("migrate requires --database-url"),
    }
}

/// Pretty-print a value as JSON on stdout.
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
