//! # pipl CLI entry point
//!
//! Parses arguments, sets up tracing, resolves configuration, the clock and
//! the compliance store, then dispatches to the subcommand handlers.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use pipl_cli::world::World;
use pipl_cli::{dispatch, settings, Command, Session};
use pipl_core::UserId;
use pipl_enforcement::Actor;
use pipl_ledger::PgStore;

/// PIPL compliance engine CLI.
///
/// Tracks access from covered countries and drives the notice, block and
/// deletion pipeline.
#[derive(Parser, Debug)]
#[command(name = "pipl", version, about, long_about = None)]
struct Cli {
    /// Enable verbose output. Repeat for more verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    /// Path to the YAML configuration file.
    #[arg(long, global = true, env = "PIPL_CONFIG")]
    config: Option<PathBuf>,

    /// Path to the JSON state file.
    #[arg(long, global = true, env = "PIPL_STATE", default_value = "pipl-state.json")]
    state: PathBuf,

    /// Pin the clock to an RFC 3339 timestamp.
    #[arg(long, global = true)]
    now: Option<DateTime<Utc>>,

    /// Keep the compliance store in Postgres instead of the state file.
    #[arg(long, global = true, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Account id the automated steps act as.
    #[arg(long, global = true, env = "PIPL_BOT_ID", default_value_t = 1)]
    bot_id: i64,

    #[command(subcommand)]
    command: Command,
}

fn init_tracing(verbose: u8, json: bool) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(cli: Cli) -> Result<u8> {
    let config = settings::load_config(cli.config.as_deref())?;

    if let Command::Migrate = cli.command {
        let url = cli
            .database_url
            .as_deref()
            .context("migrate requires --database-url or DATABASE_URL")?;
        let store = PgStore::connect(url).await?;
        store.migrate().await?;
        println!("OK: compliance schema is up to date");
        return Ok(0);
    }

    let clock = settings::clock(cli.now);
    let world = World::load(&cli.state, clock)?;
    let actor = Actor::compliance_bot(UserId::new(cli.bot_id));

    let code = match cli.database_url.as_deref() {
        Some(url) => {
            let store = Arc::new(PgStore::connect(url).await?);
            let session = Session::new(&world, store, config, actor)?;
            dispatch(&cli.command, &world, &session).await?
        }
        None => {
            let session = Session::new(&world, Arc::clone(&world.store), config, actor)?;
            dispatch(&cli.command, &world, &session).await?
        }
    };

    world.save(&cli.state)?;
    Ok(code)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json_logs);
    tracing::debug!(state = %cli.state.display(), "pipl starting");

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("{e:#}");
            eprintln!("error: {e:#}");
            ExitCode::from(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_record_access() {
        let cli = Cli::try_parse_from([
            "pipl",
            "--state",
            "/tmp/w.json",
            "record-access",
            "--user",
            "7",
            "--country",
            "cn",
        ])
        .unwrap();
        assert_eq!(cli.state, PathBuf::from("/tmp/w.json"));
        match cli.command {
            Command::RecordAccess(args) => {
                assert_eq!(args.user, Some(7));
                assert_eq!(args.country.as_deref(), Some("cn"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn parse_pinned_clock_and_step() {
        let cli = Cli::try_parse_from([
            "pipl",
            "step",
            "block",
            "--user",
            "9",
            "--now",
            "2026-05-01T00:00:00Z",
            "-vv",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.now.unwrap().to_rfc3339(), "2026-05-01T00:00:00+00:00");
        assert!(matches!(cli.command, Command::Step(_)));
    }

    #[test]
    fn parse_user_join() {
        let cli = Cli::try_parse_from([
            "pipl", "user", "join", "--id", "3", "--namespace", "8", "--plan", "premium",
        ])
        .unwrap();
        assert!(matches!(cli.command, Command::User(_)));
    }

    #[test]
    fn unknown_plan_is_rejected() {
        assert!(Cli::try_parse_from([
            "pipl", "user", "join", "--id", "3", "--namespace", "8", "--plan", "gold",
        ])
        .is_err());
    }
}
