//! Command handlers over a state file in a temp directory.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};

use pipl_cli::access::RecordAccessArgs;
use pipl_cli::jobs::{PruneArgs, RunJobsArgs, StepArgs, StepKind, SweepArgs, EXIT_REJECTED};
use pipl_cli::status::StatusArgs;
use pipl_cli::users::{UserArgs, UserCommand};
use pipl_cli::world::World;
use pipl_cli::{dispatch, Command, Session};
use pipl_core::{Clock, ManualClock, PiplConfig, Plan, AccessLevel, UserId};
use pipl_enforcement::{Actor, JobStatus};
use pipl_state::SubjectState;
use pipl_ledger::ComplianceStore;

const USER: i64 = 21;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 5, 10, 0, 0).unwrap()
}

fn config() -> PiplConfig {
    PiplConfig {
        compliance_available: true,
        enforcement_enabled: true,
        ..PiplConfig::default()
    }
}

/// Load the state file at `at`, run one command, save.
async fn run_at(path: &Path, at: DateTime<Utc>, command: Command) -> u8 {
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(at));
    let world = World::load(path, clock).unwrap();
    let session = Session::new(
        &world,
        Arc::clone(&world.store),
        config(),
        Actor::compliance_bot(UserId::new(1)),
    )
    .unwrap();
    let code = dispatch(&command, &world, &session).await.unwrap();
    world.save(path).unwrap();
    code
}

fn load(path: &Path, at: DateTime<Utc>) -> World {
    World::load(path, Arc::new(ManualClock::new(at))).unwrap()
}

fn add_user() -> Command {
    Command::User(UserArgs {
        command: UserCommand::Add {
            id: USER,
            username: "jun".into(),
            email: "jun@example.cn".into(),
        },
    })
}

fn access(country: &str) -> Command {
    Command::RecordAccess(RecordAccessArgs {
        user: Some(USER),
        country: Some(country.into()),
    })
}

fn run_jobs() -> Command {
    Command::RunJobs(RunJobsArgs { max_rounds: 16 })
}

async fn qualify(path: &Path) -> DateTime<Utc> {
    run_at(path, t0(), add_user()).await;
    let mut at = t0();
    for _ in 0..5 {
        at += Duration::days(1);
        assert_eq!(run_at(path, at, access("CN")).await, 0);
    }
    at
}

#[tokio::test]
async fn state_survives_between_invocations() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let at = qualify(&path).await;

    let world = load(&path, at);
    assert_eq!(world.store.snapshot().access_records.len(), 1);
    let subject = world
        .store
        .find_subject(UserId::new(USER))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(subject.state, SubjectState::Tracking);
    assert_eq!(world.queue.pending().len(), 1);

    assert_eq!(run_at(&path, at, run_jobs()).await, 0);
    let world = load(&path, at);
    assert_eq!(world.notifier.sent().len(), 1);
    let subject = world
        .store
        .find_subject(UserId::new(USER))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(subject.state, SubjectState::Notified);
    assert_eq!(subject.initial_email_sent_at, Some(at));
}

#[tokio::test]
async fn step_exit_codes_follow_the_response() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let at = qualify(&path).await;
    run_at(&path, at, run_jobs()).await;

    let block = |user| {
        Command::Step(StepArgs {
            step: StepKind::Block,
            user,
        })
    };
    assert_eq!(run_at(&path, at + Duration::days(30), block(USER)).await, EXIT_REJECTED);
    assert_eq!(run_at(&path, at + Duration::days(61), block(USER)).await, 0);

    let world = load(&path, at);
    let entry = world.directory.entry(UserId::new(USER)).unwrap();
    assert!(entry.account.is_blocked());
}

#[tokio::test]
async fn paid_user_leaves_the_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let at = qualify(&path).await;
    run_at(&path, at, run_jobs()).await;

    let join = Command::User(UserArgs {
        command: UserCommand::Join {
            id: USER,
            namespace: 300,
            plan: Plan::Ultimate,
            access_level: AccessLevel::Maintainer,
            inherited: false,
        },
    });
    run_at(&path, at, join).await;

    let later = at + Duration::days(61);
    assert_eq!(run_at(&path, later, Command::Sweep(SweepArgs { run: true })).await, 0);

    let world = load(&path, later);
    assert!(!world.directory.entry(UserId::new(USER)).unwrap().account.is_blocked());
    let subject = world
        .store
        .find_subject(UserId::new(USER))
        .await
        .unwrap()
        .unwrap();
    assert!(subject.exempted_at.is_some());
    assert!(subject.initial_email_sent_at.is_none());
}

#[tokio::test]
async fn uncovered_access_resets_evidence() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let at = qualify(&path).await;
    run_at(&path, at + Duration::days(1), access("US")).await;

    let world = load(&path, at);
    let records = world.store.snapshot().access_records;
    assert!(records.iter().all(|r| r.access_count == 0));
    let subject = world
        .store
        .find_subject(UserId::new(USER))
        .await
        .unwrap()
        .unwrap();
    assert!(!subject.is_tracked());
}

#[tokio::test]
async fn status_runs_for_user_and_overview() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let at = qualify(&path).await;

    let one = Command::Status(StatusArgs { user: Some(USER) });
    assert_eq!(run_at(&path, at, one).await, 0);
    let all = Command::Status(StatusArgs { user: None });
    assert_eq!(run_at(&path, at, all).await, 0);
}

#[tokio::test]
async fn prune_jobs_drops_old_dead_letters() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let at = qualify(&path).await;

    let world = load(&path, at);
    let due = world.queue.take_due(at);
    assert_eq!(due.len(), 1);
    assert!(world.queue.fail(due[0].job_id, "mailer down".into()));
    world.save(&path).unwrap();

    let prune = |days| Command::PruneJobs(PruneArgs { older_than_days: days });
    let later = at + Duration::days(10);
    assert_eq!(run_at(&path, later, prune(None)).await, 0);
    assert_eq!(load(&path, later).queue.with_status(JobStatus::Failed).len(), 1);

    assert_eq!(run_at(&path, later, prune(Some(7))).await, 0);
    assert!(load(&path, later).queue.with_status(JobStatus::Failed).is_empty());
}
