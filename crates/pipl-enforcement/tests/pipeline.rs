//! End-to-end pipeline behaviour over in-memory collaborators.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};

use pipl_core::{
    AccessLevel, Clock, ManualClock, Membership, NamespaceId, NoticeKind, OwnedProject, PiplConfig,
    PiplError, Plan, PolicyContext, ProjectId, UserId, Visibility,
};
use pipl_enforcement::{
    Actor, DirectoryEntry, EnforcementPipeline, ErrorReason, InMemoryDirectory, InMemoryJobQueue,
    RecordingNotifier, ServiceResponse,
};
use pipl_ledger::{ComplianceStore, MemoryStore};
use pipl_state::SubjectState;

type Pipeline = EnforcementPipeline<MemoryStore, InMemoryDirectory, RecordingNotifier, InMemoryJobQueue>;

const USER: UserId = UserId::new(42);
const BOT: UserId = UserId::new(1);

struct World {
    clock: Arc<ManualClock>,
    store: Arc<MemoryStore>,
    directory: Arc<InMemoryDirectory>,
    notifier: Arc<RecordingNotifier>,
    pipeline: Pipeline,
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 2, 9, 0, 0).unwrap()
}

fn ctx() -> PolicyContext {
    let cfg = PiplConfig {
        compliance_available: true,
        enforcement_enabled: true,
        ..PiplConfig::default()
    };
    PolicyContext::from_config(&cfg).unwrap()
}

fn world() -> World {
    let clock = Arc::new(ManualClock::new(t0()));
    let store = Arc::new(MemoryStore::new());
    let directory = Arc::new(InMemoryDirectory::new());
    directory.upsert(DirectoryEntry::active(USER, "wei", "wei@example.cn"));
    let notifier = Arc::new(RecordingNotifier::new());
    let queue = Arc::new(InMemoryJobQueue::new(Arc::clone(&clock) as Arc<dyn Clock>));
    let pipeline = EnforcementPipeline::new(
        Arc::clone(&store),
        Arc::clone(&directory),
        Arc::clone(&notifier),
        queue,
        Arc::clone(&clock) as Arc<dyn Clock>,
    );
    World {
        clock,
        store,
        directory,
        notifier,
        pipeline,
    }
}

fn bot() -> Actor {
    Actor::compliance_bot(BOT)
}

fn reason(response: &ServiceResponse) -> Option<ErrorReason> {
    response.reason()
}

/// Five covered accesses on five consecutive days.
async fn qualify(w: &World, ctx: &PolicyContext) {
    for _ in 0..5 {
        w.clock.advance(Duration::days(1));
        w.pipeline
            .ledger()
            .record_access(ctx, Some(USER), Some("CN"))
            .await
            .unwrap();
    }
    assert!(w.store.find_subject(USER).await.unwrap().is_some());
}

/// Qualify and send the initial notice. Returns the stamp.
async fn notified(w: &World, ctx: &PolicyContext) -> DateTime<Utc> {
    qualify(w, ctx).await;
    let response = w.pipeline.send_initial_notice(ctx, USER).await.unwrap();
    assert!(response.is_success(), "{response:?}");
    w.store
        .find_subject(USER)
        .await
        .unwrap()
        .and_then(|s| s.initial_email_sent_at)
        .unwrap()
}

async fn state(w: &World) -> SubjectState {
    w.store.find_subject(USER).await.unwrap().unwrap().state
}

fn paid_membership(level: AccessLevel, plan: Plan) -> Membership {
    Membership {
        namespace_id: NamespaceId::new(900),
        access_level: level,
        plan,
        inherited: false,
    }
}

// ─── Notices ─────────────────────────────────────────────────────────

#[tokio::test]
async fn initial_notice_is_sent_once() {
    let w = world();
    let ctx = ctx();
    qualify(&w, &ctx).await;

    let evaluated = w.pipeline.evaluate_subject(&ctx, USER).await.unwrap();
    assert!(evaluated.is_success());

    let first = w.pipeline.send_initial_notice(&ctx, USER).await.unwrap();
    assert!(first.is_success());
    let stamp = w.store.find_subject(USER).await.unwrap().unwrap().initial_email_sent_at;
    assert_eq!(stamp, Some(w.clock.now()));

    w.clock.advance(Duration::hours(3));
    let second = w.pipeline.send_initial_notice(&ctx, USER).await.unwrap();
    assert_eq!(reason(&second), Some(ErrorReason::AlreadyProcessed));

    let subject = w.store.find_subject(USER).await.unwrap().unwrap();
    assert_eq!(subject.initial_email_sent_at, stamp);
    assert_eq!(subject.state, SubjectState::Notified);
    assert_eq!(w.notifier.sent_to(USER).len(), 1);

    let again = w.pipeline.evaluate_subject(&ctx, USER).await.unwrap();
    assert_eq!(reason(&again), Some(ErrorReason::AlreadyProcessed));
}

#[tokio::test]
async fn notice_carries_deadline_and_reminder_keeps_it() {
    let w = world();
    let ctx = ctx();
    let stamp = notified(&w, &ctx).await;

    let expected = (stamp + Duration::days(60)).date_naive();
    let initial = &w.notifier.sent_to(USER)[0];
    assert_eq!(initial.kind, NoticeKind::Initial);
    assert_eq!(initial.deadline, expected);

    w.clock.advance(Duration::days(14));
    let reminded = w.pipeline.send_reminder(&ctx, USER).await.unwrap();
    assert!(reminded.is_success());
    assert!(reminded.message().unwrap().contains("46 days"));

    let sent = w.notifier.sent_to(USER);
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1].kind, NoticeKind::Reminder);
    assert_eq!(sent[1].deadline, expected);

    let subject = w.store.find_subject(USER).await.unwrap().unwrap();
    assert_eq!(subject.initial_email_sent_at, Some(stamp));
}

#[tokio::test]
async fn reminder_before_notice_is_invalid() {
    let w = world();
    let ctx = ctx();
    qualify(&w, &ctx).await;
    let response = w.pipeline.send_reminder(&ctx, USER).await.unwrap();
    assert_eq!(reason(&response), Some(ErrorReason::InvalidState));
    assert!(w.notifier.sent().is_empty());
}

#[tokio::test]
async fn mailer_failure_clears_stamp_for_retry() {
    let w = world();
    let ctx = ctx();
    qualify(&w, &ctx).await;

    w.notifier.fail_next(1);
    let err = w.pipeline.send_initial_notice(&ctx, USER).await.unwrap_err();
    assert!(matches!(err, PiplError::Queue(_)));
    assert!(err.is_retryable());

    let subject = w.store.find_subject(USER).await.unwrap().unwrap();
    assert_eq!(subject.state, SubjectState::Tracking);
    assert!(subject.initial_email_sent_at.is_none());

    let retried = w.pipeline.send_initial_notice(&ctx, USER).await.unwrap();
    assert!(retried.is_success());
    assert_eq!(w.notifier.sent_to(USER).len(), 1);
}

// ─── Gates ───────────────────────────────────────────────────────────

#[tokio::test]
async fn gates_checked_before_anything_else() {
    let w = world();
    let mut ctx = ctx();
    qualify(&w, &ctx).await;

    ctx.enforcement_enabled = false;
    let disabled = w.pipeline.send_initial_notice(&ctx, USER).await.unwrap();
    assert_eq!(reason(&disabled), Some(ErrorReason::FeatureDisabled));

    ctx.compliance_available = false;
    let unavailable = w.pipeline.block_user(&ctx, &bot(), USER).await.unwrap();
    assert_eq!(reason(&unavailable), Some(ErrorReason::FeatureUnavailable));
    assert!(w.notifier.sent().is_empty());
}

#[tokio::test]
async fn block_requires_permission() {
    let w = world();
    let ctx = ctx();
    notified(&w, &ctx).await;
    w.clock.advance(Duration::days(61));

    let intern = Actor::new(UserId::new(5), "intern");
    let response = w.pipeline.block_user(&ctx, &intern, USER).await.unwrap();
    assert_eq!(reason(&response), Some(ErrorReason::Unauthorized));
    assert!(response.message().unwrap().contains("intern"));
    assert_eq!(state(&w).await, SubjectState::Notified);
}

#[tokio::test]
async fn unknown_user_is_not_found() {
    let w = world();
    let ctx = ctx();
    let response = w
        .pipeline
        .block_user(&ctx, &bot(), UserId::new(404))
        .await
        .unwrap();
    assert_eq!(reason(&response), Some(ErrorReason::NotFound));
}

// ─── Block ───────────────────────────────────────────────────────────

#[tokio::test]
async fn block_waits_for_notice_period() {
    let w = world();
    let ctx = ctx();
    notified(&w, &ctx).await;

    w.clock.advance(Duration::days(59));
    let early = w.pipeline.block_user(&ctx, &bot(), USER).await.unwrap();
    assert_eq!(reason(&early), Some(ErrorReason::ThresholdNotMet));
    assert!(early.message().unwrap().contains("42"));
    assert!(!w.directory.entry(USER).unwrap().account.is_blocked());

    w.clock.advance(Duration::days(2));
    let blocked = w.pipeline.block_user(&ctx, &bot(), USER).await.unwrap();
    assert!(blocked.is_success(), "{blocked:?}");

    let entry = w.directory.entry(USER).unwrap();
    assert!(entry.account.is_blocked());
    assert_eq!(entry.admin_notes.len(), 1);
    assert!(entry.admin_notes[0].contains("60-day"));
    assert_eq!(state(&w).await, SubjectState::Blocked);

    let again = w.pipeline.block_user(&ctx, &bot(), USER).await.unwrap();
    assert_eq!(reason(&again), Some(ErrorReason::AlreadyProcessed));
}

#[tokio::test]
async fn block_without_notice_is_refused() {
    let w = world();
    let ctx = ctx();
    qualify(&w, &ctx).await;
    w.clock.advance(Duration::days(90));

    let response = w.pipeline.block_user(&ctx, &bot(), USER).await.unwrap();
    assert_eq!(reason(&response), Some(ErrorReason::ThresholdNotMet));
    assert!(!w.directory.entry(USER).unwrap().account.is_blocked());
}

#[tokio::test]
async fn block_refusal_is_surfaced_not_retried() {
    let w = world();
    let ctx = ctx();
    notified(&w, &ctx).await;
    w.clock.advance(Duration::days(61));

    w.directory
        .refuse_actions(Some("cannot block the last owner".into()));
    let response = w.pipeline.block_user(&ctx, &bot(), USER).await.unwrap();
    assert_eq!(reason(&response), Some(ErrorReason::UpstreamActionFailed));
    assert_eq!(response.message(), Some("cannot block the last owner"));
    assert_eq!(state(&w).await, SubjectState::Notified);

    // Repeated refusals leave no notes behind; the eventual block writes one.
    w.pipeline.block_user(&ctx, &bot(), USER).await.unwrap();
    assert!(w.directory.entry(USER).unwrap().admin_notes.is_empty());
    w.directory.refuse_actions(None);
    let blocked = w.pipeline.block_user(&ctx, &bot(), USER).await.unwrap();
    assert!(blocked.is_success(), "{blocked:?}");
    assert_eq!(w.directory.entry(USER).unwrap().admin_notes.len(), 1);
}

// ─── Exemption ───────────────────────────────────────────────────────

#[tokio::test]
async fn exemption_interrupts_timeline() {
    let w = world();
    let ctx = ctx();
    let first_stamp = notified(&w, &ctx).await;

    w.clock.advance(Duration::days(10));
    w.directory
        .set_memberships(USER, vec![paid_membership(AccessLevel::Developer, Plan::Premium)]);

    let reminder = w.pipeline.send_reminder(&ctx, USER).await.unwrap();
    assert_eq!(reason(&reminder), Some(ErrorReason::PaidUser));
    assert_eq!(w.notifier.sent_to(USER).len(), 1);

    w.clock.advance(Duration::days(55));
    let block = w.pipeline.block_user(&ctx, &bot(), USER).await.unwrap();
    assert_eq!(reason(&block), Some(ErrorReason::PaidUser));
    assert!(!w.directory.entry(USER).unwrap().account.is_blocked());

    let check = w.pipeline.check_paid_status(&ctx, USER).await.unwrap();
    assert!(check.is_success());
    let subject = w.store.find_subject(USER).await.unwrap().unwrap();
    assert!(subject.exempted_at.is_some());
    assert!(subject.initial_email_sent_at.is_none());
    assert!(!subject.is_tracked());
    assert!(w.pipeline.ledger().evidence_reset(USER).await.unwrap());

    // Leaving the paid namespace restarts from scratch.
    w.directory.set_memberships(USER, Vec::new());
    w.pipeline.check_paid_status(&ctx, USER).await.unwrap();
    let subject = w.store.find_subject(USER).await.unwrap().unwrap();
    assert!(subject.exempted_at.is_none());
    assert!(subject.initial_email_sent_at.is_none());

    let block = w.pipeline.block_user(&ctx, &bot(), USER).await.unwrap();
    assert_eq!(reason(&block), Some(ErrorReason::ThresholdNotMet));

    qualify(&w, &ctx).await;
    let fresh = w.pipeline.send_initial_notice(&ctx, USER).await.unwrap();
    assert!(fresh.is_success());
    let second_stamp = w
        .store
        .find_subject(USER)
        .await
        .unwrap()
        .unwrap()
        .initial_email_sent_at
        .unwrap();
    assert!(second_stamp > first_stamp);
    assert_eq!(second_stamp, w.clock.now());
}

#[tokio::test]
async fn minimal_access_membership_does_not_exempt() {
    let w = world();
    let ctx = ctx();
    notified(&w, &ctx).await;
    w.directory.set_memberships(
        USER,
        vec![paid_membership(AccessLevel::MinimalAccess, Plan::Ultimate)],
    );
    w.clock.advance(Duration::days(61));

    let response = w.pipeline.block_user(&ctx, &bot(), USER).await.unwrap();
    assert!(response.is_success(), "{response:?}");
}

#[tokio::test]
async fn unbilled_guest_does_not_exempt_but_billed_guest_does() {
    let w = world();
    let ctx = ctx();
    notified(&w, &ctx).await;
    w.clock.advance(Duration::days(61));

    w.directory
        .set_memberships(USER, vec![paid_membership(AccessLevel::Guest, Plan::Premium)]);
    let billed = w.pipeline.block_user(&ctx, &bot(), USER).await.unwrap();
    assert_eq!(reason(&billed), Some(ErrorReason::PaidUser));

    w.directory
        .set_memberships(USER, vec![paid_membership(AccessLevel::Guest, Plan::Ultimate)]);
    let unbilled = w.pipeline.block_user(&ctx, &bot(), USER).await.unwrap();
    assert!(unbilled.is_success(), "{unbilled:?}");
}

// ─── Delete ──────────────────────────────────────────────────────────

async fn blocked(w: &World, ctx: &PolicyContext) {
    notified(w, ctx).await;
    w.clock.advance(Duration::days(61));
    let response = w.pipeline.block_user(ctx, &bot(), USER).await.unwrap();
    assert!(response.is_success(), "{response:?}");
}

fn project(path: &str, visibility: Visibility, archived: bool, commits: u64) -> OwnedProject {
    OwnedProject {
        id: ProjectId::new(77),
        path: path.into(),
        visibility,
        archived,
        commit_count: commits,
    }
}

#[tokio::test]
async fn deletion_enqueues_soft_delete() {
    let w = world();
    let ctx = ctx();
    blocked(&w, &ctx).await;
    w.directory
        .add_project(USER, project("wei/private", Visibility::Private, false, 500));

    w.clock.advance(Duration::days(30));
    let early = w.pipeline.delete_user(&ctx, &bot(), USER).await.unwrap();
    assert_eq!(reason(&early), Some(ErrorReason::ThresholdNotMet));

    w.clock.advance(Duration::days(30));
    let response = w.pipeline.delete_user(&ctx, &bot(), USER).await.unwrap();
    assert!(response.is_success(), "{response:?}");

    let requests = w.directory.deletion_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].user_id, USER);
    assert_eq!(requests[0].deleted_by, BOT);
    assert!(!requests[0].hard_delete);
    assert!(requests[0].skip_authorization);
    assert_eq!(state(&w).await, SubjectState::DeletionScheduled);

    let again = w.pipeline.delete_user(&ctx, &bot(), USER).await.unwrap();
    assert_eq!(reason(&again), Some(ErrorReason::AlreadyProcessed));
    assert_eq!(w.directory.deletion_requests().len(), 1);
}

#[tokio::test]
async fn deletion_deferred_for_active_public_project() {
    let w = world();
    let ctx = ctx();
    blocked(&w, &ctx).await;
    w.directory
        .add_project(USER, project("wei/dotfiles", Visibility::Public, false, 6));
    w.clock.advance(Duration::days(60));

    let response = w.pipeline.delete_user(&ctx, &bot(), USER).await.unwrap();
    assert_eq!(reason(&response), Some(ErrorReason::DeferredForReview));
    assert!(response.message().unwrap().contains("wei/dotfiles"));
    assert_eq!(state(&w).await, SubjectState::DeletionNeedsReview);
    assert!(w.directory.deletion_requests().is_empty());

    let again = w.pipeline.delete_user(&ctx, &bot(), USER).await.unwrap();
    assert_eq!(reason(&again), Some(ErrorReason::DeferredForReview));
    assert!(w.directory.deletion_requests().is_empty());

    let reviewer = Actor::new(UserId::new(2), "reviewer")
        .with_permission(pipl_enforcement::Permission::DeleteUser);
    let approved = w.pipeline.approve_deletion(&ctx, &reviewer, USER).await.unwrap();
    assert!(approved.is_success(), "{approved:?}");
    assert_eq!(w.directory.deletion_requests()[0].deleted_by, UserId::new(2));
    assert_eq!(state(&w).await, SubjectState::DeletionScheduled);
}

#[tokio::test]
async fn archived_or_small_public_projects_do_not_defer() {
    let w = world();
    let ctx = ctx();
    blocked(&w, &ctx).await;
    w.directory
        .add_project(USER, project("wei/old", Visibility::Public, true, 900));
    w.directory
        .add_project(USER, project("wei/tiny", Visibility::Public, false, 5));
    w.clock.advance(Duration::days(60));

    let response = w.pipeline.delete_user(&ctx, &bot(), USER).await.unwrap();
    assert!(response.is_success(), "{response:?}");
}

#[tokio::test]
async fn deletion_requires_block() {
    let w = world();
    let ctx = ctx();
    notified(&w, &ctx).await;
    w.clock.advance(Duration::days(121));

    let response = w.pipeline.delete_user(&ctx, &bot(), USER).await.unwrap();
    assert_eq!(reason(&response), Some(ErrorReason::InvalidState));
    assert!(w.directory.deletion_requests().is_empty());
}

#[tokio::test]
async fn approve_requires_pending_review() {
    let w = world();
    let ctx = ctx();
    blocked(&w, &ctx).await;
    let response = w.pipeline.approve_deletion(&ctx, &bot(), USER).await.unwrap();
    assert_eq!(reason(&response), Some(ErrorReason::InvalidState));
}

// ─── Exemption after block ───────────────────────────────────────────

#[tokio::test]
async fn paid_round_trip_after_block_restarts_timeline() {
    let w = world();
    let ctx = ctx();
    blocked(&w, &ctx).await;
    let first_stamp = w
        .store
        .find_subject(USER)
        .await
        .unwrap()
        .unwrap()
        .initial_email_sent_at
        .unwrap();

    w.directory
        .set_memberships(USER, vec![paid_membership(AccessLevel::Developer, Plan::Premium)]);
    let joined = w.pipeline.check_paid_status(&ctx, USER).await.unwrap();
    assert!(joined.is_success(), "{joined:?}");
    assert!(joined.message().unwrap().contains("block lifted"));

    let subject = w.store.find_subject(USER).await.unwrap().unwrap();
    assert_eq!(subject.state, SubjectState::Tracking);
    assert!(subject.initial_email_sent_at.is_none());
    assert!(subject.exempted_at.is_some());
    let last = subject.transitions.last().unwrap();
    assert_eq!(last.from_state, SubjectState::Blocked);
    assert_eq!(last.to_state, SubjectState::Tracking);

    let entry = w.directory.entry(USER).unwrap();
    assert!(!entry.account.is_blocked());
    assert_eq!(entry.admin_notes.len(), 2);
    assert!(entry.admin_notes[1].contains("lifted"));

    // Sixty paid days later the user leaves; the old stamp is gone.
    w.clock.advance(Duration::days(60));
    w.directory.set_memberships(USER, Vec::new());
    let left = w.pipeline.check_paid_status(&ctx, USER).await.unwrap();
    assert!(left.is_success(), "{left:?}");
    let subject = w.store.find_subject(USER).await.unwrap().unwrap();
    assert_eq!(subject.state, SubjectState::Tracking);
    assert!(subject.exempted_at.is_none());
    assert!(subject.initial_email_sent_at.is_none());

    let delete = w.pipeline.delete_user(&ctx, &bot(), USER).await.unwrap();
    assert_eq!(reason(&delete), Some(ErrorReason::ThresholdNotMet));
    let block = w.pipeline.block_user(&ctx, &bot(), USER).await.unwrap();
    assert_eq!(reason(&block), Some(ErrorReason::ThresholdNotMet));
    assert!(w.directory.deletion_requests().is_empty());
    assert_eq!(state(&w).await, SubjectState::Tracking);

    // A new notice starts a new period.
    qualify(&w, &ctx).await;
    let fresh = w.pipeline.send_initial_notice(&ctx, USER).await.unwrap();
    assert!(fresh.is_success(), "{fresh:?}");
    let second_stamp = w
        .store
        .find_subject(USER)
        .await
        .unwrap()
        .unwrap()
        .initial_email_sent_at
        .unwrap();
    assert!(second_stamp > first_stamp + Duration::days(60));
}

#[tokio::test]
async fn exemption_during_review_lifts_block_and_closes_review() {
    let w = world();
    let ctx = ctx();
    blocked(&w, &ctx).await;
    w.directory
        .add_project(USER, project("wei/dotfiles", Visibility::Public, false, 40));
    w.clock.advance(Duration::days(60));
    let deferred = w.pipeline.delete_user(&ctx, &bot(), USER).await.unwrap();
    assert_eq!(reason(&deferred), Some(ErrorReason::DeferredForReview));

    w.directory
        .set_memberships(USER, vec![paid_membership(AccessLevel::Owner, Plan::Ultimate)]);
    let check = w.pipeline.check_paid_status(&ctx, USER).await.unwrap();
    assert!(check.is_success(), "{check:?}");
    assert!(!w.directory.entry(USER).unwrap().account.is_blocked());
    let subject = w.store.find_subject(USER).await.unwrap().unwrap();
    assert_eq!(subject.state, SubjectState::Tracking);
    assert!(subject.initial_email_sent_at.is_none());

    let reviewer = Actor::new(UserId::new(2), "reviewer")
        .with_permission(pipl_enforcement::Permission::DeleteUser);
    let paid = w.pipeline.approve_deletion(&ctx, &reviewer, USER).await.unwrap();
    assert_eq!(reason(&paid), Some(ErrorReason::PaidUser));

    w.directory.set_memberships(USER, Vec::new());
    w.pipeline.check_paid_status(&ctx, USER).await.unwrap();
    let stale = w.pipeline.approve_deletion(&ctx, &reviewer, USER).await.unwrap();
    assert_eq!(reason(&stale), Some(ErrorReason::InvalidState));
    assert!(w.directory.deletion_requests().is_empty());
}

#[tokio::test]
async fn review_is_released_only_by_approval() {
    let w = world();
    let ctx = ctx();
    blocked(&w, &ctx).await;
    w.directory
        .add_project(USER, project("wei/dotfiles", Visibility::Public, false, 12));
    w.clock.advance(Duration::days(60));
    let deferred = w.pipeline.delete_user(&ctx, &bot(), USER).await.unwrap();
    assert_eq!(reason(&deferred), Some(ErrorReason::DeferredForReview));

    // The project no longer qualifies, but the case stays with the reviewer.
    let mut entry = w.directory.entry(USER).unwrap();
    entry.projects[0].archived = true;
    w.directory.upsert(entry);

    w.clock.advance(Duration::days(1));
    let rerun = w.pipeline.delete_user(&ctx, &bot(), USER).await.unwrap();
    assert_eq!(reason(&rerun), Some(ErrorReason::DeferredForReview));
    assert!(rerun.message().unwrap().contains("manual review"));
    assert_eq!(state(&w).await, SubjectState::DeletionNeedsReview);
    assert!(w.directory.deletion_requests().is_empty());
}
