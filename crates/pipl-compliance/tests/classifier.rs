//! Classifier decisions over a real ledger and an in-memory store.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;

use pipl_compliance::{ComplianceClassifier, ExemptionOracle};
use pipl_core::{
    Clock, Job, JobQueue, ManualClock, PiplConfig, PiplError, PolicyContext, UserId,
};
use pipl_ledger::{AccessLedger, ComplianceStore, MemoryStore};
use pipl_state::SubjectPhase;

#[derive(Debug, Default)]
struct PaidSet(Mutex<BTreeSet<UserId>>);

impl PaidSet {
    fn set(&self, user: UserId, paid: bool) {
        let mut guard = self.0.lock();
        if paid {
            guard.insert(user);
        } else {
            guard.remove(&user);
        }
    }
}

impl ExemptionOracle for PaidSet {
    async fn is_exempt(&self, user_id: UserId) -> Result<bool, PiplError> {
        Ok(self.0.lock().contains(&user_id))
    }
}

#[derive(Debug, Default)]
struct NullQueue;

impl JobQueue for NullQueue {
    async fn enqueue(&self, _job: Job, _delay: Duration) -> Result<(), PiplError> {
        Ok(())
    }
}

const USER: UserId = UserId::new(7);

struct World {
    clock: Arc<ManualClock>,
    store: Arc<MemoryStore>,
    paid: Arc<PaidSet>,
    ledger: AccessLedger<MemoryStore, NullQueue>,
    classifier: ComplianceClassifier<MemoryStore, PaidSet>,
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 1, 8, 0, 0).unwrap()
}

fn world() -> World {
    let clock = Arc::new(ManualClock::new(t0()));
    let dyn_clock: Arc<dyn Clock> = Arc::clone(&clock) as Arc<dyn Clock>;
    let store = Arc::new(MemoryStore::new());
    let paid = Arc::new(PaidSet::default());
    World {
        ledger: AccessLedger::new(Arc::clone(&store), Arc::new(NullQueue), Arc::clone(&dyn_clock)),
        classifier: ComplianceClassifier::new(Arc::clone(&store), Arc::clone(&paid), dyn_clock),
        clock,
        store,
        paid,
    }
}

fn ctx() -> PolicyContext {
    PolicyContext::from_config(&PiplConfig {
        compliance_available: true,
        ..PiplConfig::default()
    })
    .unwrap()
}

async fn qualify(w: &World, c: &PolicyContext) {
    for _ in 0..5 {
        w.ledger.record_access(c, Some(USER), Some("CN")).await.unwrap();
        w.clock.advance(Duration::days(1));
    }
}

#[tokio::test]
async fn qualified_user_is_subject_until_reset() {
    let w = world();
    let c = ctx();
    assert!(!w.classifier.subject_to_regime(&c, USER).await.unwrap());

    qualify(&w, &c).await;
    assert!(w.classifier.subject_to_regime(&c, USER).await.unwrap());

    w.ledger.record_access(&c, Some(USER), Some("US")).await.unwrap();
    assert!(!w.classifier.subject_to_regime(&c, USER).await.unwrap());
    assert!(w.classifier.evidence_reset(USER).await.unwrap());
}

#[tokio::test]
async fn exemption_is_checked_on_every_call() {
    let w = world();
    let c = ctx();
    qualify(&w, &c).await;

    w.paid.set(USER, true);
    assert!(!w.classifier.subject_to_regime(&c, USER).await.unwrap());
    w.paid.set(USER, false);
    assert!(w.classifier.subject_to_regime(&c, USER).await.unwrap());
}

#[tokio::test]
async fn capability_flag_off_means_not_subject() {
    let w = world();
    let mut c = ctx();
    qualify(&w, &c).await;
    c.compliance_available = false;
    assert!(!w.classifier.subject_to_regime(&c, USER).await.unwrap());
}

#[tokio::test]
async fn thresholds_are_strict() {
    let w = world();
    let c = ctx();
    qualify(&w, &c).await;
    let sent = w.clock.now();
    w.store
        .update_subject(USER, move |s| s.mark_notified(sent).unwrap())
        .await
        .unwrap();
    let subject = w.store.find_subject(USER).await.unwrap().unwrap();

    w.clock.set(sent + Duration::days(60));
    assert!(!w.classifier.block_threshold_met(&c, &subject));
    w.clock.advance(Duration::seconds(1));
    assert!(w.classifier.block_threshold_met(&c, &subject));
    assert!(!w.classifier.deletion_threshold_met(&c, &subject));

    w.clock.set(sent + Duration::days(121));
    assert!(w.classifier.deletion_threshold_met(&c, &subject));
}

#[tokio::test]
async fn alert_shows_only_while_notified_and_enforced() {
    let w = world();
    let mut c = ctx();
    qualify(&w, &c).await;
    assert!(!w.classifier.show_compliance_alert(&c, USER).await.unwrap());

    let now = w.clock.now();
    w.store
        .update_subject(USER, move |s| s.mark_notified(now).unwrap())
        .await
        .unwrap();
    assert!(w.classifier.show_compliance_alert(&c, USER).await.unwrap());

    c.enforcement_enabled = false;
    assert!(!w.classifier.show_compliance_alert(&c, USER).await.unwrap());
    c.enforcement_enabled = true;

    w.paid.set(USER, true);
    assert!(!w.classifier.show_compliance_alert(&c, USER).await.unwrap());
}

#[tokio::test]
async fn evaluate_reports_phase_and_deadline() {
    let w = world();
    let c = ctx();
    qualify(&w, &c).await;
    let sent = w.clock.now();
    w.store
        .update_subject(USER, move |s| s.mark_notified(sent).unwrap())
        .await
        .unwrap();
    w.clock.advance(Duration::days(10));

    let report = w.classifier.evaluate(&c, USER).await.unwrap();
    assert!(report.subject_to_regime);
    assert_eq!(report.covered_access_total, 5);
    assert_eq!(report.phase, Some(SubjectPhase::Notified));
    assert_eq!(report.remaining_access_days, Some(50));
    assert_eq!(
        report.notice_deadline,
        Some((sent + Duration::days(60)).date_naive())
    );

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["phase"], "notified");
    assert_eq!(json["state"], "notified");
}
