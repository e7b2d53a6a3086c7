//! `pipl status`: classification of one user, or an overview of every
//! subject and the queue.

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Args;
use serde::Serialize;

use pipl_compliance::Classification;
use pipl_core::UserId;
use pipl_enforcement::JobStatus;
use pipl_ledger::ComplianceStore;
use pipl_state::{SubjectPhase, SubjectState};

use crate::{print_json, Session};

/// Arguments for `pipl status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Show one user in detail.
    #[arg(long)]
    pub user: Option<i64>,
}

/// Detailed view of one user.
#[derive(Debug, Serialize)]
pub struct UserStatus {
    #[serde(flatten)]
    pub classification: Classification,
    /// Whether the in-product banner is shown.
    pub show_compliance_alert: bool,
}

/// One line of the overview.
#[derive(Debug, Serialize)]
pub struct SubjectRow {
    pub user_id: UserId,
    pub state: SubjectState,
    pub phase: SubjectPhase,
    pub initial_email_sent_at: Option<DateTime<Utc>>,
    pub remaining_access_days: Option<i64>,
}

/// Overview of every subject and the queue.
#[derive(Debug, Serialize)]
pub struct Overview {
    pub subjects: Vec<SubjectRow>,
    pub pending_jobs: usize,
    pub failed_jobs: usize,
}

/// Execute `pipl status`.
pub async fn run_status<S: ComplianceStore>(args: &StatusArgs, session: &Session<S>) -> Result<u8> {
    let engine = &session.engine;
    let ctx = &session.ctx;

    if let Some(id) = args.user {
        let user_id = UserId::new(id);
        let classifier = engine.classifier();
        let status = UserStatus {
            classification: classifier.evaluate(ctx, user_id).await?,
            show_compliance_alert: classifier.show_compliance_alert(ctx, user_id).await?,
        };
        print_json(&status)?;
        return Ok(0);
    }

    let now = engine.ledger().now();
    let mut subjects = Vec::new();
    for user_id in engine.store().subject_ids().await? {
        let Some(subject) = engine.store().find_subject(user_id).await? else {
            continue;
        };
        subjects.push(SubjectRow {
            user_id,
            state: subject.state,
            phase: subject.phase(now, &ctx.thresholds),
            initial_email_sent_at: subject.initial_email_sent_at,
            remaining_access_days: subject.remaining_access_days(now, &ctx.thresholds),
        });
    }
    let queue = engine.queue();
    print_json(&Overview {
        subjects,
        pending_jobs: queue.with_status(JobStatus::Pending).len(),
        failed_jobs: queue.with_status(JobStatus::Failed).len(),
    })?;
    Ok(0)
}
