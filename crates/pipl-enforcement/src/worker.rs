//! # Worker
//!
//! Drains an [`InMemoryJobQueue`] into the pipeline. Business outcomes
//! (success or a structured error response) complete the job. Infrastructure
//! errors decide its fate:
//!
//! | Error                         | Action                                  |
//! |-------------------------------|-----------------------------------------|
//! | `LeaseUnavailable`            | reschedule after `reschedule_after_secs` |
//! | retryable, attempts remaining | retry after linear backoff              |
//! | anything else                 | fail, kept as a dead letter             |
//!
//! A completed sweep schedules the next one after `sweep_interval_secs`.
//! Each round ends by pruning dead letters older than
//! `dead_letter_retention_days`.

use std::sync::Arc;

use chrono::Duration;
use serde::Serialize;

use pipl_core::{
    Job, NotificationSender, PiplError, PolicyContext, UserDirectory, WorkerConfig,
};
use pipl_ledger::ComplianceStore;

use crate::guard::Actor;
use crate::pipeline::EnforcementPipeline;
use crate::queue::{InMemoryJobQueue, QueuedJob};

/// Counts from one or more worker rounds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerReport {
    /// Jobs handed to the pipeline.
    pub executed: usize,
    /// Steps that returned success.
    pub succeeded: usize,
    /// Steps that returned a structured error response.
    pub rejected: usize,
    /// Jobs put back after a retryable failure.
    pub retried: usize,
    /// Jobs given up on.
    pub dropped: usize,
    /// Jobs that could not start and were pushed back.
    pub rescheduled: usize,
    /// Dead letters removed after the retention window.
    pub pruned: usize,
}

impl WorkerReport {
    fn absorb(&mut self, other: WorkerReport) {
        self.executed += other.executed;
        self.succeeded += other.succeeded;
        self.rejected += other.rejected;
        self.retried += other.retried;
        self.dropped += other.dropped;
        self.rescheduled += other.rescheduled;
        self.pruned += other.pruned;
    }
}

/// Runs due jobs against a pipeline as one actor under one policy.
pub struct Worker<S, D, N> {
    pipeline: Arc<EnforcementPipeline<S, D, N, InMemoryJobQueue>>,
    ctx: PolicyContext,
    actor: Actor,
    config: WorkerConfig,
}

impl<S, D, N> Worker<S, D, N>
where
    S: ComplianceStore,
    D: UserDirectory,
    N: NotificationSender,
{
    /// A worker for `pipeline`.
    pub fn new(
        pipeline: Arc<EnforcementPipeline<S, D, N, InMemoryJobQueue>>,
        ctx: PolicyContext,
        actor: Actor,
        config: WorkerConfig,
    ) -> Self {
        Self {
            pipeline,
            ctx,
            actor,
            config,
        }
    }

    /// The queue being drained.
    pub fn queue(&self) -> &Arc<InMemoryJobQueue> {
        self.pipeline.queue()
    }

    /// Seed the periodic sweep unless one is already pending.
    /// Returns whether a sweep was enqueued.
    pub fn start(&self) -> bool {
        if self.queue().has_pending(&Job::Sweep) {
            return false;
        }
        self.queue().schedule_at(Job::Sweep, self.pipeline.now());
        true
    }

    /// Run every job due now, once.
    pub async fn run_due(&self) -> WorkerReport {
        let now = self.pipeline.now();
        let due = self.queue().take_due(now);
        let mut report = WorkerReport::default();
        for entry in due {
            self.run_entry(entry, &mut report).await;
        }
        report.pruned = self.prune_dead_letters();
        report
    }

    /// Repeat [`Worker::run_due`] until a round runs nothing or
    /// `max_rounds` is reached.
    pub async fn run_until_idle(&self, max_rounds: usize) -> WorkerReport {
        let mut total = WorkerReport::default();
        for _ in 0..max_rounds {
            let round = self.run_due().await;
            total.absorb(round);
            if round.executed == 0 {
                break;
            }
        }
        total
    }

    /// Drain the queue every `sweep_interval_secs` of wall time.
    ///
    /// Runs `ticks` rounds, or forever when `None`.
    pub async fn run_periodic(&self, ticks: Option<u64>) -> WorkerReport {
        let period = std::time::Duration::from_secs(self.config.sweep_interval_secs.max(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        self.start();

        let mut total = WorkerReport::default();
        let mut done = 0u64;
        loop {
            if ticks.is_some_and(|limit| done >= limit) {
                break;
            }
            interval.tick().await;
            let round = self.run_until_idle(64).await;
            tracing::info!(
                executed = round.executed,
                succeeded = round.succeeded,
                rejected = round.rejected,
                retried = round.retried,
                dropped = round.dropped,
                "worker tick"
            );
            total.absorb(round);
            done += 1;
        }
        total
    }

    /// Drop dead letters older than the retention window.
    pub fn prune_dead_letters(&self) -> usize {
        let cutoff = self.pipeline.now() - self.config.dead_letter_retention();
        self.queue().prune_failed(cutoff)
    }

    async fn run_entry(&self, entry: QueuedJob, report: &mut WorkerReport) {
        report.executed += 1;
        let job_id = entry.job_id;
        let job = &entry.job;
        let result = self.pipeline.run_job(&self.ctx, &self.actor, job).await;
        let now = self.pipeline.now();

        match result {
            Ok(response) => {
                self.queue().complete(job_id);
                if response.is_success() {
                    report.succeeded += 1;
                } else {
                    report.rejected += 1;
                }
                if *job == Job::Sweep {
                    let next = now + self.config.sweep_interval();
                    self.queue().schedule_at(Job::Sweep, next);
                }
            }
            Err(err @ PiplError::LeaseUnavailable { .. }) => {
                let run_at = now + Duration::seconds(self.config.lease.reschedule_after_secs);
                tracing::warn!(job = %job, error = %err, %run_at, "lease busy, job rescheduled");
                self.queue().reschedule(job_id, run_at, err.to_string());
                report.rescheduled += 1;
            }
            Err(err) if err.is_retryable() && entry.attempts < self.config.retry.max_attempts => {
                let run_at = now + self.config.retry.backoff_for(entry.attempts);
                tracing::warn!(job = %job, attempt = entry.attempts, error = %err, %run_at, "job failed, retrying");
                metrics::counter!("pipl_jobs_retried_total", "job" => job.kind()).increment(1);
                self.queue().retry(job_id, run_at, err.to_string());
                report.retried += 1;
            }
            Err(err) => {
                tracing::error!(job = %job, attempts = entry.attempts, error = %err, "job dropped");
                metrics::counter!("pipl_jobs_dropped_total", "job" => job.kind()).increment(1);
                self.queue().fail(job_id, err.to_string());
                report.dropped += 1;
            }
        }
    }
}
