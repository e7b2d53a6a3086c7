//! # In-Memory Job Queue
//!
//! A [`JobQueue`] that holds delayed jobs until they are due, for the CLI
//! and tests. Production deployments plug in their own queue behind the
//! same trait.
//!
//! ## Lifecycle
//!
//! ```text
//! enqueue ──▶ Pending ──take_due──▶ Running ──complete──▶ (removed)
//!               ▲                      │
//!               └──── retry/reschedule ┤
//!                                      └──fail──▶ Failed ──prune──▶ (removed)
//! ```
//!
//! Failed entries are dead letters. They stay for inspection until
//! [`InMemoryJobQueue::prune_failed`] drops those older than the retention
//! window.
//!
//! A job whose idempotency key matches a job that is still `Pending` is
//! merged into it: the earlier `run_at` wins. This only saves work. Every
//! step is safe to run twice.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use pipl_core::{Clock, Job, JobQueue, PiplError};

/// Lifecycle status of a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for `run_at`.
    Pending,
    /// Handed to a worker.
    Running,
    /// Gave up; kept for inspection.
    Failed,
}

/// A job plus its scheduling metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedJob {
    /// Unique id of this queue entry.
    pub job_id: Uuid,
    /// The work.
    pub job: Job,
    /// Current status.
    pub status: JobStatus,
    /// When the entry was created.
    pub enqueued_at: DateTime<Utc>,
    /// Earliest time the job may run.
    pub run_at: DateTime<Utc>,
    /// Attempts started so far.
    pub attempts: u32,
    /// [`Job::idempotency_key`] at enqueue time.
    pub dedup_key: String,
    /// Error from the last failed attempt.
    pub last_error: Option<String>,
    /// When the job was given up on.
    #[serde(default)]
    pub failed_at: Option<DateTime<Utc>>,
}

/// Serializable queue contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    /// Every entry, in enqueue order.
    #[serde(default)]
    pub jobs: Vec<QueuedJob>,
}

/// Delayed job queue held in memory.
#[derive(Debug, Clone)]
pub struct InMemoryJobQueue {
    clock: Arc<dyn Clock>,
    jobs: Arc<Mutex<Vec<QueuedJob>>>,
}

impl InMemoryJobQueue {
    /// Create an empty queue.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::from_snapshot(clock, QueueSnapshot::default())
    }

    /// Restore a queue. Entries left `Running` by a crashed worker become
    /// `Pending` again.
    pub fn from_snapshot(clock: Arc<dyn Clock>, snapshot: QueueSnapshot) -> Self {
        let jobs = snapshot
            .jobs
            .into_iter()
            .map(|mut j| {
                if j.status == JobStatus::Running {
                    j.status = JobStatus::Pending;
                }
                j
            })
            .collect();
        Self {
            clock,
            jobs: Arc::new(Mutex::new(jobs)),
        }
    }

    /// Copy out the contents.
    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            jobs: self.jobs.lock().clone(),
        }
    }

    /// Schedule `job` at an absolute time, merging with a pending
    /// duplicate. Returns the id of the entry that will run it.
    pub fn schedule_at(&self, job: Job, run_at: DateTime<Utc>) -> Uuid {
        let now = self.clock.now();
        let dedup_key = job.idempotency_key();
        let mut jobs = self.jobs.lock();

        if let Some(existing) = jobs
            .iter_mut()
            .find(|j| j.status == JobStatus::Pending && j.dedup_key == dedup_key)
        {
            if run_at < existing.run_at {
                existing.run_at = run_at;
            }
            tracing::trace!(job = %existing.job, job_id = %existing.job_id, "merged duplicate job");
            return existing.job_id;
        }

        let entry = QueuedJob {
            job_id: Uuid::new_v4(),
            job,
            status: JobStatus::Pending,
            enqueued_at: now,
            run_at,
            attempts: 0,
            dedup_key,
            last_error: None,
            failed_at: None,
        };
        let id = entry.job_id;
        tracing::debug!(job = %entry.job, job_id = %id, run_at = %run_at, "job enqueued");
        jobs.push(entry);
        id
    }

    /// Mark every pending job due at `now` as running and return them,
    /// earliest first. Each returned entry has its attempt counted.
    pub fn take_due(&self, now: DateTime<Utc>) -> Vec<QueuedJob> {
        let mut jobs = self.jobs.lock();
        let mut due: Vec<QueuedJob> = jobs
            .iter_mut()
            .filter(|j| j.status == JobStatus::Pending && j.run_at <= now)
            .map(|j| {
                j.status = JobStatus::Running;
                j.attempts += 1;
                j.clone()
            })
            .collect();
        due.sort_by_key(|j| j.run_at);
        due
    }

    /// Remove a finished job.
    pub fn complete(&self, job_id: Uuid) -> bool {
        let mut jobs = self.jobs.lock();
        let before = jobs.len();
        jobs.retain(|j| !(j.job_id == job_id && j.status == JobStatus::Running));
        jobs.len() != before
    }

    /// Put a running job back as pending at `run_at`, recording `error`.
    pub fn retry(&self, job_id: Uuid, run_at: DateTime<Utc>, error: String) -> bool {
        self.with_running(job_id, |j| {
            j.status = JobStatus::Pending;
            j.run_at = run_at;
            j.last_error = Some(error);
        })
    }

    /// Put a running job back as pending at `run_at` without counting the
    /// attempt. Used when the job could not start at all.
    pub fn reschedule(&self, job_id: Uuid, run_at: DateTime<Utc>, error: String) -> bool {
        self.with_running(job_id, |j| {
            j.status = JobStatus::Pending;
            j.run_at = run_at;
            j.attempts = j.attempts.saturating_sub(1);
            j.last_error = Some(error);
        })
    }

    /// Give up on a running job.
    pub fn fail(&self, job_id: Uuid, error: String) -> bool {
        let now = self.clock.now();
        self.with_running(job_id, |j| {
            j.status = JobStatus::Failed;
            j.last_error = Some(error);
            j.failed_at = Some(now);
        })
    }

    /// Drop dead letters that failed before `cutoff`. Entries restored
    /// without a failure time count from their `run_at`. Returns how many
    /// were removed.
    pub fn prune_failed(&self, cutoff: DateTime<Utc>) -> usize {
        let mut jobs = self.jobs.lock();
        let before = jobs.len();
        jobs.retain(|j| {
            j.status != JobStatus::Failed || j.failed_at.unwrap_or(j.run_at) >= cutoff
        });
        let pruned = before - jobs.len();
        if pruned > 0 {
            tracing::debug!(pruned, %cutoff, "dead letters pruned");
        }
        pruned
    }

    /// Entries in `status`.
    pub fn with_status(&self, status: JobStatus) -> Vec<QueuedJob> {
        self.jobs
            .lock()
            .iter()
            .filter(|j| j.status == status)
            .cloned()
            .collect()
    }

    /// Pending jobs, earliest first.
    pub fn pending(&self) -> Vec<QueuedJob> {
        let mut pending = self.with_status(JobStatus::Pending);
        pending.sort_by_key(|j| j.run_at);
        pending
    }

    /// Whether an equivalent job is pending.
    pub fn has_pending(&self, job: &Job) -> bool {
        let key = job.idempotency_key();
        self.jobs
            .lock()
            .iter()
            .any(|j| j.status == JobStatus::Pending && j.dedup_key == key)
    }

    /// Earliest pending `run_at`.
    pub fn next_run_at(&self) -> Option<DateTime<Utc>> {
        self.jobs
            .lock()
            .iter()
            .filter(|j| j.status == JobStatus::Pending)
            .map(|j| j.run_at)
            .min()
    }

    /// Total entries, any status.
    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    /// Whether the queue holds no entries.
    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }

    fn with_running(&self, job_id: Uuid, f: impl FnOnce(&mut QueuedJob)) -> bool {
        let mut jobs = self.jobs.lock();
        match jobs
            .iter_mut()
            .find(|j| j.job_id == job_id && j.status == JobStatus::Running)
        {
            Some(job) => {
                f(job);
                true
            }
            None => false,
        }
    }
}

impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, job: Job, delay: Duration) -> Result<(), PiplError> {
        let delay = delay.max(Duration::zero());
        let run_at = self.clock.now() + delay;
        self.schedule_at(job, run_at);
        Ok(())
    }
}
