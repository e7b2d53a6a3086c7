//! # State File
//!
//! Without a database the CLI keeps its whole world in one JSON file: the
//! compliance store, the user directory, the job queue and the mail outbox.
//! Every command loads it, runs, and writes it back.
//!
//! With `--database-url` the compliance store lives in Postgres and the
//! file keeps the rest.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use pipl_core::{Clock, ComplianceNotice, LeaseConfig};
use pipl_enforcement::{
    DirectorySnapshot, EnforcementPipeline, InMemoryDirectory, InMemoryJobQueue, QueueSnapshot,
    RecordingNotifier,
};
use pipl_ledger::{ComplianceStore, MemorySnapshot, MemoryStore};

/// A pipeline over the state file's collaborators and some store.
pub type Engine<S> =
    EnforcementPipeline<S, InMemoryDirectory, RecordingNotifier, InMemoryJobQueue>;

/// Serialized form of the state file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    /// Access records and subjects.
    #[serde(default)]
    pub store: MemorySnapshot,
    /// Accounts, memberships, projects and deletion requests.
    #[serde(default)]
    pub directory: DirectorySnapshot,
    /// Pending and failed jobs.
    #[serde(default)]
    pub queue: QueueSnapshot,
    /// Notices handed to the mailer.
    #[serde(default)]
    pub outbox: Vec<ComplianceNotice>,
}

/// Live collaborators restored from a state file.
#[derive(Debug, Clone)]
pub struct World {
    pub store: Arc<MemoryStore>,
    pub directory: Arc<InMemoryDirectory>,
    pub notifier: Arc<RecordingNotifier>,
    pub queue: Arc<InMemoryJobQueue>,
    pub clock: Arc<dyn Clock>,
}

impl World {
    /// Restore from a snapshot.
    pub fn from_snapshot(snapshot: WorldSnapshot, clock: Arc<dyn Clock>) -> Self {
        Self {
            store: Arc::new(MemoryStore::from_snapshot(snapshot.store)),
            directory: Arc::new(InMemoryDirectory::from_snapshot(snapshot.directory)),
            notifier: Arc::new(RecordingNotifier::from_outbox(snapshot.outbox)),
            queue: Arc::new(InMemoryJobQueue::from_snapshot(
                Arc::clone(&clock),
                snapshot.queue,
            )),
            clock,
        }
    }

    /// Load `path`, or start empty when it does not exist.
    pub fn load(path: &Path, clock: Arc<dyn Clock>) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no state file, starting empty");
            return Ok(Self::from_snapshot(WorldSnapshot::default(), clock));
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read state file {}", path.display()))?;
        let snapshot: WorldSnapshot = serde_json::from_str(&raw)
            .with_context(|| format!("invalid state file {}", path.display()))?;
        Ok(Self::from_snapshot(snapshot, clock))
    }

    /// Copy out the current contents.
    pub fn snapshot(&self) -> WorldSnapshot {
        WorldSnapshot {
            store: self.store.snapshot(),
            directory: self.directory.snapshot(),
            queue: self.queue.snapshot(),
            outbox: self.notifier.sent(),
        }
    }

    /// Write the state file through a sibling temp file and a rename.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(&self.snapshot())?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("failed to replace {}", path.display()))?;
        Ok(())
    }

    /// A pipeline over this world's collaborators and `store`.
    pub fn engine<S: ComplianceStore>(&self, store: Arc<S>, lease: LeaseConfig) -> Engine<S> {
        EnforcementPipeline::new(
            store,
            Arc::clone(&self.directory),
            Arc::clone(&self.notifier),
            Arc::clone(&self.queue),
            Arc::clone(&self.clock),
        )
        .with_lease_config(lease)
    }
}
