//! # Cooperative Leases
//!
//! Long-running tasks (the sweep) hold a named lease so two workers never
//! run them at once. A lease expires after its TTL so a crashed holder
//! cannot wedge the task.
//!
//! [`LeaseRegistry::acquire_with_retry`] tries `1 + retries` times with a
//! fixed sleep and then fails with [`PiplError::LeaseUnavailable`]. The
//! worker turns that error into a far-future reschedule.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use pipl_core::{Clock, LeaseConfig, PiplError};

#[derive(Debug, Clone, Copy)]
struct Lease {
    token: Uuid,
    expires_at: DateTime<Utc>,
}

/// Named, expiring, in-process leases.
#[derive(Debug, Clone)]
pub struct LeaseRegistry {
    clock: Arc<dyn Clock>,
    leases: Arc<Mutex<HashMap<String, Lease>>>,
}

/// Releases its lease on drop.
#[derive(Debug)]
pub struct LeaseGuard {
    registry: LeaseRegistry,
    key: String,
    token: Uuid,
}

impl LeaseGuard {
    /// The lease key.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        let mut leases = self.registry.leases.lock();
        // Only release our own lease; an expired one may have been taken over.
        if leases.get(&self.key).is_some_and(|l| l.token == self.token) {
            leases.remove(&self.key);
        }
    }
}

impl LeaseRegistry {
    /// Empty registry.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            leases: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Take `key` for `ttl` if it is free or expired.
    pub fn try_acquire(&self, key: &str, ttl: Duration) -> Option<LeaseGuard> {
        let now = self.clock.now();
        let mut leases = self.leases.lock();
        if leases.get(key).is_some_and(|l| l.expires_at > now) {
            return None;
        }
        let token = Uuid::new_v4();
        leases.insert(
            key.to_string(),
            Lease {
                token,
                expires_at: now + ttl,
            },
        );
        Some(LeaseGuard {
            registry: self.clone(),
            key: key.to_string(),
            token,
        })
    }

    /// Try, sleep, try again, up to `1 + config.retries` attempts.
    pub async fn acquire_with_retry(
        &self,
        key: &str,
        config: &LeaseConfig,
    ) -> Result<LeaseGuard, PiplError> {
        let attempts = config.retries.saturating_add(1);
        let ttl = Duration::seconds(config.ttl_secs);
        for attempt in 1..=attempts {
            if let Some(guard) = self.try_acquire(key, ttl) {
                return Ok(guard);
            }
            tracing::debug!(key, attempt, attempts, "lease busy");
            if attempt < attempts {
                tokio::time::sleep(std::time::Duration::from_millis(config.backoff_ms)).await;
            }
        }
        Err(PiplError::LeaseUnavailable {
            key: key.to_string(),
            attempts,
        })
    }

    /// Whether `key` is currently held.
    pub fn is_held(&self, key: &str) -> bool {
        let now = self.clock.now();
        self.leases
            .lock()
            .get(key)
            .is_some_and(|l| l.expires_at > now)
    }
}
