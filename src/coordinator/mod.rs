//! Shard lock coordination
//!
//! Exclusive, cluster-wide locks keyed by shard id so at most one process
//! at a time evaluates a shard's slots. Locks are leases obtained from an
//! external coordination service and held for the duration of a scheduling
//! pass, which keeps shard rebalancing lock-granular across the fleet.
//!
//! Contention is an expected outcome and is modeled as
//! [`LockAttempt::Busy`], not an error; only an unreachable or misbehaving
//! coordination service surfaces as `Err`.

mod memory;

pub use memory::InMemoryLockService;

use crate::shard::{Shard, ShardSet};
use crate::telemetry;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// An exclusive, session-scoped lease on one shard.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ShardLock {
    pub lock_id: String,
    pub shard: Shard,
    pub holder_id: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Outcome of a lock acquisition attempt.
///
/// `Busy` means another process holds the lock; the caller skips the shard
/// this cycle and retries later.
#[derive(Debug, Clone, PartialEq)]
pub enum LockAttempt {
    Acquired(ShardLock),
    Busy,
}

/// Distributed lock service interface.
///
/// Abstracts the external coordination service (a session-based lease or
/// mutex primitive). The in-memory implementation serves development,
/// testing, and single-process deployments.
#[async_trait]
pub trait LockService: Send + Sync {
    /// Attempt to acquire the exclusive lock for a shard.
    ///
    /// Re-acquisition by the current holder refreshes the lease and
    /// succeeds. Returns `Err` only when the service itself fails.
    async fn acquire(&self, shard: Shard, holder_id: &str, ttl: Duration) -> Result<LockAttempt>;

    /// Extend a held lease by its ttl.
    async fn renew(&self, lock: &ShardLock, ttl: Duration) -> Result<()>;

    /// Release a held lease. Releasing an expired or unknown lease is a
    /// no-op.
    async fn release(&self, lock: ShardLock) -> Result<()>;
}

/// Tracks which shard locks this process currently holds.
///
/// A coordination-service failure never corrupts local state: the shard is
/// simply treated as not held until a later successful acquisition.
pub struct ShardLockCoordinator {
    service: Arc<dyn LockService>,
    holder_id: String,
    lock_ttl: Duration,
    held: DashMap<Shard, ShardLock>,
}

impl ShardLockCoordinator {
    pub fn new(service: Arc<dyn LockService>, holder_id: impl Into<String>, lock_ttl: Duration) -> Self {
        Self {
            service,
            holder_id: holder_id.into(),
            lock_ttl,
            held: DashMap::new(),
        }
    }

    /// Attempt to acquire a shard's lock. Returns whether the lock is held
    /// after the call.
    ///
    /// `Busy` is logged at debug and returns `false`; a service failure is
    /// counted, logged, and propagated so the caller can treat the shard
    /// as unmanaged for this cycle.
    pub async fn acquire_shard(&self, shard: Shard) -> Result<bool> {
        if self.held.contains_key(&shard) {
            return Ok(true);
        }
        match self.service.acquire(shard, &self.holder_id, self.lock_ttl).await {
            Ok(LockAttempt::Acquired(lock)) => {
                info!("Acquired lock for shard {} (lease {})", shard, lock.lock_id);
                self.held.insert(shard, lock);
                Ok(true)
            }
            Ok(LockAttempt::Busy) => {
                debug!("Shard {} lock busy, skipping this cycle", shard);
                Ok(false)
            }
            Err(e) => {
                warn!("Lock service failure for shard {}: {}", shard, e);
                telemetry::record_lock_failure(shard);
                Err(e)
            }
        }
    }

    /// Release a shard's lock if held.
    pub async fn release_shard(&self, shard: Shard) -> Result<()> {
        if let Some((_, lock)) = self.held.remove(&shard) {
            info!("Releasing lock for shard {} (lease {})", shard, lock.lock_id);
            self.service.release(lock).await?;
        }
        Ok(())
    }

    /// Renew every held lease. A shard whose renewal fails is dropped from
    /// the held set; the next cycle re-attempts acquisition.
    pub async fn renew_held(&self) {
        let shards: Vec<Shard> = self.held.iter().map(|e| *e.key()).collect();
        for shard in shards {
            let lock = match self.held.get(&shard) {
                Some(l) => l.clone(),
                None => continue,
            };
            if let Err(e) = self.service.renew(&lock, self.lock_ttl).await {
                warn!("Failed to renew lock for shard {}: {}", shard, e);
                telemetry::record_lock_failure(shard);
                self.held.remove(&shard);
            }
        }
    }

    /// Whether this process currently holds the lock for a shard.
    pub fn held(&self, shard: Shard) -> bool {
        self.held.contains_key(&shard)
    }

    /// Snapshot of all currently held shards.
    pub fn held_shards(&self) -> ShardSet {
        self.held.iter().map(|e| *e.key()).collect()
    }

    /// Release every held lock; called on shutdown and shard drain.
    pub async fn release_all(&self) {
        let shards: Vec<Shard> = self.held.iter().map(|e| *e.key()).collect();
        for shard in shards {
            if let Err(e) = self.release_shard(shard).await {
                warn!("Failed to release lock for shard {}: {}", shard, e);
            }
        }
    }
}
