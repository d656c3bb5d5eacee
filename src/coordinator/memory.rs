//! In-memory lock service for development and testing
//!
//! Lease semantics match what a session-based coordination service
//! provides: exclusive per-shard leases with expiry, scavenged lazily on
//! acquisition so a crashed holder's lease frees itself after the ttl.

use super::{LockAttempt, LockService, ShardLock};
use crate::shard::Shard;
use crate::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Local in-memory lock service.
///
/// Suitable for single-process deployments and tests; `fail_next` lets
/// tests exercise the coordination-failure path.
#[derive(Debug, Default)]
pub struct InMemoryLockService {
    leases: DashMap<Shard, ShardLock>,
    fail_next: AtomicBool,
}

impl InMemoryLockService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next service call return a failure, simulating an
    /// unreachable coordination service.
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::Release);
    }

    fn check_failure(&self, shard: Shard) -> Result<()> {
        if self.fail_next.swap(false, Ordering::AcqRel) {
            return Err(crate::Error::LockUnavailable(shard));
        }
        Ok(())
    }

    /// Number of live (unexpired) leases, for tests and diagnostics.
    pub fn live_lease_count(&self) -> usize {
        let now = chrono::Utc::now();
        self.leases.iter().filter(|e| e.expires_at > now).count()
    }
}

#[async_trait]
impl LockService for InMemoryLockService {
    async fn acquire(&self, shard: Shard, holder_id: &str, ttl: Duration) -> Result<LockAttempt> {
        self.check_failure(shard)?;
        let now = chrono::Utc::now();
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| crate::Error::Config(format!("lock ttl out of range: {}", e)))?;

        // Scavenge an expired lease before deciding contention
        if let Some(existing) = self.leases.get(&shard) {
            if existing.expires_at <= now {
                drop(existing);
                self.leases.remove(&shard);
            }
        }

        match self.leases.entry(shard) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                if entry.get().holder_id == holder_id {
                    // Re-acquisition by the current holder refreshes the lease
                    entry.get_mut().expires_at = now + ttl;
                    Ok(LockAttempt::Acquired(entry.get().clone()))
                } else {
                    Ok(LockAttempt::Busy)
                }
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                let lock = ShardLock {
                    lock_id: uuid::Uuid::new_v4().to_string(),
                    shard,
                    holder_id: holder_id.to_string(),
                    acquired_at: now,
                    expires_at: now + ttl,
                };
                entry.insert(lock.clone());
                Ok(LockAttempt::Acquired(lock))
            }
        }
    }

    async fn renew(&self, lock: &ShardLock, ttl: Duration) -> Result<()> {
        self.check_failure(lock.shard)?;
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| crate::Error::Config(format!("lock ttl out of range: {}", e)))?;
        match self.leases.get_mut(&lock.shard) {
            Some(mut existing) if existing.lock_id == lock.lock_id => {
                existing.expires_at = chrono::Utc::now() + ttl;
                Ok(())
            }
            _ => Err(crate::Error::Internal(format!(
                "Cannot renew lease {} for shard {}: not the current holder",
                lock.lock_id, lock.shard
            ))),
        }
    }

    async fn release(&self, lock: ShardLock) -> Result<()> {
        self.check_failure(lock.shard)?;
        // Remove only if the lease id still matches; a scavenged-and-
        // reacquired lock belongs to someone else now.
        if let Some(existing) = self.leases.get(&lock.shard) {
            if existing.lock_id != lock.lock_id {
                return Ok(());
            }
        }
        self.leases.remove(&lock.shard);
        Ok(())
    }
}
