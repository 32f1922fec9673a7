//! # Distributed lock manager
//!
//! Leased mutual exclusion over a shared [`LockStore`]. Every acquisition
//! stores a fresh random owner token under the key; release deletes the key
//! only if it still holds that token, so a holder whose lease ran out can
//! never release a lock that somebody else has since taken.
//!
//! Bodies run under `execute_with_lock` must finish well inside the lease.
//! A body that outlives it is only reported after the fact, at release.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use domains::{LockError, LockStore};
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

pub const DEFAULT_KEY_PREFIX: &str = "wiki:lock:";
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct LockConfig {
    /// Prepended to every key before it reaches the store.
    pub key_prefix: String,
    /// Pause between acquisition attempts while waiting.
    pub retry_interval: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }
}

/// Proof of a successful acquisition. Hand it back to [`LockManager::unlock`].
#[derive(Debug)]
pub struct LockLease {
    key: String,
    token: String,
    lease: Duration,
    acquired_at: Instant,
}

impl LockLease {
    /// The store key, prefix included.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn lease(&self) -> Duration {
        self.lease
    }

    /// Time since acquisition, measured locally.
    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }

    /// Whether the lease has run out according to the local clock.
    pub fn is_lapsed(&self) -> bool {
        self.held_for() >= self.lease
    }
}

pub struct LockManager {
    store: Arc<dyn LockStore>,
    config: LockConfig,
}

impl LockManager {
    pub fn new(store: Arc<dyn LockStore>, config: LockConfig) -> Self {
        Self { store, config }
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }

    /// A single attempt. Store failures count as a failed attempt.
    async fn attempt(&self, key: &str, token: &str, lease: Duration) -> bool {
        match self.store.set_if_absent(key, token, lease).await {
            Ok(acquired) => acquired,
            Err(e) => {
                warn!(key = %key, error = %e, "lock store unreachable during acquisition");
                false
            }
        }
    }

    /// Non-blocking acquisition: one attempt, `None` if the key is held.
    pub async fn try_lock(&self, key: &str, lease: Duration) -> Option<LockLease> {
        let key = self.full_key(key);
        let token = Uuid::new_v4().to_string();
        if self.attempt(&key, &token, lease).await {
            debug!(key = %key, ?lease, "lock acquired");
            Some(LockLease {
                key,
                token,
                lease,
                acquired_at: Instant::now(),
            })
        } else {
            debug!(key = %key, "lock busy");
            None
        }
    }

    /// Retries on a fixed interval until acquired or `wait` has elapsed.
    pub async fn lock(&self, key: &str, wait: Duration, lease: Duration) -> Result<LockLease, LockError> {
        let full_key = self.full_key(key);
        let token = Uuid::new_v4().to_string();
        let started = Instant::now();

        loop {
            if self.attempt(&full_key, &token, lease).await {
                debug!(key = %full_key, ?lease, waited = ?started.elapsed(), "lock acquired");
                return Ok(LockLease {
                    key: full_key,
                    token,
                    lease,
                    acquired_at: Instant::now(),
                });
            }

            let waited = started.elapsed();
            if waited >= wait {
                debug!(key = %full_key, ?waited, "lock busy, wait budget exhausted");
                return Err(LockError::Unavailable {
                    key: full_key,
                    waited,
                });
            }
            tokio::time::sleep(self.config.retry_interval.min(wait - waited)).await;
        }
    }

    /// Releases the lease if the store still holds its token.
    ///
    /// Returns `false` when the key had already expired or belongs to a
    /// newer holder; nothing is deleted in that case.
    pub async fn unlock(&self, lease: LockLease) -> Result<bool, LockError> {
        let removed = self.store.delete_if_equals(&lease.key, &lease.token).await?;
        if removed {
            debug!(key = %lease.key, held = ?lease.held_for(), "lock released");
        } else {
            warn!(key = %lease.key, held = ?lease.held_for(), "lease lapsed before release, lock left untouched");
        }
        Ok(removed)
    }

    /// Acquires `key`, runs `body` exactly once, then always releases.
    ///
    /// If the lock cannot be taken within `wait` the body never runs and the
    /// contention surfaces as `E::from(LockError::Unavailable { .. })`.
    /// Release failures are logged and swallowed; the lease TTL covers them.
    pub async fn execute_with_lock<T, E, F, Fut>(
        &self,
        key: &str,
        wait: Duration,
        lease: Duration,
        body: F,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<LockError>,
    {
        let held = self.lock(key, wait, lease).await?;
        let result = body().await;
        self.release_quietly(held).await;
        result
    }

    pub(crate) async fn release_quietly(&self, lease: LockLease) {
        let key = lease.key.clone();
        if lease.is_lapsed() {
            warn!(
                key = %key,
                held = ?lease.held_for(),
                lease = ?lease.lease,
                "locked section outlived its lease, another instance may have run concurrently"
            );
        }
        if let Err(e) = self.unlock(lease).await {
            warn!(key = %key, error = %e, "failed to release lock, relying on lease expiry");
        }
    }
}
