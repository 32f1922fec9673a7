//! In-process `LockStore` with the same semantics as the Redis primitives.
//!
//! Expiry is evaluated lazily against `tokio::time::Instant`, so paused-time
//! tests can push leases past their TTL without sleeping.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use domains::{LockStore, StoreError};
use tokio::time::Instant;

struct Held {
    token: String,
    expires_at: Instant,
}

impl Held {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

#[derive(Default)]
pub struct InMemoryLockStore {
    keys: DashMap<String, Held>,
}

impl InMemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token currently holding `key`, ignoring expired entries.
    pub fn holder(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        self.keys
            .get(key)
            .filter(|held| held.is_live(now))
            .map(|held| held.token.clone())
    }
}

#[async_trait]
impl LockStore for InMemoryLockStore {
    async fn set_if_absent(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = Instant::now();
        let fresh = Held {
            token: token.to_string(),
            expires_at: now + ttl,
        };
        // The entry guard keeps the shard locked for the check and the write.
        match self.keys.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_live(now) {
                    Ok(false)
                } else {
                    occupied.insert(fresh);
                    Ok(true)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(fresh);
                Ok(true)
            }
        }
    }

    async fn delete_if_equals(&self, key: &str, token: &str) -> Result<bool, StoreError> {
        let now = Instant::now();
        Ok(self
            .keys
            .remove_if(key, |_, held| held.token == token && held.is_live(now))
            .is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    #[tokio::test(start_paused = true)]
    async fn expired_key_can_be_claimed_again() {
        let store = InMemoryLockStore::new();
        assert!(assert_ok!(store.set_if_absent("k", "a", Duration::from_millis(10)).await));
        assert!(!assert_ok!(store.set_if_absent("k", "b", Duration::from_millis(10)).await));

        tokio::time::advance(Duration::from_millis(11)).await;
        assert_eq!(store.holder("k"), None);
        assert!(assert_ok!(store.set_if_absent("k", "b", Duration::from_secs(1)).await));
        assert_eq!(store.holder("k").as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn delete_requires_matching_token() {
        let store = InMemoryLockStore::new();
        store.set_if_absent("k", "a", Duration::from_secs(5)).await.unwrap();
        assert!(!store.delete_if_equals("k", "b").await.unwrap());
        assert_eq!(store.holder("k").as_deref(), Some("a"));
        assert!(store.delete_if_equals("k", "a").await.unwrap());
        assert_eq!(store.holder("k"), None);
    }
}
