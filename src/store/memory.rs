//! In-process counter store.

use super::CounterStore;
use crate::clock::Clock;
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

const DEFAULT_MAX_ENTRIES: usize = 100_000;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<u64>,
}

impl Entry {
    fn is_expired(&self, now: u64) -> bool {
        self.expires_at.map(|at| now >= at).unwrap_or(false)
    }
}

/// Absolute expiry for `ttl` from `now`, pinned at `u64::MAX` rather than wrapping.
fn deadline(now: u64, ttl: Duration) -> u64 {
    now.saturating_add(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX))
}

/// Counter store backed by a `HashMap` behind a single lock.
///
/// Expiry is evaluated against the injected [`Clock`], so a `ManualClock`
/// makes window roll-over and bucket TTLs fully deterministic in tests.
pub struct MemoryCounterStore {
    entries: RwLock<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
    max_entries: usize,
}

impl MemoryCounterStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_capacity(clock, DEFAULT_MAX_ENTRIES)
    }

    pub fn with_capacity(clock: Arc<dyn Clock>, max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
            max_entries: max_entries.max(1),
        }
    }

    /// Number of live (unexpired) keys.
    pub fn len(&self) -> usize {
        let now = self.clock.now_ms();
        match self.entries.read() {
            Ok(entries) => entries.values().filter(|e| !e.is_expired(now)).count(),
            Err(_) => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn poisoned() -> Error {
        Error::store_unavailable("memory store lock poisoned", "memory")
    }

    /// Drop expired keys when full. Live keys are never evicted; a store full
    /// of them refuses new keys.
    fn make_room(&self, entries: &mut HashMap<String, Entry>, now: u64) -> Result<()> {
        if entries.len() < self.max_entries {
            return Ok(());
        }
        entries.retain(|_, e| !e.is_expired(now));
        if entries.len() >= self.max_entries {
            return Err(Error::store_unavailable(
                format!("memory store full ({} live keys)", entries.len()),
                "memory",
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment(&self, key: &str) -> Result<i64> {
        let now = self.clock.now_ms();
        let mut entries = self.entries.write().map_err(|_| Self::poisoned())?;

        if let Some(entry) = entries.get_mut(key) {
            if !entry.is_expired(now) {
                let current: i64 = entry.value.parse().map_err(|_| {
                    Error::validation_with_context(
                        "value is not an integer",
                        crate::ErrorContext::new()
                            .with_field_path(key)
                            .with_source("memory"),
                    )
                })?;
                let next = current.saturating_add(1);
                entry.value = next.to_string();
                return Ok(next);
            }
            entries.remove(key);
        }

        self.make_room(&mut entries, now)?;
        entries.insert(
            key.to_string(),
            Entry {
                value: "1".to_string(),
                expires_at: None,
            },
        );
        Ok(1)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let now = self.clock.now_ms();
        let mut entries = self.entries.write().map_err(|_| Self::poisoned())?;
        match entries.get_mut(key) {
            Some(entry) if !entry.is_expired(now) => {
                entry.expires_at = Some(deadline(now, ttl));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = self.clock.now_ms();
        let entries = self.entries.read().map_err(|_| Self::poisoned())?;
        Ok(entries
            .get(key)
            .filter(|e| !e.is_expired(now))
            .map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let now = self.clock.now_ms();
        let mut entries = self.entries.write().map_err(|_| Self::poisoned())?;
        if !entries.contains_key(key) {
            self.make_room(&mut entries, now)?;
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(deadline(now, ttl)),
            },
        );
        Ok(())
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let now = self.clock.now_ms();
        let entries = self.entries.read().map_err(|_| Self::poisoned())?;
        Ok(entries
            .get(key)
            .filter(|e| !e.is_expired(now))
            .and_then(|e| e.expires_at)
            .map(|at| Duration::from_millis(at - now)))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut entries = self.entries.write().map_err(|_| Self::poisoned())?;
        Ok(entries.remove(key).is_some())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn store() -> (Arc<ManualClock>, MemoryCounterStore) {
        let clock = Arc::new(ManualClock::new(10_000));
        let store = MemoryCounterStore::new(clock.clone());
        (clock, store)
    }

    #[tokio::test]
    async fn test_increment_creates_key_without_ttl() {
        let (_, store) = store();
        assert_eq!(store.increment("rl:a").await.unwrap(), 1);
        assert_eq!(store.increment("rl:a").await.unwrap(), 2);
        assert_eq!(store.ttl("rl:a").await.unwrap(), None);
        assert_eq!(store.get("rl:a").await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_expire_and_rollover() {
        let (clock, store) = store();
        store.increment("rl:a").await.unwrap();
        assert!(store.expire("rl:a", Duration::from_secs(1)).await.unwrap());
        assert_eq!(
            store.ttl("rl:a").await.unwrap(),
            Some(Duration::from_millis(1_000))
        );

        clock.advance_ms(999);
        assert_eq!(store.increment("rl:a").await.unwrap(), 2);
        // Re-incrementing does not touch the TTL.
        assert_eq!(
            store.ttl("rl:a").await.unwrap(),
            Some(Duration::from_millis(1))
        );

        clock.advance_ms(1);
        assert_eq!(store.get("rl:a").await.unwrap(), None);
        assert_eq!(store.increment("rl:a").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_expire_missing_key() {
        let (_, store) = store();
        assert!(!store.expire("nope", Duration::from_secs(1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_set_replaces_value_and_ttl() {
        let (clock, store) = store();
        store.set("tb:a", "{}", Duration::from_secs(5)).await.unwrap();
        clock.advance_ms(4_000);
        store.set("tb:a", "[]", Duration::from_secs(5)).await.unwrap();
        clock.advance_ms(4_000);
        assert_eq!(store.get("tb:a").await.unwrap().as_deref(), Some("[]"));
        assert!(store.delete("tb:a").await.unwrap());
        assert!(!store.delete("tb:a").await.unwrap());
    }

    #[tokio::test]
    async fn test_increment_non_integer_is_rejected() {
        let (_, store) = store();
        store.set("k", "abc", Duration::from_secs(5)).await.unwrap();
        assert!(store.increment("k").await.is_err());
    }

    #[test]
    fn test_capacity_reclaims_only_expired_keys() {
        let clock = Arc::new(ManualClock::new(0));
        let store = MemoryCounterStore::with_capacity(clock.clone(), 2);
        tokio_test::block_on(async {
            store.increment("a").await.unwrap();
            store.expire("a", Duration::from_millis(10)).await.unwrap();
            store.increment("b").await.unwrap();

            // Both keys live: nothing is evicted and the write is refused.
            let err = store.increment("c").await.unwrap_err();
            assert!(err.is_store_unavailable());
            assert_eq!(store.get("a").await.unwrap().as_deref(), Some("1"));
            assert_eq!(store.get("b").await.unwrap().as_deref(), Some("1"));

            // Existing keys keep counting while full.
            assert_eq!(store.increment("b").await.unwrap(), 2);

            clock.advance_ms(10);
            assert_eq!(store.increment("c").await.unwrap(), 1);
            assert_eq!(store.get("a").await.unwrap(), None);
            assert_eq!(store.get("b").await.unwrap().as_deref(), Some("2"));
        });
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_set_when_full_is_refused() {
        let clock = Arc::new(ManualClock::new(0));
        let store = MemoryCounterStore::with_capacity(clock, 1);
        tokio_test::block_on(async {
            store.set("tb:a", "{}", Duration::from_secs(5)).await.unwrap();
            assert!(store.set("tb:b", "{}", Duration::from_secs(5)).await.is_err());
            // Overwriting an existing key needs no room.
            store.set("tb:a", "[]", Duration::from_secs(5)).await.unwrap();
        });
    }

    #[tokio::test]
    async fn test_huge_ttl_saturates() {
        let (_, store) = store();
        store.increment("rl:a").await.unwrap();
        assert!(store.expire("rl:a", Duration::MAX).await.unwrap());
        store.set("tb:a", "{}", Duration::MAX).await.unwrap();
        assert_eq!(
            store.ttl("rl:a").await.unwrap(),
            Some(Duration::from_millis(u64::MAX - 10_000))
        );
        assert_eq!(store.get("tb:a").await.unwrap().as_deref(), Some("{}"));
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_distinct() {
        let (_, store) = store();
        let store = Arc::new(store);
        let mut handles = Vec::new();
        for _ in 0..8 {
            let s = store.clone();
            handles.push(tokio::spawn(async move {
                let mut seen = Vec::new();
                for _ in 0..25 {
                    seen.push(s.increment("hot").await.unwrap());
                }
                seen
            }));
        }
        let mut all = Vec::new();
        for h in handles {
            all.extend(h.await.unwrap());
        }
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 200);
        assert_eq!(store.get("hot").await.unwrap().as_deref(), Some("200"));
    }
}
