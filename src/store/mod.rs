//! 共享计数存储：限流器使用的原子计数与带 TTL 的键值存储。
//!
//! # Shared Counter Store
//!
//! Window and bucket limiters keep their state in a fast key-value store
//! (Redis in production deployments). This module defines the narrow
//! contract they need and ships an in-process implementation.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`CounterStore`] | Atomic increment, TTL management, string get/set |
//! | [`MemoryCounterStore`] | In-process store with clock-driven expiry |
//!
//! Implementations must make [`CounterStore::increment`] atomic: two
//! concurrent increments of the same key always observe distinct values.
//! Keys created by `increment` carry no TTL until [`CounterStore::expire`]
//! is called, which lets limiters set the TTL exactly once per window.

mod memory;

pub use memory::MemoryCounterStore;

use crate::Result;
use async_trait::async_trait;
use std::time::Duration;

#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increment `key` (creating it at 0) and return the new value.
    async fn increment(&self, key: &str) -> Result<i64>;

    /// Set a TTL on an existing key. Returns `false` if the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing any previous value and TTL.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Remaining lifetime of `key`; `None` when missing or without expiry.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>>;

    async fn delete(&self, key: &str) -> Result<bool>;

    fn name(&self) -> &'static str;
}
