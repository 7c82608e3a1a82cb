//! `VolatileStore` trait: the keyed store every component persists through.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreError;

/// Backend-agnostic volatile key/value store with list primitives.
///
/// Values expire after their TTL and then read as absent. List pops are
/// atomic: concurrent callers never receive the same element.
#[async_trait]
pub trait VolatileStore: Send + Sync {
    /// Read a value. Expired keys read as `None`.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write a value, replacing any previous one and resetting its TTL.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Reset the TTL of an existing value without touching its content.
    /// Returns `false` when the key is absent or already expired.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Remove a key. Missing keys are not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    // ── Lists ───────────────────────────────────────────────────────

    /// Push onto the tail of a FIFO list, refreshing the list TTL.
    /// Returns the new length.
    async fn push(&self, list: &str, value: &str, ttl: Duration) -> Result<u64, StoreError>;

    /// Pop the oldest element, or `None` when the list is empty.
    async fn pop(&self, list: &str) -> Result<Option<String>, StoreError>;

    /// Current list length (0 for a missing list).
    async fn list_len(&self, list: &str) -> Result<u64, StoreError>;

    // ── Scans ───────────────────────────────────────────────────────

    /// Count live keys starting with `prefix`.
    async fn count_prefix(&self, prefix: &str) -> Result<u64, StoreError>;
}
