//! In-process `VolatileStore` used by tests and single-node deployments.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::traits::VolatileStore;
use crate::error::StoreError;

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

#[derive(Debug)]
struct List {
    items: VecDeque<String>,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct Inner {
    values: HashMap<String, Entry>,
    lists: HashMap<String, List>,
}

/// Map-backed store with lazy expiry.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VolatileStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        match inner.values.get(key) {
            Some(entry) if entry.is_live(now) => Ok(Some(entry.value.clone())),
            Some(_) => {
                inner.values.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.values.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        let Some(entry) = inner.values.get_mut(key) else {
            return Ok(false);
        };
        if entry.is_live(now) {
            entry.expires_at = Some(now + ttl);
            return Ok(true);
        }
        inner.values.remove(key);
        Ok(false)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.values.remove(key);
        inner.lists.remove(key);
        Ok(())
    }

    async fn push(&self, list: &str, value: &str, ttl: Duration) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        let entry = inner.lists.entry(list.to_string()).or_insert_with(|| List {
            items: VecDeque::new(),
            expires_at: now + ttl,
        });
        if entry.expires_at <= now {
            entry.items.clear();
        }
        entry.items.push_back(value.to_string());
        entry.expires_at = now + ttl;
        Ok(entry.items.len() as u64)
    }

    async fn pop(&self, list: &str) -> Result<Option<String>, StoreError> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        let Some(entry) = inner.lists.get_mut(list) else {
            return Ok(None);
        };
        if entry.expires_at <= now {
            inner.lists.remove(list);
            return Ok(None);
        }
        Ok(entry.items.pop_front())
    }

    async fn list_len(&self, list: &str) -> Result<u64, StoreError> {
        let inner = self.inner.lock().await;
        let now = Instant::now();
        Ok(inner
            .lists
            .get(list)
            .filter(|l| l.expires_at > now)
            .map_or(0, |l| l.items.len() as u64))
    }

    async fn count_prefix(&self, prefix: &str) -> Result<u64, StoreError> {
        let inner = self.inner.lock().await;
        let now = Instant::now();
        Ok(inner
            .values
            .iter()
            .filter(|(k, e)| k.starts_with(prefix) && e.is_live(now))
            .count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn get_set_delete() {
        let store = InMemoryStore::new();
        assert_eq!(store.get("k").await.unwrap(), None);

        store.set("k", "v", None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));

        store.delete("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn values_expire_after_ttl() {
        let store = InMemoryStore::new();
        store
            .set("k", "v", Some(Duration::from_secs(5)))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(store.get("k").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn expire_extends_live_values_only() {
        let store = InMemoryStore::new();
        store
            .set("k", "v", Some(Duration::from_secs(5)))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(store.expire("k", Duration::from_secs(5)).await.unwrap());
        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!store.expire("k", Duration::from_secs(5)).await.unwrap());
        assert!(!store.expire("missing", Duration::from_secs(5)).await.unwrap());
    }

    #[tokio::test]
    async fn lists_are_fifo() {
        let store = InMemoryStore::new();
        let ttl = Duration::from_secs(60);
        store.push("q", "a", ttl).await.unwrap();
        store.push("q", "b", ttl).await.unwrap();
        assert_eq!(store.list_len("q").await.unwrap(), 2);

        assert_eq!(store.pop("q").await.unwrap().as_deref(), Some("a"));
        assert_eq!(store.pop("q").await.unwrap().as_deref(), Some("b"));
        assert_eq!(store.pop("q").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn count_prefix_skips_expired() {
        let store = InMemoryStore::new();
        store
            .set("ticket:a:1", "", Some(Duration::from_secs(1)))
            .await
            .unwrap();
        store
            .set("ticket:a:2", "", Some(Duration::from_secs(10)))
            .await
            .unwrap();
        store.set("ticket:b:1", "", None).await.unwrap();

        assert_eq!(store.count_prefix("ticket:a:").await.unwrap(), 2);
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.count_prefix("ticket:a:").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn concurrent_pops_never_duplicate() {
        let store = Arc::new(InMemoryStore::new());
        let ttl = Duration::from_secs(60);
        for i in 0..200 {
            store.push("q", &i.to_string(), ttl).await.unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let mut got = Vec::new();
                while let Some(v) = store.pop("q").await.unwrap() {
                    got.push(v);
                }
                got
            }));
        }

        let mut all = Vec::new();
        for h in handles {
            all.extend(h.await.unwrap());
        }
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 200);
    }
}
