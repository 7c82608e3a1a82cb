//! Tasks dispatched by one worker and not yet finished.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::task::TaskId;

/// In-flight set: task id → dispatch time.
///
/// Every operation is a single map call so event handling interleaved with
/// the dispatch loop never observes a half-applied update.
#[derive(Debug, Default)]
pub struct InFlight {
    entries: HashMap<TaskId, Instant>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a dispatch. Returns false if the task was already tracked.
    pub fn insert(&mut self, id: TaskId, at: Instant) -> bool {
        self.entries.insert(id, at).is_none()
    }

    pub fn remove(&mut self, id: &TaskId) -> bool {
        self.entries.remove(id).is_some()
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn ids(&self) -> Vec<TaskId> {
        self.entries.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ids tracked for longer than `max_age`, with their age.
    pub fn expired(&self, max_age: Duration, now: Instant) -> Vec<(TaskId, Duration)> {
        self.entries
            .iter()
            .map(|(id, at)| (*id, now.saturating_duration_since(*at)))
            .filter(|(_, age)| *age > max_age)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    #[test]
    fn insert_reports_collisions() {
        let mut set = InFlight::new();
        let id = Uuid::new_v4();
        let now = Instant::now();
        assert!(set.insert(id, now));
        assert!(!set.insert(id, now));
        assert_eq!(set.len(), 1);
        assert!(set.remove(&id));
        assert!(!set.remove(&id));
        assert!(set.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_only_past_max_age() {
        let mut set = InFlight::new();
        let old = Uuid::new_v4();
        set.insert(old, Instant::now());
        tokio::time::advance(Duration::from_secs(500)).await;
        let fresh = Uuid::new_v4();
        set.insert(fresh, Instant::now());
        tokio::time::advance(Duration::from_secs(101)).await;

        let expired = set.expired(Duration::from_secs(600), Instant::now());
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].0, old);
        assert_eq!(expired[0].1, Duration::from_secs(601));
        assert!(set.contains(&fresh));
    }
}
