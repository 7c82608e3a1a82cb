//! `TaskStore`: task records and the message-id → task-id correlation table.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::keys::StoreKeys;
use super::traits::VolatileStore;
use crate::error::StoreError;
use crate::task::{Task, TaskId};

/// Default lifetime of task records and correlation rows.
pub const DEFAULT_TASK_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Task persistence over a [`VolatileStore`].
///
/// `put` replaces the whole record; callers own read-modify-write ordering.
#[derive(Clone)]
pub struct TaskStore {
    store: Arc<dyn VolatileStore>,
    ttl: Duration,
}

impl TaskStore {
    pub fn new(store: Arc<dyn VolatileStore>) -> Self {
        Self::with_ttl(store, DEFAULT_TASK_TTL)
    }

    pub fn with_ttl(store: Arc<dyn VolatileStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Upsert a task and refresh its TTL.
    pub async fn put(&self, task: &Task) -> Result<(), StoreError> {
        let json = serde_json::to_string(task)?;
        self.store
            .set(&StoreKeys::task(task.id), &json, Some(self.ttl))
            .await
    }

    /// Refresh a task's TTL without rewriting it. `Ok(false)` when the record
    /// is already gone.
    pub async fn touch(&self, id: TaskId) -> Result<bool, StoreError> {
        self.store.expire(&StoreKeys::task(id), self.ttl).await
    }

    /// Fetch a task. Missing and expired records both fail with `NotFound`.
    pub async fn get(&self, id: TaskId) -> Result<Task, StoreError> {
        let json = self
            .store
            .get(&StoreKeys::task(id))
            .await?
            .ok_or_else(|| StoreError::NotFound {
                entity: "task".to_string(),
                id: id.to_string(),
            })?;
        Ok(serde_json::from_str(&json)?)
    }

    /// `Ok(true)` when a live record exists for `id`.
    pub async fn exists(&self, id: TaskId) -> Result<bool, StoreError> {
        Ok(self.store.get(&StoreKeys::task(id)).await?.is_some())
    }

    pub async fn delete(&self, id: TaskId) -> Result<(), StoreError> {
        self.store.delete(&StoreKeys::task(id)).await
    }

    /// Record that protocol message `message_id` belongs to `task_id`.
    pub async fn map_message_to_task(
        &self,
        message_id: &str,
        task_id: TaskId,
    ) -> Result<(), StoreError> {
        debug!(message_id, task_id = %task_id, "Mapping message to task");
        self.store
            .set(
                &StoreKeys::message(message_id),
                &task_id.to_string(),
                Some(self.ttl),
            )
            .await
    }

    /// Resolve a protocol message to its task, failing with `NotFound`.
    pub async fn lookup_task_by_message(&self, message_id: &str) -> Result<TaskId, StoreError> {
        let not_found = || StoreError::NotFound {
            entity: "message".to_string(),
            id: message_id.to_string(),
        };
        let raw = self
            .store
            .get(&StoreKeys::message(message_id))
            .await?
            .ok_or_else(not_found)?;
        raw.parse().map_err(|_| not_found())
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::store::InMemoryStore;
    use crate::task::{Priority, RouteLabel, TaskStatus};

    fn store() -> TaskStore {
        TaskStore::new(Arc::new(InMemoryStore::new()))
    }

    #[tokio::test]
    async fn put_then_get_replaces_record() {
        let tasks = store();
        let mut task = Task::generate(Uuid::new_v4(), "castle", RouteLabel::shared(Priority::High, "p"));
        tasks.put(&task).await.unwrap();

        task.mark_pending(Some("42".to_string())).unwrap();
        tasks.put(&task).await.unwrap();

        let loaded = tasks.get(task.id).await.unwrap();
        assert_eq!(loaded.status, TaskStatus::Pending);
        assert_eq!(loaded.protocol_message_id.as_deref(), Some("42"));
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let err = store().get(Uuid::new_v4()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn message_mapping_roundtrip() {
        let tasks = store();
        let id = Uuid::new_v4();
        assert!(tasks.lookup_task_by_message("m1").await.unwrap_err().is_not_found());

        tasks.map_message_to_task("m1", id).await.unwrap();
        assert_eq!(tasks.lookup_task_by_message("m1").await.unwrap(), id);
    }

    #[tokio::test(start_paused = true)]
    async fn records_expire() {
        let tasks = TaskStore::with_ttl(Arc::new(InMemoryStore::new()), Duration::from_secs(60));
        let task = Task::generate(Uuid::new_v4(), "x", RouteLabel::shared(Priority::Low, "p"));
        tasks.put(&task).await.unwrap();
        assert!(tasks.exists(task.id).await.unwrap());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(tasks.get(task.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test(start_paused = true)]
    async fn touch_refreshes_ttl_and_keeps_content() {
        let tasks = TaskStore::with_ttl(Arc::new(InMemoryStore::new()), Duration::from_secs(60));
        let mut task = Task::generate(Uuid::new_v4(), "x", RouteLabel::shared(Priority::Low, "p"));
        tasks.put(&task).await.unwrap();
        let stale = tasks.get(task.id).await.unwrap();

        task.mark_pending(Some("m1".to_string())).unwrap();
        tasks.put(&task).await.unwrap();
        tokio::time::advance(Duration::from_secs(50)).await;
        assert!(tasks.touch(stale.id).await.unwrap());

        tokio::time::advance(Duration::from_secs(50)).await;
        assert_eq!(tasks.get(task.id).await.unwrap().status, TaskStatus::Pending);
        assert!(!tasks.touch(Uuid::new_v4()).await.unwrap());
    }

    #[tokio::test]
    async fn delete_removes_record() {
        let tasks = store();
        let task = Task::generate(Uuid::new_v4(), "x", RouteLabel::shared(Priority::Low, "p"));
        tasks.put(&task).await.unwrap();
        tasks.delete(task.id).await.unwrap();
        assert!(!tasks.exists(task.id).await.unwrap());
    }
}
