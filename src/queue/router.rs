//! `QueueRouter`: per-pool, per-priority FIFO lists plus TTL'd capacity tickets.
//!
//! Lists live in the shared volatile store, so any number of workers in any
//! number of processes can pull from them. The atomic pop is the only thing
//! preventing two workers from claiming the same task.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::error::StoreError;
use crate::store::{StoreKeys, VolatileStore};
use crate::task::{Priority, RouteLabel, TaskId};
use crate::tier::{Census, Tier};

/// Lifetime of an idle queue list.
pub const QUEUE_TTL: Duration = Duration::from_secs(12 * 60 * 60);

/// Default lifetime of a capacity ticket.
pub const DEFAULT_TICKET_TTL: Duration = Duration::from_secs(120);

#[derive(Clone)]
pub struct QueueRouter {
    store: Arc<dyn VolatileStore>,
    ticket_ttl: Duration,
}

impl QueueRouter {
    pub fn new(store: Arc<dyn VolatileStore>) -> Self {
        Self::with_ticket_ttl(store, DEFAULT_TICKET_TTL)
    }

    pub fn with_ticket_ttl(store: Arc<dyn VolatileStore>, ticket_ttl: Duration) -> Self {
        Self { store, ticket_ttl }
    }

    /// Append `task_id` to the queue selected by `route`.
    pub async fn publish(&self, task_id: TaskId, route: &RouteLabel) -> Result<(), StoreError> {
        let queue = StoreKeys::queue(route);
        let depth = self
            .store
            .push(&queue, &task_id.to_string(), QUEUE_TTL)
            .await?;
        tracing::info!(task_id = %task_id, queue = %queue, depth, "Task published");
        Ok(())
    }

    /// Pop the oldest task id from the queue selected by `route`. Never blocks.
    pub async fn next(&self, route: &RouteLabel) -> Result<Option<TaskId>, StoreError> {
        let queue = StoreKeys::queue(route);
        let Some(raw) = self.store.pop(&queue).await? else {
            return Ok(None);
        };
        match raw.parse() {
            Ok(id) => Ok(Some(id)),
            Err(_) => {
                tracing::warn!(queue = %queue, entry = %raw, "Dropping malformed queue entry");
                Ok(None)
            }
        }
    }

    /// Return a task to the tail of its queue after a failed dispatch.
    pub async fn push_back(&self, task_id: TaskId, route: &RouteLabel) -> Result<(), StoreError> {
        let queue = StoreKeys::queue(route);
        self.store
            .push(&queue, &task_id.to_string(), QUEUE_TTL)
            .await?;
        debug!(task_id = %task_id, queue = %queue, "Task pushed back");
        Ok(())
    }

    pub async fn queue_length(&self, route: &RouteLabel) -> Result<u64, StoreError> {
        self.store.list_len(&StoreKeys::queue(route)).await
    }

    // ── Tickets ─────────────────────────────────────────────────────

    /// Mark `bot_id` as actively serving `tier` in `pool` for one ticket TTL.
    pub async fn ticket(&self, pool: &str, tier: Tier, bot_id: &str) -> Result<(), StoreError> {
        self.store
            .set(&StoreKeys::ticket(pool, tier, bot_id), "", Some(self.ticket_ttl))
            .await
    }

    /// Live tickets for `tier` in `pool`.
    pub async fn ticket_count(&self, pool: &str, tier: Tier) -> Result<u64, StoreError> {
        self.store
            .count_prefix(&StoreKeys::ticket_prefix(pool, tier))
            .await
    }

    /// Shared-lane depth and live tickets on both sides of the tier split.
    pub async fn census(&self, pool: &str) -> Result<Census, StoreError> {
        let mut census = Census::default();
        for priority in Priority::ALL {
            let depth = self
                .store
                .list_len(&StoreKeys::shared_queue(pool, priority))
                .await?;
            if priority.is_expedited() {
                census.expedited_depth += depth;
            } else {
                census.standard_depth += depth;
            }
        }
        census.expedited_tickets = self.ticket_count(pool, Tier::Fast).await?;
        census.standard_tickets = self.ticket_count(pool, Tier::Relaxed).await?;
        Ok(census)
    }
}

/// Route labels a worker tries, in order, when looking for work.
///
/// Priorities run highest first; within one priority the worker's private
/// lane comes before the shared lane. Shared expedited lanes are reserved to
/// fast workers and shared standard lanes to relaxed ones. Private lanes are
/// always scanned so follow-ups reach the identity that owns their asset.
pub fn scan_order(tier: Tier, pool: &str, bot_id: &str) -> Vec<RouteLabel> {
    let mut order = Vec::with_capacity(Priority::ALL.len() * 2);
    for priority in Priority::ALL {
        order.push(RouteLabel::private(priority, pool, bot_id));
        let served = match tier {
            Tier::Fast => priority.is_expedited(),
            Tier::Relaxed => !priority.is_expedited(),
            Tier::Offline => false,
        };
        if served {
            order.push(RouteLabel::shared(priority, pool));
        }
    }
    order
}
