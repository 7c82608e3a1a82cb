//! Key layout in the volatile store.

use crate::task::{Priority, RouteLabel, TaskId};
use crate::tier::Tier;

#[derive(Debug, Clone, Copy)]
pub struct StoreKeys;

impl StoreKeys {
    pub fn task(id: TaskId) -> String {
        format!("task:{id}")
    }

    pub fn message(message_id: &str) -> String {
        format!("msg:{message_id}")
    }

    /// `queue:{pool}:{priority}` for the shared lane, with `:{bot}` appended
    /// for a private affinity lane.
    pub fn queue(route: &RouteLabel) -> String {
        let shared = Self::shared_queue(&route.pool, route.priority);
        match &route.bot_id {
            Some(bot) => format!("{shared}:{bot}"),
            None => shared,
        }
    }

    pub fn shared_queue(pool: &str, priority: Priority) -> String {
        format!("queue:{pool}:{priority}")
    }

    pub fn ticket(pool: &str, tier: Tier, bot_id: &str) -> String {
        format!("{}{bot_id}", Self::ticket_prefix(pool, tier))
    }

    pub fn ticket_prefix(pool: &str, tier: Tier) -> String {
        format!("ticket:{pool}:{tier}:")
    }
}
