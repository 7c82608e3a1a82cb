//! `WorkerInfo`: quota snapshot parsed from the service's subscription card.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{Mode, Tier};

/// Per-worker quota snapshot. Lives only in the worker's memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub tier: Tier,
    /// Jobs the service already holds for this identity in its current mode.
    pub queue_depth: u32,
    pub remaining_fast_budget: Duration,
    pub subscription_active: bool,
}

impl WorkerInfo {
    /// Mode reported by the service, `None` when the subscription is inactive.
    pub fn mode(&self) -> Option<Mode> {
        match self.tier {
            Tier::Fast => Some(Mode::Fast),
            Tier::Relaxed => Some(Mode::Relaxed),
            Tier::Offline => None,
        }
    }
}

/// True when an embed description is a subscription card.
pub fn is_subscription_card(description: &str) -> bool {
    description.contains("Subscription")
}

/// Parse the `**Key**: value` lines of a subscription card.
///
/// Returns `None` when the card carries no `Job Mode` line.
pub fn parse_info(description: &str) -> Option<WorkerInfo> {
    let fields: HashMap<String, &str> = description
        .lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().replace('*', ""), v.trim()))
        .collect();

    let mode = if fields.get("Job Mode")?.contains("Relax") {
        Mode::Relaxed
    } else {
        Mode::Fast
    };
    let queue_key = match mode {
        Mode::Fast => "Queued Jobs (fast)",
        Mode::Relaxed => "Queued Jobs (relax)",
    };
    let queue_depth = fields
        .get(queue_key)
        .and_then(|v| v.split_whitespace().next())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    // "12.5/15.0 hours (83.33%)"
    let hours = fields
        .get("Fast Time Remaining")
        .and_then(|v| v.split('/').next())
        .and_then(|v| v.trim().parse::<f64>().ok())
        .unwrap_or(0.0);
    let remaining_fast_budget = Duration::from_secs_f64((hours * 3600.0).max(0.0));

    let subscription_active = fields.get("Subscription").is_some_and(|v| {
        let v = v.to_lowercase();
        !["inactive", "paused", "expired", "cancel"]
            .iter()
            .any(|w| v.contains(w))
    });

    Some(WorkerInfo {
        tier: if subscription_active {
            mode.into()
        } else {
            Tier::Offline
        },
        queue_depth,
        remaining_fast_budget,
        subscription_active,
    })
}
