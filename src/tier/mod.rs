//! Worker tiers, quota snapshots and tier switching.

pub mod info;
pub mod manager;

use serde::{Deserialize, Serialize};

pub use info::{WorkerInfo, is_subscription_card, parse_info};
pub use manager::{Census, TierManager, TierSettings};

/// Throughput class a worker is currently serving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Offline,
    Relaxed,
    Fast,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Offline => "offline",
            Self::Relaxed => "relaxed",
            Self::Fast => "fast",
        };
        write!(f, "{s}")
    }
}

/// Generation mode selectable on the service. `Offline` is not a mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Relaxed,
    Fast,
}

impl Mode {
    /// Token the service prints in progress annotations, e.g. `(fast, stealth)`.
    pub fn annotation(&self) -> &'static str {
        match self {
            Self::Relaxed => "relaxed",
            Self::Fast => "fast",
        }
    }
}

impl From<Mode> for Tier {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Relaxed => Tier::Relaxed,
            Mode::Fast => Tier::Fast,
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.annotation())
    }
}
