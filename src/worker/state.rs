//! Worker lifecycle state machine.

use serde::{Deserialize, Serialize};

/// Lifecycle of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Waiting out the startup jitter and the first status probe.
    Starting,
    /// Pulling work.
    Online,
    /// Suspended; in-flight tasks are still tracked for eviction.
    Offline,
    /// Loop exited.
    Stopped,
}

impl WorkerState {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: WorkerState) -> bool {
        use WorkerState::*;

        matches!(
            (self, target),
            (Starting, Online) | (Starting, Offline) | (Starting, Stopped) |
            (Online, Offline) | (Online, Stopped) |
            (Offline, Online) | (Offline, Stopped)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped)
    }
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Starting => "starting",
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn online_offline_cycle() {
        assert!(WorkerState::Starting.can_transition_to(WorkerState::Online));
        assert!(WorkerState::Online.can_transition_to(WorkerState::Offline));
        assert!(WorkerState::Offline.can_transition_to(WorkerState::Online));
    }

    #[test]
    fn stopped_is_final() {
        for s in [
            WorkerState::Starting,
            WorkerState::Online,
            WorkerState::Offline,
        ] {
            assert!(s.can_transition_to(WorkerState::Stopped));
            assert!(!WorkerState::Stopped.can_transition_to(s));
        }
        assert!(WorkerState::Stopped.is_terminal());
        assert!(!WorkerState::Offline.is_terminal());
    }

    #[test]
    fn never_back_to_starting() {
        assert!(!WorkerState::Online.can_transition_to(WorkerState::Starting));
        assert!(!WorkerState::Offline.can_transition_to(WorkerState::Starting));
    }

    #[test]
    fn display() {
        assert_eq!(WorkerState::Offline.to_string(), "offline");
        assert_eq!(serde_json::to_string(&WorkerState::Online).unwrap(), "\"online\"");
    }
}
