//! `TierManager`: fast/relaxed hysteresis, peer assist and offline suspension.
//!
//! Each worker owns one manager and feeds it status-probe results and queue
//! census counts. The manager only decides; the worker sends the mode-switch
//! command it returns.

use std::time::Duration;

use tokio::time::Instant;

use super::{Mode, Tier, WorkerInfo};

/// Tunables for tier switching.
#[derive(Debug, Clone, Copy)]
pub struct TierSettings {
    /// Fast budget below which a fast worker must drop to relaxed.
    pub floor: Duration,
    /// Minimum spacing between two mode switches.
    pub settle: Duration,
}

impl Default for TierSettings {
    fn default() -> Self {
        Self {
            floor: Duration::from_secs(15_000),
            settle: Duration::from_secs(10),
        }
    }
}

/// Queue depth and live-ticket counts for one pool.
///
/// "Expedited" covers VIP/High lanes, "standard" Normal/Low.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Census {
    pub expedited_depth: u64,
    pub expedited_tickets: u64,
    pub standard_depth: u64,
    pub standard_tickets: u64,
}

impl Census {
    pub fn standard_backlogged(&self) -> bool {
        self.standard_depth > self.standard_tickets
    }

    pub fn expedited_backlogged(&self) -> bool {
        self.expedited_depth > self.expedited_tickets
    }

    /// Live fast workers exceed fast work with one to spare beyond the caller.
    pub fn expedited_slack(&self) -> bool {
        self.expedited_tickets > self.expedited_depth + 1
    }

    pub fn standard_slack(&self) -> bool {
        self.standard_tickets > self.standard_depth + 1
    }
}

#[derive(Debug, Clone)]
struct Suspension {
    reason: String,
    until: Option<Instant>,
}

/// Tier state of a single worker.
#[derive(Debug)]
pub struct TierManager {
    settings: TierSettings,
    mode: Mode,
    budget: Option<Duration>,
    /// Mode held before a peer-assist switch; set while the assist is active.
    assist_from: Option<Mode>,
    suspension: Option<Suspension>,
    last_switch: Option<Instant>,
}

impl TierManager {
    pub fn new(mode: Mode, settings: TierSettings) -> Self {
        Self {
            settings,
            mode,
            budget: None,
            assist_from: None,
            suspension: None,
            last_switch: None,
        }
    }

    pub fn tier(&self) -> Tier {
        if self.suspension.is_some() {
            Tier::Offline
        } else {
            self.mode.into()
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn is_offline(&self) -> bool {
        self.suspension.is_some()
    }

    pub fn offline_reason(&self) -> Option<&str> {
        self.suspension.as_ref().map(|s| s.reason.as_str())
    }

    pub fn remaining_fast_budget(&self) -> Option<Duration> {
        self.budget
    }

    pub fn is_assisting(&self) -> bool {
        self.assist_from.is_some()
    }

    // ── Inputs ──────────────────────────────────────────────────────

    /// Fold in a status-probe result.
    ///
    /// An active subscription clears any suspension; an inactive one
    /// suspends the worker until the next probe.
    pub fn apply_info(&mut self, info: &WorkerInfo, now: Instant) {
        self.budget = Some(info.remaining_fast_budget);
        if !info.subscription_active {
            self.go_offline("subscription inactive", None);
            return;
        }
        self.suspension = None;
        if let Some(mode) = info.mode()
            && mode != self.mode
            && !self.settling(now)
        {
            tracing::info!(believed = %self.mode, reported = %mode, "Adopting mode reported by service");
            self.mode = mode;
            self.assist_from = None;
        }
    }

    /// Stop pulling work until `until` (or the next active status probe).
    pub fn go_offline(&mut self, reason: impl Into<String>, until: Option<Instant>) {
        self.suspension = Some(Suspension {
            reason: reason.into(),
            until,
        });
    }

    /// Clear a timed suspension whose wake time has passed.
    pub fn wake_if_due(&mut self, now: Instant) -> bool {
        let due = self
            .suspension
            .as_ref()
            .and_then(|s| s.until)
            .is_some_and(|until| until <= now);
        if due {
            self.suspension = None;
        }
        due
    }

    /// The service said the fast budget ran out mid-job.
    ///
    /// A fast worker drops to relaxed immediately (returned as the switch to
    /// send); a relaxed worker is suspended.
    pub fn fast_budget_exhausted(&mut self, now: Instant) -> Option<Mode> {
        self.budget = Some(Duration::ZERO);
        self.assist_from = None;
        match self.mode {
            Mode::Fast => {
                self.switch(Mode::Relaxed, now);
                Some(Mode::Relaxed)
            }
            Mode::Relaxed => {
                self.go_offline("fast budget exhausted", None);
                None
            }
        }
    }

    // ── Decisions ───────────────────────────────────────────────────

    /// Decide whether to switch modes now. Returns the mode to switch to.
    ///
    /// Budget rules win over peer assist. No switch happens inside the settle
    /// window of the previous one, so a budget hovering at the floor flips at
    /// most once per window.
    pub fn evaluate(&mut self, census: Option<&Census>, now: Instant) -> Option<Mode> {
        if self.is_offline() || self.settling(now) {
            return None;
        }
        let target = self.target(census)?;
        if target == self.mode {
            return None;
        }
        self.switch(target, now);
        Some(target)
    }

    fn target(&mut self, census: Option<&Census>) -> Option<Mode> {
        let floor = self.settings.floor;
        let budget = self.budget;
        let below_floor = budget.is_some_and(|b| b < floor);
        let clears_floor = budget.is_some_and(|b| b >= floor);
        let above_upper = budget.is_some_and(|b| b.as_secs_f64() > 1.5 * floor.as_secs_f64());

        if self.mode == Mode::Fast && below_floor {
            self.assist_from = None;
            return Some(Mode::Relaxed);
        }

        if let Some(from) = self.assist_from {
            let still_needed = census.is_none_or(|c| match self.mode {
                Mode::Relaxed => c.standard_backlogged(),
                Mode::Fast => c.expedited_backlogged(),
            });
            if still_needed {
                return None;
            }
            tracing::info!(returning_to = %from, "Peer assist no longer needed");
            self.assist_from = None;
            return Some(from);
        }

        if self.mode == Mode::Relaxed && above_upper {
            return Some(Mode::Fast);
        }

        let census = census?;
        match self.mode {
            Mode::Fast if census.standard_backlogged() && census.expedited_slack() => {
                tracing::info!(?census, "Demoting to relieve standard backlog");
                self.assist_from = Some(Mode::Fast);
                Some(Mode::Relaxed)
            }
            Mode::Relaxed
                if clears_floor && census.expedited_backlogged() && census.standard_slack() =>
            {
                tracing::info!(?census, "Promoting to relieve expedited backlog");
                self.assist_from = Some(Mode::Relaxed);
                Some(Mode::Fast)
            }
            _ => None,
        }
    }

    fn settling(&self, now: Instant) -> bool {
        self.last_switch
            .is_some_and(|at| now.saturating_duration_since(at) < self.settings.settle)
    }

    fn switch(&mut self, mode: Mode, now: Instant) {
        self.mode = mode;
        self.last_switch = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FLOOR: Duration = Duration::from_secs(15_000);
    const SETTLE: Duration = Duration::from_secs(10);

    fn manager(mode: Mode) -> TierManager {
        TierManager::new(
            mode,
            TierSettings {
                floor: FLOOR,
                settle: SETTLE,
            },
        )
    }

    fn info(mode: Mode, budget_secs: u64) -> WorkerInfo {
        WorkerInfo {
            tier: mode.into(),
            queue_depth: 0,
            remaining_fast_budget: Duration::from_secs(budget_secs),
            subscription_active: true,
        }
    }

    #[test]
    fn fast_below_floor_drops_to_relaxed() {
        let now = Instant::now();
        let mut m = manager(Mode::Fast);
        m.apply_info(&info(Mode::Fast, 14_999), now);
        assert_eq!(m.evaluate(None, now), Some(Mode::Relaxed));
        assert_eq!(m.tier(), Tier::Relaxed);
    }

    #[test]
    fn relaxed_above_upper_band_goes_fast() {
        let now = Instant::now();
        let mut m = manager(Mode::Relaxed);
        m.apply_info(&info(Mode::Relaxed, 22_501), now);
        assert_eq!(m.evaluate(None, now), Some(Mode::Fast));
    }

    #[test]
    fn relaxed_inside_band_stays() {
        let now = Instant::now();
        let mut m = manager(Mode::Relaxed);
        m.apply_info(&info(Mode::Relaxed, 20_000), now);
        assert_eq!(m.evaluate(None, now), None);
        assert_eq!(m.mode(), Mode::Relaxed);
    }

    #[test]
    fn settle_window_limits_flips() {
        let start = Instant::now();
        let mut m = manager(Mode::Fast);
        m.apply_info(&info(Mode::Fast, 14_000), start);
        assert_eq!(m.evaluate(None, start), Some(Mode::Relaxed));

        // Budget jumps back up immediately; no flip inside the window.
        m.apply_info(&info(Mode::Relaxed, 30_000), start);
        assert_eq!(m.evaluate(None, start + Duration::from_secs(5)), None);
        assert_eq!(m.mode(), Mode::Relaxed);

        assert_eq!(
            m.evaluate(None, start + SETTLE + Duration::from_secs(1)),
            Some(Mode::Fast)
        );
    }

    #[test]
    fn fast_worker_assists_standard_backlog() {
        let now = Instant::now();
        let mut m = manager(Mode::Fast);
        m.apply_info(&info(Mode::Fast, 40_000), now);
        let census = Census {
            expedited_depth: 0,
            expedited_tickets: 3,
            standard_depth: 10,
            standard_tickets: 1,
        };
        assert_eq!(m.evaluate(Some(&census), now), Some(Mode::Relaxed));
        assert!(m.is_assisting());

        // Plenty of budget, but the downgrade is pending: no promotion.
        let later = now + SETTLE * 2;
        assert_eq!(m.evaluate(Some(&census), later), None);

        // Backlog drained: return to fast.
        let drained = Census {
            standard_depth: 0,
            ..census
        };
        assert_eq!(m.evaluate(Some(&drained), later), Some(Mode::Fast));
        assert!(!m.is_assisting());
    }

    #[test]
    fn no_demotion_without_spare_fast_capacity() {
        let now = Instant::now();
        let mut m = manager(Mode::Fast);
        m.apply_info(&info(Mode::Fast, 40_000), now);
        let census = Census {
            expedited_depth: 1,
            expedited_tickets: 2,
            standard_depth: 10,
            standard_tickets: 1,
        };
        assert_eq!(m.evaluate(Some(&census), now), None);
    }

    #[test]
    fn relaxed_worker_promotes_only_above_floor() {
        let now = Instant::now();
        let census = Census {
            expedited_depth: 8,
            expedited_tickets: 1,
            standard_depth: 0,
            standard_tickets: 4,
        };

        let mut poor = manager(Mode::Relaxed);
        poor.apply_info(&info(Mode::Relaxed, 10_000), now);
        assert_eq!(poor.evaluate(Some(&census), now), None);

        let mut able = manager(Mode::Relaxed);
        able.apply_info(&info(Mode::Relaxed, 16_000), now);
        assert_eq!(able.evaluate(Some(&census), now), Some(Mode::Fast));
    }

    #[test]
    fn floor_overrides_active_assist() {
        let now = Instant::now();
        let mut m = manager(Mode::Relaxed);
        m.apply_info(&info(Mode::Relaxed, 16_000), now);
        let census = Census {
            expedited_depth: 8,
            expedited_tickets: 1,
            standard_depth: 0,
            standard_tickets: 4,
        };
        assert_eq!(m.evaluate(Some(&census), now), Some(Mode::Fast));

        let later = now + SETTLE * 2;
        m.apply_info(&info(Mode::Fast, 1_000), later);
        assert_eq!(m.evaluate(Some(&census), later), Some(Mode::Relaxed));
        assert!(!m.is_assisting());
    }

    #[test]
    fn offline_until_wake_time() {
        let now = Instant::now();
        let mut m = manager(Mode::Fast);
        m.go_offline("banned", Some(now + Duration::from_secs(60)));
        assert_eq!(m.tier(), Tier::Offline);
        assert!(!m.wake_if_due(now + Duration::from_secs(30)));
        assert!(m.wake_if_due(now + Duration::from_secs(61)));
        assert_eq!(m.tier(), Tier::Fast);
    }

    #[test]
    fn active_probe_clears_suspension() {
        let now = Instant::now();
        let mut m = manager(Mode::Relaxed);
        m.go_offline("billing hold", None);
        m.apply_info(&info(Mode::Relaxed, 0), now);
        assert!(!m.is_offline());
    }

    #[test]
    fn inactive_probe_suspends() {
        let now = Instant::now();
        let mut m = manager(Mode::Fast);
        let mut i = info(Mode::Fast, 40_000);
        i.subscription_active = false;
        i.tier = Tier::Offline;
        m.apply_info(&i, now);
        assert_eq!(m.tier(), Tier::Offline);
        assert_eq!(m.evaluate(None, now), None);
    }

    #[test]
    fn budget_exhausted_demotes_then_suspends() {
        let now = Instant::now();
        let mut m = manager(Mode::Fast);
        assert_eq!(m.fast_budget_exhausted(now), Some(Mode::Relaxed));
        assert_eq!(m.tier(), Tier::Relaxed);

        assert_eq!(m.fast_budget_exhausted(now), None);
        assert_eq!(m.tier(), Tier::Offline);
    }
}
