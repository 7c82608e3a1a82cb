//! Per-identity dispatch loop.
//!
//! A worker owns one protocol identity. Its loop ticks every second: evict
//! stale in-flight tasks, re-evaluate the tier, write a capacity ticket and,
//! capacity permitting, claim one task from the queues and dispatch it.
//! Inbound protocol events are handled on the same loop (see `events.rs`)
//! whenever the tick is not running.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::Instrument;

use crate::alert::{Notifier, format_alert};
use crate::captcha::CaptchaSolver;
use crate::config::WorkerConfig;
use crate::correlation::CorrelationEngine;
use crate::error::{Error, TaskError, WorkerError};
use crate::gateway::{GatewayEvent, OutboundCommand, ProtocolGateway, action_id};
use crate::queue::{QueueRouter, scan_order};
use crate::store::TaskStore;
use crate::task::{RouteLabel, Task, TaskId, TaskStatus, asset_id_from_filename};
use crate::tier::{Mode, TierManager};
use crate::worker::identity::BotIdentity;
use crate::worker::inflight::InFlight;
use crate::worker::state::WorkerState;

/// A status probe is also sent after this many dispatches.
const PROBE_EVERY_DISPATCHES: u64 = 10;

/// Dependencies shared by every worker.
#[derive(Clone)]
pub struct WorkerDeps {
    pub tasks: TaskStore,
    pub queue: QueueRouter,
    pub gateway: Arc<dyn ProtocolGateway>,
    pub captcha: Arc<dyn CaptchaSolver>,
    pub notifier: Arc<dyn Notifier>,
    pub config: WorkerConfig,
}

/// Dispatch loop for a single identity.
pub struct Worker {
    pub(super) identity: Arc<BotIdentity>,
    pub(super) deps: WorkerDeps,
    pub(super) correlation: CorrelationEngine,
    pub(super) state: WorkerState,
    pub(super) tier: TierManager,
    pub(super) in_flight: InFlight,
    /// Jobs the service holds for this identity beyond what it runs.
    pub(super) outstanding: u32,
    /// When a non-zero `outstanding` stops blocking admission.
    hold_until: Option<Instant>,
    /// Sweeps that evicted something since the last success.
    pub(super) evictions: u32,
    /// A relaxed worker shortens its max task age after an eviction.
    pub(super) strict_age: bool,
    cooldown_until: Option<Instant>,
    dispatched: u64,
}

impl Worker {
    pub fn new(identity: Arc<BotIdentity>, deps: WorkerDeps) -> Self {
        let mode = if identity.high_priority {
            Mode::Fast
        } else {
            Mode::Relaxed
        };
        let tier = TierManager::new(mode, deps.config.tier_settings());
        Self {
            correlation: CorrelationEngine::new(deps.tasks.clone()),
            identity,
            deps,
            state: WorkerState::Starting,
            tier,
            in_flight: InFlight::new(),
            outstanding: 0,
            hold_until: None,
            evictions: 0,
            strict_age: false,
            cooldown_until: None,
            dispatched: 0,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub(super) fn name(&self) -> &str {
        self.identity.display_name()
    }

    /// Run until the event channel closes or the eviction breaker trips.
    pub async fn run(self, events: mpsc::Receiver<GatewayEvent>) -> Result<(), WorkerError> {
        let span = tracing::info_span!("worker", bot = %self.identity.display_name());
        self.run_inner(events).instrument(span).await
    }

    async fn run_inner(mut self, mut events: mpsc::Receiver<GatewayEvent>) -> Result<(), WorkerError> {
        let jitter = {
            let max = self.deps.config.startup_jitter.as_millis() as u64;
            Duration::from_millis(rand::thread_rng().gen_range(0..=max))
        };
        tracing::info!(id = %self.identity.id, pool = %self.identity.pool, ?jitter, "Worker starting");
        tokio::time::sleep(jitter).await;
        self.probe().await;
        self.sync_state();

        let config = &self.deps.config;
        let mut tick = tokio::time::interval(config.tick);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut probe = tokio::time::interval_at(
            Instant::now() + config.probe_interval,
            config.probe_interval,
        );

        let result = loop {
            tokio::select! {
                _ = tick.tick() => match self.on_tick().await {
                    Ok(()) => {}
                    Err(Error::Worker(e @ WorkerError::TooManyEvictions { .. })) => {
                        tracing::error!(error = %e, "Worker stopping");
                        break Err(e);
                    }
                    Err(e) => tracing::error!(error = %e, "Dispatch tick failed"),
                },
                _ = probe.tick() => self.probe().await,
                event = events.recv() => match event {
                    Some(event) => {
                        if let Err(e) = self.handle_event(event).await {
                            tracing::warn!(error = %e, "Inbound event handling failed");
                        }
                    }
                    None => {
                        tracing::info!("Event channel closed");
                        break Ok(());
                    }
                },
            }
        };

        self.set_state(WorkerState::Stopped);
        result
    }

    /// One dispatch-loop iteration.
    pub(super) async fn on_tick(&mut self) -> Result<(), Error> {
        let now = Instant::now();
        if self.tier.wake_if_due(now) {
            tracing::info!("Suspension elapsed");
            self.probe().await;
        }

        self.sweep(now).await?;
        self.sync_state();
        if self.tier.is_offline() {
            return Ok(());
        }

        let pool = self.identity.pool.clone();
        let census = match self.deps.queue.census(&pool).await {
            Ok(census) => Some(census),
            Err(e) => {
                tracing::warn!(error = %e, "Queue census unavailable");
                None
            }
        };
        if let Some(mode) = self.tier.evaluate(census.as_ref(), now) {
            self.switch_mode(mode).await;
        }
        self.deps
            .queue
            .ticket(&pool, self.tier.tier(), &self.identity.id)
            .await?;

        if self.cooldown_until.is_some_and(|until| now < until) {
            return Ok(());
        }
        let capacity = self.deps.config.capacity(self.tier.mode());
        if self.in_flight.len() >= capacity {
            tracing::debug!(in_flight = self.in_flight.len(), capacity, "At capacity");
            return Ok(());
        }
        if self.outstanding > 0 {
            if self.hold_until.is_some_and(|until| now < until) {
                tracing::debug!(outstanding = self.outstanding, "Service queue not empty, holding admission");
                return Ok(());
            }
            tracing::info!(outstanding = self.outstanding, "Admission hold expired");
            self.hold_admission(0, now);
        }

        self.admit(now).await
    }

    /// Fail in-flight tasks older than the tier's max age.
    async fn sweep(&mut self, now: Instant) -> Result<(), Error> {
        let expired = self.in_flight.expired(self.max_task_age(), now);
        if expired.is_empty() {
            return Ok(());
        }

        for (id, age) in expired {
            self.in_flight.remove(&id);
            let reason = TaskError::Evicted { id, age };
            tracing::warn!(task_id = %id, ?age, "Evicting task");
            match self.deps.tasks.get(id).await {
                Ok(mut task) if !task.status.is_terminal() => {
                    task.mark_failure(reason.to_string())?;
                    self.deps.tasks.put(&task).await?;
                }
                Ok(_) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }

        self.evictions += 1;
        if self.tier.mode() == Mode::Relaxed {
            self.strict_age = true;
        }
        if self.evictions >= self.deps.config.max_evictions {
            return Err(WorkerError::TooManyEvictions {
                count: self.evictions,
            }
            .into());
        }
        Ok(())
    }

    pub(super) fn max_task_age(&self) -> Duration {
        let config = &self.deps.config;
        match self.tier.mode() {
            Mode::Fast => config.fast_task_age,
            Mode::Relaxed if self.strict_age => config.relaxed_task_age_strict,
            Mode::Relaxed => config.relaxed_task_age,
        }
    }

    /// Claim and dispatch at most one task.
    async fn admit(&mut self, now: Instant) -> Result<(), Error> {
        let Some(task_id) = self.claim().await? else {
            tracing::trace!("Idle");
            return Ok(());
        };

        let mut task = match self.deps.tasks.get(task_id).await {
            Ok(task) => task,
            Err(e) if e.is_not_found() => {
                tracing::warn!(task_id = %task_id, "Queued task expired before dispatch");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        if task.status != TaskStatus::New {
            return Err(WorkerError::Consistency {
                id: task.id,
                status: task.status.to_string(),
            }
            .into());
        }

        if !self.in_flight.insert(task.id, now) {
            tracing::warn!(task_id = %task.id, "Task already in flight");
        }

        if let Err(e) = self.dispatch(&task).await {
            self.dispatch_failed(task, e, now).await?;
            return Ok(());
        }

        task.route.bot_id = Some(self.identity.id.clone());
        task.mark_pending(None)?;
        self.deps.tasks.put(&task).await?;
        tracing::info!(
            task_id = %task.id,
            command = task.command.name(),
            priority = %task.route.priority,
            in_flight = self.in_flight.len(),
            "Task dispatched"
        );

        self.dispatched += 1;
        if self.dispatched % PROBE_EVERY_DISPATCHES == 0 {
            self.probe().await;
        }
        Ok(())
    }

    /// First queued id in scan order.
    async fn claim(&self) -> Result<Option<TaskId>, Error> {
        for route in scan_order(self.tier.tier(), &self.identity.pool, &self.identity.id) {
            if let Some(id) = self.deps.queue.next(&route).await? {
                tracing::debug!(task_id = %id, priority = %route.priority, private = route.bot_id.is_some(), "Claimed task");
                return Ok(Some(id));
            }
        }
        Ok(None)
    }

    async fn dispatch(&self, task: &Task) -> Result<(), Error> {
        let gateway = &self.deps.gateway;
        match task.command.action() {
            None => {
                gateway
                    .send_command(&OutboundCommand::Imagine {
                        prompt: task.prompt.clone(),
                    })
                    .await?;
            }
            Some((verb, index)) => {
                let source = task.source.as_ref().ok_or_else(|| TaskError::InvalidFlow {
                    id: task.id,
                    reason: "follow-up without a source asset".to_string(),
                })?;
                let custom_id = action_id(verb, index, asset_id_from_filename(&source.filename));
                gateway.press_action(&source.message_id, &custom_id, 0).await?;
            }
        }
        Ok(())
    }

    /// Generation tasks go back to the shared queue; follow-ups fail.
    async fn dispatch_failed(&mut self, task: Task, error: Error, now: Instant) -> Result<(), Error> {
        tracing::error!(task_id = %task.id, command = task.command.name(), error = %error, "Dispatch failed");
        self.in_flight.remove(&task.id);
        self.cooldown_until = Some(now + self.deps.config.dispatch_cooldown);

        if matches!(&error, Error::Protocol(crate::error::ProtocolError::Unauthorized)) {
            self.alert("credential was rejected").await;
        }

        if task.is_generation() {
            self.return_to_queue(task).await
        } else {
            let mut task = task;
            task.mark_failure(error.to_string())?;
            self.deps.tasks.put(&task).await?;
            Ok(())
        }
    }

    /// Put `task` back on its pool's shared lane, or fail it once it has
    /// used up its retries.
    pub(super) async fn return_to_queue(&self, mut task: Task) -> Result<(), Error> {
        match task.requeue(self.deps.config.retry_cap) {
            Ok(()) => {
                self.deps.tasks.put(&task).await?;
                let route = RouteLabel::shared(task.route.priority, task.route.pool.clone());
                self.deps.queue.push_back(task.id, &route).await?;
                tracing::info!(task_id = %task.id, attempts = task.attempts, "Task returned to queue");
            }
            Err(e @ TaskError::RetryLimitExceeded { .. }) => {
                tracing::warn!(task_id = %task.id, error = %e, "Giving up on task");
                task.mark_failure(e.to_string())?;
                self.deps.tasks.put(&task).await?;
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    /// Record the service-side queue depth. A non-zero depth holds admission
    /// until the next status answer or `queue_hold`, whichever comes first.
    pub(super) fn hold_admission(&mut self, depth: u32, now: Instant) {
        self.outstanding = depth;
        self.hold_until = (depth > 0).then(|| now + self.deps.config.queue_hold);
    }

    /// Send a status probe; the answer arrives as a subscription card.
    pub(super) async fn probe(&self) {
        if let Err(e) = self.deps.gateway.send_command(&OutboundCommand::Info).await {
            tracing::warn!(error = %e, "Status probe failed");
        }
    }

    pub(super) async fn switch_mode(&self, mode: Mode) {
        tracing::info!(mode = %mode, "Switching mode");
        if let Err(e) = self
            .deps
            .gateway
            .send_command(&OutboundCommand::switch_to(mode))
            .await
        {
            tracing::warn!(mode = %mode, error = %e, "Mode switch failed");
        }
    }

    pub(super) async fn alert(&self, text: &str) {
        let text = format_alert(self.name(), text);
        if let Err(e) = self.deps.notifier.notify(&text).await {
            tracing::error!(error = %e, "Failed to notify operators");
        }
    }

    /// Follow the tier manager's view of whether this worker is suspended.
    pub(super) fn sync_state(&mut self) {
        let target = if self.tier.is_offline() {
            WorkerState::Offline
        } else {
            WorkerState::Online
        };
        self.set_state(target);
    }

    fn set_state(&mut self, target: WorkerState) {
        if self.state == target || !self.state.can_transition_to(target) {
            return;
        }
        tracing::info!(
            from = %self.state,
            to = %target,
            reason = self.tier.offline_reason().unwrap_or(""),
            "Worker state changed"
        );
        self.state = target;
    }
}
