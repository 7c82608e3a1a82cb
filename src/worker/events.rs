//! Inbound protocol events: annotations first, then status text.

use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;

use super::worker::Worker;
use crate::classifier::{Annotation, Outcome, StatusText, classify};
use crate::error::{CaptchaError, CorrelationError, Error, TaskError, WorkerError};
use crate::gateway::{EPHEMERAL_FLAG, GatewayEvent, InboundMessage};
use crate::task::{Deliverable, Task, TaskId};

/// Attempts at a human-verification challenge when the solver is unreachable.
const CAPTCHA_TRIALS: usize = 2;

impl Worker {
    /// Apply one inbound create/edit event.
    pub async fn handle_event(&mut self, event: GatewayEvent) -> Result<(), Error> {
        let message = event.message();
        if message.channel_id != self.identity.channel_id {
            return Ok(());
        }
        tracing::debug!(
            message_id = %message.id,
            edit = event.is_edit(),
            embeds = message.embeds.len(),
            attachments = message.attachments.len(),
            "Inbound message"
        );

        for embed in &message.embeds {
            let annotation = classify(embed);
            let outcome = match annotation.outcome() {
                Some(outcome) => {
                    self.apply_annotation(&annotation, message).await;
                    outcome
                }
                None => self.resolve_error_card(&annotation, message).await?,
            };
            match outcome {
                Outcome::Continue => {}
                Outcome::Retry => return self.retry_message_task(message).await,
                Outcome::Abort => return Ok(()),
            }
        }

        self.apply_status_text(message, event.is_edit()).await
    }

    /// Side effects of an annotation whose outcome does not depend on the task.
    async fn apply_annotation(&mut self, annotation: &Annotation, message: &InboundMessage) {
        let now = Instant::now();
        match annotation {
            Annotation::HumanVerification { image_url } => {
                self.solve_challenge(image_url.as_deref(), message).await;
            }
            Annotation::QueueFull => {
                self.hold_admission(self.outstanding + 1, now);
                tracing::warn!(outstanding = self.outstanding, "Service queue is full");
                self.probe().await;
            }
            Annotation::ThirdPartyAck => match message.button_by_label("Ack") {
                Some(button) => {
                    if let Err(e) = self
                        .deps
                        .gateway
                        .press_action(&message.id, &button.custom_id, EPHEMERAL_FLAG)
                        .await
                    {
                        tracing::warn!(error = %e, "Acknowledgement failed");
                    }
                }
                None => tracing::error!(message_id = %message.id, "No acknowledge button on notice"),
            },
            Annotation::Banned { until } => {
                let remaining = match until {
                    Some(until) => (*until - Utc::now()).to_std().unwrap_or(Duration::ZERO),
                    None => self.deps.config.default_ban,
                };
                let suspension = WorkerError::Suspended {
                    reason: format!("banned for {}s", remaining.as_secs()),
                };
                tracing::error!(error = %suspension, "Going offline");
                self.tier.go_offline("banned", Some(now + remaining));
                self.sync_state();
                self.alert(&format!("was banned, sleeping for {}h", remaining.as_secs() / 3600))
                    .await;
            }
            Annotation::BillingHold { reason } => {
                let suspension = WorkerError::Suspended {
                    reason: reason.clone(),
                };
                tracing::error!(error = %suspension, "Going offline");
                self.tier.go_offline("billing hold", None);
                self.sync_state();
                self.alert(reason).await;
            }
            Annotation::FastBudgetExhausted => match self.tier.fast_budget_exhausted(now) {
                Some(mode) => self.switch_mode(mode).await,
                None => {
                    self.sync_state();
                    self.alert("ran out of fast hours").await;
                }
            },
            Annotation::Subscription(info) => {
                tracing::info!(
                    tier = %info.tier,
                    queue_depth = info.queue_depth,
                    fast_budget_secs = info.remaining_fast_budget.as_secs(),
                    "Status probe answered"
                );
                self.tier.apply_info(info, now);
                self.hold_admission(info.queue_depth, now);
                self.sync_state();
            }
            Annotation::Blank | Annotation::Other { .. } => {}
        }
    }

    async fn solve_challenge(&self, image_url: Option<&str>, message: &InboundMessage) {
        let Some(image_url) = image_url else {
            tracing::error!(message_id = %message.id, "Challenge without an image");
            return;
        };
        let labels: Vec<String> = message.components.iter().map(|b| b.label.clone()).collect();

        for _ in 0..CAPTCHA_TRIALS {
            let label = match self.deps.captcha.solve(image_url, &labels).await {
                Ok(label) => label,
                Err(CaptchaError::RequestFailed(e)) => {
                    tracing::warn!(error = %e, "Captcha solver unreachable");
                    continue;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Challenge not solved");
                    return;
                }
            };
            let Some(button) = message.components.iter().find(|b| b.label == label) else {
                return;
            };
            match self
                .deps
                .gateway
                .press_action(&message.id, &button.custom_id, EPHEMERAL_FLAG)
                .await
            {
                Ok(_) => tracing::info!(label = %label, "Challenge answered"),
                Err(e) => tracing::error!(error = %e, "Challenge answer rejected"),
            }
            return;
        }
    }

    /// A card no rule recognises: fail its task unless the message still
    /// shows the job running.
    async fn resolve_error_card(
        &mut self,
        annotation: &Annotation,
        message: &InboundMessage,
    ) -> Result<Outcome, Error> {
        let Some(task_id) = self.resolve(message).await? else {
            return Ok(Outcome::Abort);
        };
        if StatusText::parse(message).shows_progress() {
            return Ok(Outcome::Continue);
        }

        let description = match annotation {
            Annotation::Other { description } => description.clone(),
            other => format!("{other:?}"),
        };
        let mut task = self.deps.tasks.get(task_id).await?;
        if !task.status.is_terminal() {
            tracing::warn!(task_id = %task_id, error = %description, "Task failed on the service");
            task.mark_failure(description)?;
            self.deps.tasks.put(&task).await?;
        }
        self.in_flight.remove(&task_id);
        Ok(Outcome::Abort)
    }

    /// Return the message's task to the shared queue and drop it here.
    async fn retry_message_task(&mut self, message: &InboundMessage) -> Result<(), Error> {
        let Some(task_id) = self.resolve(message).await? else {
            return Ok(());
        };
        self.in_flight.remove(&task_id);
        let mut task = self.deps.tasks.get(task_id).await?;
        if task.status.is_terminal() {
            return Ok(());
        }
        if task.is_generation() {
            self.return_to_queue(task).await
        } else {
            task.mark_failure("follow-up rejected by the service")?;
            self.deps.tasks.put(&task).await?;
            Ok(())
        }
    }

    /// Status heuristics over the message text and attachments.
    ///
    /// Only a newly created message completes a task. Edits carry progress
    /// and the stopped marker; the service also edits a grid when one of its
    /// buttons is pressed, and that edit still shows the grid's attachment.
    async fn apply_status_text(&mut self, message: &InboundMessage, is_edit: bool) -> Result<(), Error> {
        let status = StatusText::parse(message);
        if !status.shows_progress() && !status.stopped {
            return Ok(());
        }
        let Some(task_id) = self.resolve(message).await? else {
            return Ok(());
        };

        if let Some(mode) = &status.mode
            && mode != self.tier.mode().annotation()
        {
            tracing::warn!(reported = %mode, believed = %self.tier.mode(), task_id = %task_id, "Mode anomaly");
        }

        let mut task = self.deps.tasks.get(task_id).await?;
        if is_edit
            && task
                .source
                .as_ref()
                .is_some_and(|source| source.message_id == message.id)
        {
            tracing::debug!(task_id = %task_id, message_id = %message.id, "Ignoring edit of the source grid");
            return Ok(());
        }

        let result = if status.stopped {
            self.in_flight.remove(&task_id);
            task.mark_failure("stopped by the service")
        } else if let Some(attachment) = message.attachments.first().filter(|_| !is_edit) {
            task.protocol_message_id = Some(message.id.clone());
            let deliverable = Deliverable {
                url: attachment.url.clone(),
                filename: attachment.filename.clone(),
            };
            self.in_flight.remove(&task_id);
            self.finished(&task);
            task.mark_success(deliverable)
        } else if status.waiting {
            task.mark_pending(Some(message.id.clone()))
        } else if status.ready {
            task.set_progress(100)
        } else if let Some(progress) = status.progress {
            task.set_progress(progress)
        } else {
            Ok(())
        };

        match result {
            Ok(()) => {
                self.deps.tasks.put(&task).await?;
                tracing::debug!(task_id = %task_id, status = %task.status, progress = ?task.progress, "Task updated");
                if task.status.is_terminal() {
                    tracing::info!(task_id = %task_id, status = %task.status, in_flight = self.in_flight.len(), "Task finished");
                }
                Ok(())
            }
            // Late edits for a finished task.
            Err(TaskError::InvalidTransition { .. }) => {
                tracing::debug!(task_id = %task_id, status = %task.status, "Ignoring stale update");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// A successful delivery resets the eviction breaker.
    fn finished(&mut self, task: &Task) {
        if self.evictions > 0 || self.strict_age {
            tracing::debug!(task_id = %task.id, "Eviction counters reset");
        }
        self.evictions = 0;
        self.strict_age = false;
    }

    /// Correlate, treating an unresolved message as unrelated.
    async fn resolve(&self, message: &InboundMessage) -> Result<Option<TaskId>, Error> {
        let in_flight = self.in_flight.ids();
        match self.correlation.resolve(message, &in_flight).await {
            Ok(resolved) => {
                tracing::trace!(task_id = %resolved.task_id, via = ?resolved.via, "Message resolved");
                Ok(Some(resolved.task_id))
            }
            Err(CorrelationError::Unresolved { message_id }) => {
                tracing::debug!(message_id = %message_id, "Message matches no task");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}
