//! Interpreting structured annotations (embeds) and status text on inbound
//! messages.
//!
//! Classification here is pure; the worker applies the side effects.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::gateway::{Embed, InboundMessage};
use crate::tier::{WorkerInfo, is_subscription_card, parse_info};

static TIMESTAMP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<t:(\d+)(?::[a-zA-Z])?>").expect("valid timestamp pattern"));
static PROGRESS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\((\d+)%\)").expect("valid progress pattern"));
static MODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(([a-z]+), ([a-z]+)\)").expect("valid mode pattern"));

/// What an embed means.
#[derive(Debug, Clone, PartialEq)]
pub enum Annotation {
    /// Human-verification challenge with selectable answers.
    HumanVerification { image_url: Option<String> },
    /// The identity's job queue on the service is full.
    QueueFull,
    /// Third-party content notice that must be acknowledged.
    ThirdPartyAck,
    /// Access blocked; `until` is the stated end, if any.
    Banned { until: Option<DateTime<Utc>> },
    /// Billing hold, paused or expiring subscription.
    BillingHold { reason: String },
    /// Fast budget ran out mid-job.
    FastBudgetExhausted,
    /// Status-probe answer.
    Subscription(WorkerInfo),
    /// Embed with no text.
    Blank,
    /// Anything else, e.g. a job-level error card.
    Other { description: String },
}

/// What happens to the message (and its task) after classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Carry on with status-text handling.
    Continue,
    /// Return the task to the shared queue and drop it from this worker.
    Retry,
    /// Stop processing this message.
    Abort,
}

impl Annotation {
    /// Outcome for every annotation except `Other`, whose outcome depends on
    /// whether the message resolves to a task.
    pub fn outcome(&self) -> Option<Outcome> {
        match self {
            Self::HumanVerification { .. } | Self::Blank => Some(Outcome::Continue),
            Self::QueueFull
            | Self::ThirdPartyAck
            | Self::Banned { .. }
            | Self::BillingHold { .. }
            | Self::FastBudgetExhausted => Some(Outcome::Retry),
            Self::Subscription(_) => Some(Outcome::Abort),
            Self::Other { .. } => None,
        }
    }
}

/// Classify one embed.
pub fn classify(embed: &Embed) -> Annotation {
    let description = embed.description();
    if description.trim().is_empty() {
        return Annotation::Blank;
    }

    if is_subscription_card(description)
        && let Some(info) = parse_info(description)
    {
        return Annotation::Subscription(info);
    }

    let lower = description.to_lowercase();
    if lower.contains("human") {
        Annotation::HumanVerification {
            image_url: embed.image_url.clone(),
        }
    } else if lower.contains("queue is full") {
        Annotation::QueueFull
    } else if lower.contains("third-party") && lower.contains("acknowledge") {
        Annotation::ThirdPartyAck
    } else if (lower.contains("blocked") && lower.contains(" ban ")) || lower.contains("banned") {
        Annotation::Banned {
            until: parse_timestamp(description),
        }
    } else if lower.contains("billing")
        || lower.contains("paused")
        || (lower.contains("subscription") && lower.contains("expir"))
    {
        Annotation::BillingHold {
            reason: description.to_string(),
        }
    } else if lower.contains("fast hours")
        && (lower.contains("run out") || lower.contains("ran out") || lower.contains("used up"))
    {
        Annotation::FastBudgetExhausted
    } else {
        Annotation::Other {
            description: description.to_string(),
        }
    }
}

/// First `<t:unix>` marker in `text`.
fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let secs: i64 = TIMESTAMP.captures(text)?.get(1)?.as_str().parse().ok()?;
    DateTime::from_timestamp(secs, 0)
}

/// Status markers found in a message's text and attachments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusText {
    /// "Waiting to start".
    pub waiting: bool,
    /// "Open on website" marker or an attachment.
    pub ready: bool,
    /// Terminal "(Stopped)" suffix.
    pub stopped: bool,
    pub progress: Option<u8>,
    /// Mode token of a `(fast, stealth)`-style annotation.
    pub mode: Option<String>,
}

impl StatusText {
    pub fn parse(message: &InboundMessage) -> Self {
        let content = message.content.as_str();
        Self {
            waiting: content.contains("Waiting to start"),
            ready: content.contains("Open on website") || !message.attachments.is_empty(),
            stopped: content.trim_end().ends_with("(Stopped)"),
            progress: PROGRESS
                .captures(content)
                .and_then(|c| c.get(1)?.as_str().parse::<u8>().ok())
                .map(|p| p.min(100)),
            mode: MODE
                .captures(content)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string()),
        }
    }

    /// The message shows the job is still running.
    pub fn shows_progress(&self) -> bool {
        self.waiting || self.ready || self.progress.is_some()
    }
}
