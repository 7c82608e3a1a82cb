//! Resolving inbound protocol messages to the tasks that caused them.
//!
//! Messages carry rendered text, never a task id. Resolution tries, in order:
//! the message's own mapping, the mapping of the message it replies to, and
//! finally a fuzzy prompt match against this worker's in-flight generations.
//! Any resolution is persisted so later edits resolve directly.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{CorrelationError, StoreError};
use crate::gateway::InboundMessage;
use crate::store::TaskStore;
use crate::task::{Task, TaskId};

static URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://\S+").expect("valid url pattern"));
static PERCENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+%").expect("valid percent pattern"));
static MODE_ANNOTATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(([a-z]+), ([a-z]+)\)").expect("valid mode pattern"));
static NON_LETTER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\P{L}+").expect("valid letter pattern"));

/// Reduce rendered text to the letters of its prompt.
///
/// Drops URLs, everything from the first progress percentage on, mode
/// annotations, everything from the first `--` flag on, then every
/// non-letter character.
pub fn normalize(text: &str) -> String {
    let text = URL.replace_all(text, "");
    let text = PERCENT.split(&text).next().unwrap_or("");
    let text = MODE_ANNOTATION.replace_all(text, "");
    let text = text.split("--").next().unwrap_or("");
    NON_LETTER.replace_all(text, "").into_owned()
}

/// True when the normalized `prompt` occurs in the normalized `rendered` text.
///
/// A prompt that normalizes to nothing matches nothing.
pub fn prompt_matches(prompt: &str, rendered: &str) -> bool {
    let needle = normalize(prompt);
    !needle.is_empty() && normalize(rendered).contains(&needle)
}

/// How a message was tied to its task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Via {
    /// The message id was already mapped.
    Direct,
    /// The message replies to a mapped message.
    Reply,
    /// Prompt text matched an in-flight generation.
    PromptMatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved {
    pub task_id: TaskId,
    pub via: Via,
}

#[derive(Clone)]
pub struct CorrelationEngine {
    tasks: TaskStore,
}

impl CorrelationEngine {
    pub fn new(tasks: TaskStore) -> Self {
        Self { tasks }
    }

    /// Resolve `message` to a task, persisting new mappings.
    ///
    /// `in_flight` is the worker's current in-flight set; only generation
    /// tasks among them are prompt-match candidates.
    pub async fn resolve(
        &self,
        message: &InboundMessage,
        in_flight: &[TaskId],
    ) -> Result<Resolved, CorrelationError> {
        if let Some(task_id) = self.lookup(&message.id).await? {
            return Ok(Resolved {
                task_id,
                via: Via::Direct,
            });
        }

        if let Some(parent) = &message.reference
            && let Some(task_id) = self.lookup(parent).await?
        {
            self.tasks.map_message_to_task(&message.id, task_id).await?;
            return Ok(Resolved {
                task_id,
                via: Via::Reply,
            });
        }

        let mut candidates = Vec::new();
        for &id in in_flight {
            match self.tasks.get(id).await {
                Ok(task) => candidates.push(task),
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e.into()),
            }
        }

        match best_match(&candidates, message) {
            Some(task_id) => {
                self.tasks.map_message_to_task(&message.id, task_id).await?;
                Ok(Resolved {
                    task_id,
                    via: Via::PromptMatch,
                })
            }
            None => Err(CorrelationError::Unresolved {
                message_id: message.id.clone(),
            }),
        }
    }

    async fn lookup(&self, message_id: &str) -> Result<Option<TaskId>, StoreError> {
        match self.tasks.lookup_task_by_message(message_id).await {
            Ok(id) => Ok(Some(id)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Generation task whose prompt matches the message content or the first
/// embed footer. The longest prompt wins when several match.
pub fn best_match(candidates: &[Task], message: &InboundMessage) -> Option<TaskId> {
    let footer = message.footer_text();
    candidates
        .iter()
        .filter(|t| t.is_generation())
        .filter(|t| {
            prompt_matches(&t.prompt, &message.content)
                || footer.is_some_and(|f| prompt_matches(&t.prompt, f))
        })
        .max_by_key(|t| t.prompt.chars().count())
        .map(|t| t.id)
}
