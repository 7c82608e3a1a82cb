//! Error types for the dispatch service.

use std::time::Duration;

use uuid::Uuid;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Correlation error: {0}")]
    Correlation(#[from] CorrelationError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse identity file {path}: {reason}")]
    IdentityFile { path: String, reason: String },

    #[error("Failed to watch {path}: {reason}")]
    Watch { path: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the volatile keyed store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Store backend failure: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Task lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("Task {id} not found")]
    NotFound { id: Uuid },

    #[error("Task {id} is already tracked")]
    Conflict { id: Uuid },

    #[error("Task {id} is {from}, cannot transition to {to}")]
    InvalidTransition { id: Uuid, from: String, to: String },

    #[error("Task {id} evicted after {age:?} in flight")]
    Evicted { id: Uuid, age: Duration },

    #[error("Task {id} exceeded the retry limit ({attempts} attempts)")]
    RetryLimitExceeded { id: Uuid, attempts: u32 },

    #[error("Task {id} cannot be dispatched: {reason}")]
    InvalidFlow { id: Uuid, reason: String },
}

/// Outbound protocol request failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProtocolError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Rate limited after {trials} trials")]
    RateLimited { trials: u32 },

    #[error("Unauthorized: identity credential rejected")]
    Unauthorized,

    #[error("Unexpected response {status}: {body}")]
    Generic { status: u16, body: String },

    #[error("Transport failure: {0}")]
    Transport(String),
}

impl ProtocolError {
    /// Rate limits are the only failures worth retrying locally.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

/// Inbound message correlation failures.
#[derive(Debug, thiserror::Error)]
pub enum CorrelationError {
    #[error("No task found for message {message_id}")]
    Unresolved { message_id: String },

    #[error("Store error during correlation: {0}")]
    Store(#[from] StoreError),
}

/// Worker lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Task {id} popped with status {status}, expected new")]
    Consistency { id: Uuid, status: String },

    #[error("Too many evictions ({count}), worker stopping")]
    TooManyEvictions { count: u32 },

    #[error("Account suspended: {reason}")]
    Suspended { reason: String },
}

/// Captcha solver errors.
#[derive(Debug, thiserror::Error)]
pub enum CaptchaError {
    #[error("Captcha solver is not configured")]
    Unavailable,

    #[error("Captcha request failed: {0}")]
    RequestFailed(String),

    #[error("No solution for {image_url}")]
    Unsolved { image_url: String },
}

/// Operator notification errors.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Failed to send notification: {0}")]
    SendFailed(String),
}
