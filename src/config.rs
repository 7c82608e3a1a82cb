//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::tier::{Mode, TierSettings};

/// Scheduling constants shared by every worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Pause between dispatch-loop iterations.
    pub tick: Duration,
    /// Interval between status probes.
    pub probe_interval: Duration,
    /// Minimum spacing between two mode switches.
    pub settle: Duration,
    /// Lifetime of a capacity ticket.
    pub ticket_ttl: Duration,
    /// Concurrent in-flight tasks on a fast worker.
    pub fast_capacity: usize,
    /// Concurrent in-flight tasks on a relaxed worker.
    pub relaxed_capacity: usize,
    /// Age at which a fast worker's in-flight task is evicted.
    pub fast_task_age: Duration,
    /// Age at which a relaxed worker's in-flight task is evicted.
    pub relaxed_task_age: Duration,
    /// Relaxed eviction age after a recent eviction, restored on success.
    pub relaxed_task_age_strict: Duration,
    /// Eviction sweeps tolerated before the worker stops itself.
    pub max_evictions: u32,
    /// Fast budget below which a fast worker drops to relaxed.
    pub fast_budget_floor: Duration,
    /// Suspension applied to a ban without a stated end.
    pub default_ban: Duration,
    /// Pause after a failed dispatch.
    pub dispatch_cooldown: Duration,
    /// Times a task may be returned to the queue before it fails.
    pub retry_cap: u32,
    /// Upper bound on the random delay before a worker starts.
    pub startup_jitter: Duration,
    /// Longest admission stays held for jobs the service reports as queued.
    pub queue_hold: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            probe_interval: Duration::from_secs(600), // 10 minutes
            settle: Duration::from_secs(10),
            ticket_ttl: Duration::from_secs(120),
            fast_capacity: 10,
            relaxed_capacity: 1,
            fast_task_age: Duration::from_secs(600),
            relaxed_task_age: Duration::from_secs(780), // 13 minutes
            relaxed_task_age_strict: Duration::from_secs(600),
            max_evictions: 5,
            fast_budget_floor: Duration::from_secs(15_000),
            default_ban: Duration::from_secs(25 * 3600),
            dispatch_cooldown: Duration::from_secs(30),
            retry_cap: 5,
            startup_jitter: Duration::from_secs(30),
            queue_hold: Duration::from_secs(60),
        }
    }
}

impl WorkerConfig {
    pub fn capacity(&self, mode: Mode) -> usize {
        match mode {
            Mode::Fast => self.fast_capacity,
            Mode::Relaxed => self.relaxed_capacity,
        }
    }

    pub fn tier_settings(&self) -> TierSettings {
        TierSettings {
            floor: self.fast_budget_floor,
            settle: self.settle,
        }
    }
}

/// Telegram operator-notification credentials.
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: SecretString,
    pub chat_id: String,
}

/// Process configuration, read once from the environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// `redis://…` or `memory://`.
    pub store_url: String,
    /// Worker identity CSV, watched for changes.
    pub identities_path: PathBuf,
    pub http_port: u16,
    pub captcha_url: Option<String>,
    pub telegram: Option<TelegramConfig>,
    pub log_dir: Option<PathBuf>,
    pub worker: WorkerConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            store_url: "memory://".to_string(),
            identities_path: PathBuf::from("identities.csv"),
            http_port: 8080,
            captcha_url: None,
            telegram: None,
            log_dir: None,
            worker: WorkerConfig::default(),
        }
    }
}

impl AppConfig {
    /// Build from `IMAGINE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let non_empty = |key: &str| var(key).filter(|v| !v.trim().is_empty());

        let http_port = match non_empty("IMAGINE_HTTP_PORT") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: "IMAGINE_HTTP_PORT".to_string(),
                message: format!("not a port number: {raw}"),
            })?,
            None => defaults.http_port,
        };

        let telegram = match (
            non_empty("IMAGINE_TELEGRAM_TOKEN"),
            non_empty("IMAGINE_TELEGRAM_CHAT"),
        ) {
            (Some(token), Some(chat_id)) => Some(TelegramConfig {
                bot_token: SecretString::from(token),
                chat_id,
            }),
            (None, None) => None,
            _ => {
                return Err(ConfigError::InvalidValue {
                    key: "IMAGINE_TELEGRAM_TOKEN".to_string(),
                    message: "token and chat must be set together".to_string(),
                });
            }
        };

        Ok(Self {
            store_url: non_empty("IMAGINE_STORE_URL").unwrap_or(defaults.store_url),
            identities_path: non_empty("IMAGINE_IDENTITIES")
                .map(PathBuf::from)
                .unwrap_or(defaults.identities_path),
            http_port,
            captcha_url: non_empty("IMAGINE_CAPTCHA_URL"),
            telegram,
            log_dir: non_empty("IMAGINE_LOG_DIR").map(PathBuf::from),
            worker: defaults.worker,
        })
    }
}
