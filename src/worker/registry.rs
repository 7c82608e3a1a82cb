//! Running workers keyed by identity id.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;

use crate::alert::Notifier;
use crate::captcha::CaptchaSolver;
use crate::config::WorkerConfig;
use crate::error::ProtocolError;
use crate::gateway::{GatewayEvent, ProtocolGateway};
use crate::queue::QueueRouter;
use crate::store::TaskStore;
use crate::worker::identity::BotIdentity;
use crate::worker::worker::{Worker, WorkerDeps};

/// Inbound events buffered per worker before senders wait.
const EVENT_BUFFER: usize = 256;

/// Builds the outbound connection for an identity.
pub type GatewayFactory =
    Arc<dyn Fn(Arc<BotIdentity>) -> Result<Arc<dyn ProtocolGateway>, ProtocolError> + Send + Sync>;

/// Tracked worker handle.
#[derive(Debug)]
struct TrackedWorker {
    fingerprint: u64,
    events: mpsc::Sender<GatewayEvent>,
    handle: JoinHandle<()>,
}

/// What a `sync` changed, by identity id.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub added: Vec<String>,
    pub restarted: Vec<String>,
    pub removed: Vec<String>,
}

impl SyncReport {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.restarted.is_empty() && self.removed.is_empty()
    }
}

pub struct WorkerRegistry {
    tasks: TaskStore,
    queue: QueueRouter,
    captcha: Arc<dyn CaptchaSolver>,
    notifier: Arc<dyn Notifier>,
    config: WorkerConfig,
    gateways: GatewayFactory,
    workers: RwLock<HashMap<String, TrackedWorker>>,
}

impl WorkerRegistry {
    pub fn new(
        tasks: TaskStore,
        queue: QueueRouter,
        captcha: Arc<dyn CaptchaSolver>,
        notifier: Arc<dyn Notifier>,
        config: WorkerConfig,
        gateways: GatewayFactory,
    ) -> Self {
        Self {
            tasks,
            queue,
            captcha,
            notifier,
            config,
            gateways,
            workers: RwLock::new(HashMap::new()),
        }
    }

    /// Make the running set match `rows`.
    ///
    /// New rows start a worker, rows whose content changed restart theirs,
    /// and workers without a row are aborted. Aborted workers hand nothing
    /// back; their in-flight tasks age out.
    pub async fn sync(&self, rows: Vec<BotIdentity>) -> SyncReport {
        let mut report = SyncReport::default();
        let mut workers = self.workers.write().await;
        let mut seen = HashSet::new();

        for identity in rows {
            if !seen.insert(identity.id.clone()) {
                tracing::warn!(id = %identity.id, "Duplicate identity row ignored");
                continue;
            }
            let fingerprint = identity.fingerprint();
            let restarted = match workers.get(&identity.id) {
                Some(tracked) if tracked.fingerprint == fingerprint => continue,
                Some(_) => true,
                None => false,
            };

            let id = identity.id.clone();
            let Some(tracked) = self.spawn(Arc::new(identity), fingerprint) else {
                continue;
            };
            if let Some(old) = workers.insert(id.clone(), tracked) {
                old.handle.abort();
            }
            if restarted {
                report.restarted.push(id);
            } else {
                report.added.push(id);
            }
        }

        let gone: Vec<String> = workers
            .keys()
            .filter(|id| !seen.contains(*id))
            .cloned()
            .collect();
        for id in gone {
            if let Some(tracked) = workers.remove(&id) {
                tracked.handle.abort();
                report.removed.push(id);
            }
        }

        if !report.is_empty() {
            tracing::info!(
                added = report.added.len(),
                restarted = report.restarted.len(),
                removed = report.removed.len(),
                running = workers.len(),
                "Worker set synced"
            );
        }
        report
    }

    fn spawn(&self, identity: Arc<BotIdentity>, fingerprint: u64) -> Option<TrackedWorker> {
        let gateway = match (self.gateways)(Arc::clone(&identity)) {
            Ok(gateway) => gateway,
            Err(e) => {
                tracing::error!(id = %identity.id, error = %e, "Cannot build gateway, worker not started");
                return None;
            }
        };
        let deps = WorkerDeps {
            tasks: self.tasks.clone(),
            queue: self.queue.clone(),
            gateway,
            captcha: Arc::clone(&self.captcha),
            notifier: Arc::clone(&self.notifier),
            config: self.config.clone(),
        };

        let (events, rx) = mpsc::channel(EVENT_BUFFER);
        let worker = Worker::new(identity, deps);
        let handle = tokio::spawn(async move {
            if let Err(e) = worker.run(rx).await {
                tracing::error!(error = %e, "Worker exited");
            }
        });
        Some(TrackedWorker {
            fingerprint,
            events,
            handle,
        })
    }

    /// Event sender of a running worker.
    pub async fn sender(&self, id: &str) -> Option<mpsc::Sender<GatewayEvent>> {
        let workers = self.workers.read().await;
        workers
            .get(id)
            .filter(|t| !t.handle.is_finished())
            .map(|t| t.events.clone())
    }

    pub async fn is_running(&self, id: &str) -> bool {
        self.workers
            .read()
            .await
            .get(id)
            .is_some_and(|t| !t.handle.is_finished())
    }

    pub async fn running_count(&self) -> usize {
        self.workers
            .read()
            .await
            .values()
            .filter(|t| !t.handle.is_finished())
            .count()
    }

    pub async fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.workers.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Abort every worker.
    pub async fn stop_all(&self) {
        let mut workers = self.workers.write().await;
        for (id, tracked) in workers.drain() {
            tracked.handle.abort();
            tracing::debug!(id = %id, "Worker stopped");
        }
    }
}
