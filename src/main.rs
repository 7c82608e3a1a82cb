use std::sync::Arc;

use imagine_dispatch::alert::{LogNotifier, Notifier, TelegramNotifier};
use imagine_dispatch::api::{AppState, api_routes};
use imagine_dispatch::captcha::{CaptchaSolver, HttpCaptchaSolver, NoSolver};
use imagine_dispatch::config::AppConfig;
use imagine_dispatch::gateway::{InteractionsClient, ProtocolGateway};
use imagine_dispatch::queue::QueueRouter;
use imagine_dispatch::store::{self, TaskStore};
use imagine_dispatch::worker::{
    BotIdentity, GatewayFactory, WorkerRegistry, load_identities, watch_identities,
};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;

    // Initialize tracing; the guard flushes the file writer on exit.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (file_layer, _log_guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "imagine-dispatch.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    eprintln!("🎨 Imagine Dispatch v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Store: {}", store::redact_url(&config.store_url));
    eprintln!("   Identities: {}", config.identities_path.display());
    eprintln!("   API: http://0.0.0.0:{}", config.http_port);

    // ── Store ───────────────────────────────────────────────────────────
    let backend = store::connect(&config.store_url).await?;
    let tasks = TaskStore::new(Arc::clone(&backend));
    let queue = QueueRouter::with_ticket_ttl(backend, config.worker.ticket_ttl);

    // ── Operator alerts and captcha solving ─────────────────────────────
    let notifier: Arc<dyn Notifier> = match &config.telegram {
        Some(telegram) => {
            eprintln!("   Alerts: telegram (chat {})", telegram.chat_id);
            Arc::new(TelegramNotifier::new(
                telegram.bot_token.clone(),
                telegram.chat_id.clone(),
            ))
        }
        None => {
            eprintln!("   Alerts: log only");
            Arc::new(LogNotifier)
        }
    };
    let captcha: Arc<dyn CaptchaSolver> = match &config.captcha_url {
        Some(url) => {
            eprintln!("   Captcha: {url}");
            Arc::new(HttpCaptchaSolver::new(url.clone()))
        }
        None => {
            eprintln!("   Captcha: disabled");
            Arc::new(NoSolver)
        }
    };

    // ── Workers ─────────────────────────────────────────────────────────
    let gateways: GatewayFactory = Arc::new(|identity: Arc<BotIdentity>| {
        InteractionsClient::new(identity).map(|c| Arc::new(c) as Arc<dyn ProtocolGateway>)
    });
    let registry = Arc::new(WorkerRegistry::new(
        tasks.clone(),
        queue.clone(),
        captcha,
        notifier,
        config.worker.clone(),
        gateways,
    ));

    match load_identities(&config.identities_path) {
        Ok(rows) => {
            let report = registry.sync(rows).await;
            eprintln!("   Workers: {} started", report.added.len());
        }
        Err(e) => {
            tracing::warn!(error = %e, "No identities loaded at startup");
            eprintln!("   Workers: none ({e})");
        }
    }
    let _watcher = match watch_identities(config.identities_path.clone(), Arc::clone(&registry)) {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            tracing::warn!(error = %e, "Identity hot reload disabled");
            None
        }
    };

    // ── HTTP API ────────────────────────────────────────────────────────
    let app = api_routes(AppState {
        tasks,
        queue,
        registry: Arc::clone(&registry),
    });
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.http_port)).await?;
    tracing::info!(port = config.http_port, "API server started");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown requested");
        })
        .await?;

    registry.stop_all().await;
    Ok(())
}
