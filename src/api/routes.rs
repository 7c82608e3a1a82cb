//! Submission, follow-up, status and event-ingress endpoints.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use super::error::{ApiError, ApiResult};
use crate::error::TaskError;
use crate::gateway::GatewayEvent;
use crate::queue::QueueRouter;
use crate::store::TaskStore;
use crate::task::{Command, ImagePosition, Priority, RouteLabel, Task, TaskSnapshot};
use crate::worker::WorkerRegistry;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub tasks: TaskStore,
    pub queue: QueueRouter,
    pub registry: Arc<WorkerRegistry>,
}

/// Build the router.
pub fn api_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/new", post(create_task))
        .route("/variation", post(request_variation))
        .route("/upscale", post(request_upscale))
        .route("/status", get(task_status))
        .route("/events/{bot_id}", post(ingest_event))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "imagine-dispatch",
        "workers": state.registry.running_count().await,
    }))
}

// ── Submission ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct NewRequest {
    prompt: String,
    #[serde(default)]
    priority: Priority,
    /// Pool the task is routed to.
    #[serde(alias = "routeHint")]
    route_hint: String,
    #[serde(default)]
    uuid: Option<Uuid>,
}

async fn create_task(
    State(state): State<AppState>,
    Json(body): Json<NewRequest>,
) -> ApiResult<(StatusCode, Json<Uuid>)> {
    let id = body.uuid.unwrap_or_else(Uuid::new_v4);
    if state.tasks.exists(id).await? {
        return Err(TaskError::Conflict { id }.into());
    }

    let task = Task::generate(id, body.prompt, RouteLabel::shared(body.priority, body.route_hint));
    state.tasks.put(&task).await?;
    state.queue.publish(task.id, &task.route).await?;
    info!(task_id = %id, priority = %task.route.priority, pool = %task.route.pool, "Task submitted");
    Ok((StatusCode::CREATED, Json(id)))
}

#[derive(Debug, Deserialize)]
struct FollowUpRequest {
    uuid: Uuid,
    #[serde(default)]
    priority: Priority,
    #[serde(alias = "index")]
    position: ImagePosition,
}

async fn request_variation(
    State(state): State<AppState>,
    Json(body): Json<FollowUpRequest>,
) -> ApiResult<(StatusCode, Json<Uuid>)> {
    let command = Command::Variation {
        position: body.position,
    };
    follow_up(&state, body.uuid, command, body.priority).await
}

async fn request_upscale(
    State(state): State<AppState>,
    Json(body): Json<FollowUpRequest>,
) -> ApiResult<(StatusCode, Json<Uuid>)> {
    let command = Command::Upscale {
        position: body.position,
    };
    follow_up(&state, body.uuid, command, body.priority).await
}

/// Re-attach `command` to a finished task and queue it on the lane of the
/// identity that produced the grid.
async fn follow_up(
    state: &AppState,
    id: Uuid,
    command: Command,
    priority: Priority,
) -> ApiResult<(StatusCode, Json<Uuid>)> {
    let mut task = state.tasks.get(id).await?;
    task.reattach(command, priority)?;
    state.tasks.put(&task).await?;
    state.queue.publish(task.id, &task.route).await?;
    info!(
        task_id = %id,
        command = task.command.name(),
        bot = task.route.bot_id.as_deref().unwrap_or("shared"),
        "Follow-up submitted"
    );
    Ok((StatusCode::CREATED, Json(id)))
}

// ── Status ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct StatusQuery {
    uuid: Uuid,
}

/// Task snapshot. Polling refreshes the record's TTL so watched tasks do
/// not expire; the record itself is only ever written by its worker.
async fn task_status(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> ApiResult<Json<TaskSnapshot>> {
    let task = state.tasks.get(query.uuid).await?;
    state.tasks.touch(task.id).await?;
    Ok(Json(task.snapshot()))
}

// ── Event ingress ───────────────────────────────────────────────────────

async fn ingest_event(
    State(state): State<AppState>,
    Path(bot_id): Path<String>,
    Json(event): Json<GatewayEvent>,
) -> ApiResult<StatusCode> {
    let sender = state
        .registry
        .sender(&bot_id)
        .await
        .ok_or_else(|| ApiError::not_found(format!("No running worker {bot_id}")))?;
    sender
        .send(event)
        .await
        .map_err(|_| ApiError::not_found(format!("Worker {bot_id} stopped")))?;
    Ok(StatusCode::ACCEPTED)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::alert::LogNotifier;
    use crate::captcha::NoSolver;
    use crate::config::WorkerConfig;
    use crate::error::{ProtocolError, StoreError};
    use crate::gateway::ProtocolGateway;
    use crate::store::{InMemoryStore, StoreKeys, VolatileStore};
    use crate::task::{Deliverable, TaskStatus};
    use crate::worker::{BotIdentity, GatewayFactory};

    fn state() -> AppState {
        state_over(Arc::new(InMemoryStore::new()))
    }

    fn state_over(store: Arc<dyn VolatileStore>) -> AppState {
        let tasks = TaskStore::new(store.clone());
        let queue = QueueRouter::new(store);
        let factory: GatewayFactory = Arc::new(|_: Arc<BotIdentity>| {
            Err::<Arc<dyn ProtocolGateway>, _>(ProtocolError::Unauthorized)
        });
        let registry = Arc::new(WorkerRegistry::new(
            tasks.clone(),
            queue.clone(),
            Arc::new(NoSolver),
            Arc::new(LogNotifier),
            WorkerConfig {
                startup_jitter: Duration::ZERO,
                ..WorkerConfig::default()
            },
            factory,
        ));
        AppState {
            tasks,
            queue,
            registry,
        }
    }

    /// Store that applies a pending write right after the next read, the way
    /// a worker's update can land while a status request is in progress.
    #[derive(Default)]
    struct InterleavedStore {
        inner: InMemoryStore,
        write_after_get: Mutex<Option<(String, String)>>,
    }

    #[async_trait]
    impl VolatileStore for InterleavedStore {
        async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            let value = self.inner.get(key).await?;
            let pending = self.write_after_get.lock().unwrap().take();
            if let Some((k, v)) = pending {
                self.inner.set(&k, &v, None).await?;
            }
            Ok(value)
        }

        async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
            self.inner.set(key, value, ttl).await
        }

        async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
            self.inner.expire(key, ttl).await
        }

        async fn delete(&self, key: &str) -> Result<(), StoreError> {
            self.inner.delete(key).await
        }

        async fn push(&self, list: &str, value: &str, ttl: Duration) -> Result<u64, StoreError> {
            self.inner.push(list, value, ttl).await
        }

        async fn pop(&self, list: &str) -> Result<Option<String>, StoreError> {
            self.inner.pop(list).await
        }

        async fn list_len(&self, list: &str) -> Result<u64, StoreError> {
            self.inner.list_len(list).await
        }

        async fn count_prefix(&self, prefix: &str) -> Result<u64, StoreError> {
            self.inner.count_prefix(prefix).await
        }
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn new_task_is_stored_and_queued() {
        let state = state();
        let app = api_routes(state.clone());
        let response = app
            .oneshot(post_json(
                "/new",
                serde_json::json!({"prompt": "a red fox", "priority": "High", "route_hint": "common"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let id: Uuid = serde_json::from_value(body_json(response).await).unwrap();
        let task = state.tasks.get(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::New);
        assert_eq!(
            state.queue.next(&RouteLabel::shared(Priority::High, "common")).await.unwrap(),
            Some(id)
        );
    }

    #[tokio::test]
    async fn duplicate_uuid_conflicts() {
        let state = state();
        let id = Uuid::new_v4();
        let body = serde_json::json!({"prompt": "x", "routeHint": "common", "uuid": id});

        let first = api_routes(state.clone())
            .oneshot(post_json("/new", body.clone()))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::CREATED);

        let second = api_routes(state).oneshot(post_json("/new", body)).await.unwrap();
        assert_eq!(second.status(), StatusCode::CONFLICT);
        assert!(body_json(second).await["error"].is_string());
    }

    #[tokio::test]
    async fn status_of_unknown_task_is_404() {
        let response = api_routes(state())
            .oneshot(
                Request::get(format!("/status?uuid={}", Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn status_poll_never_overwrites_a_worker_update() {
        let store = Arc::new(InterleavedStore::default());
        let state = state_over(store.clone());
        let mut task = Task::generate(Uuid::new_v4(), "x", RouteLabel::shared(Priority::Low, "common"));
        task.mark_pending(Some("m1".to_string())).unwrap();
        state.tasks.put(&task).await.unwrap();

        let mut finished = task.clone();
        finished
            .mark_success(Deliverable {
                url: "https://cdn/x.png".to_string(),
                filename: "x_ab12.png".to_string(),
            })
            .unwrap();
        *store.write_after_get.lock().unwrap() =
            Some((StoreKeys::task(task.id), serde_json::to_string(&finished).unwrap()));

        let response = api_routes(state.clone())
            .oneshot(
                Request::get(format!("/status?uuid={}", task.id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "Pending");

        let stored = state.tasks.get(task.id).await.unwrap();
        assert_eq!(stored.status, TaskStatus::Success);
        assert_eq!(stored.deliverable.unwrap().filename, "x_ab12.png");
    }

    #[tokio::test]
    async fn variation_of_unfinished_task_conflicts() {
        let state = state();
        let task = Task::generate(Uuid::new_v4(), "x", RouteLabel::shared(Priority::Low, "common"));
        state.tasks.put(&task).await.unwrap();

        let response = api_routes(state)
            .oneshot(post_json(
                "/variation",
                serde_json::json!({"uuid": task.id, "priority": "Low", "position": 2}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn upscale_requeues_on_owner_lane() {
        let state = state();
        let mut task = Task::generate(
            Uuid::new_v4(),
            "x",
            RouteLabel::private(Priority::Normal, "common", "bot-7"),
        );
        task.mark_pending(Some("grid".to_string())).unwrap();
        task.mark_success(Deliverable {
            url: "https://cdn/x.png".to_string(),
            filename: "x_abc.png".to_string(),
        })
        .unwrap();
        state.tasks.put(&task).await.unwrap();

        let response = api_routes(state.clone())
            .oneshot(post_json(
                "/upscale",
                serde_json::json!({"uuid": task.id, "priority": "VIP", "index": 3}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let lane = RouteLabel::private(Priority::Vip, "common", "bot-7");
        assert_eq!(state.queue.next(&lane).await.unwrap(), Some(task.id));

        let status = api_routes(state)
            .oneshot(
                Request::get(format!("/status?uuid={}", task.id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let snapshot = body_json(status).await;
        assert_eq!(snapshot["status"], "New");
        assert_eq!(snapshot["command"]["kind"], "upscale");
        assert_eq!(snapshot["progress"], 0);
        assert!(snapshot["deliverable"].is_null());
    }

    #[tokio::test]
    async fn events_for_unknown_worker_are_404() {
        let response = api_routes(state())
            .oneshot(post_json(
                "/events/nobody",
                serde_json::json!({"type": "message_create", "message": {"id": "1", "channel_id": "c"}}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
