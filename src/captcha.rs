//! Captcha solving for human-verification challenges.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CaptchaError;

/// Picks the option label matching a challenge image.
#[async_trait]
pub trait CaptchaSolver: Send + Sync {
    async fn solve(&self, image_url: &str, labels: &[String]) -> Result<String, CaptchaError>;
}

/// Solver used when no service is configured; every challenge fails.
#[derive(Debug, Default)]
pub struct NoSolver;

#[async_trait]
impl CaptchaSolver for NoSolver {
    async fn solve(&self, _image_url: &str, _labels: &[String]) -> Result<String, CaptchaError> {
        Err(CaptchaError::Unavailable)
    }
}

#[derive(Debug, Serialize)]
struct SolveRequest<'a> {
    image_url: &'a str,
    labels: &'a [String],
}

#[derive(Debug, Deserialize)]
struct SolveResponse {
    label: Option<String>,
}

/// Adapter for an external solving service: `POST {image_url, labels}` → `{label}`.
pub struct HttpCaptchaSolver {
    client: reqwest::Client,
    url: String,
}

impl HttpCaptchaSolver {
    pub fn new(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_default();
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl CaptchaSolver for HttpCaptchaSolver {
    async fn solve(&self, image_url: &str, labels: &[String]) -> Result<String, CaptchaError> {
        let resp = self
            .client
            .post(&self.url)
            .json(&SolveRequest { image_url, labels })
            .send()
            .await
            .map_err(|e| CaptchaError::RequestFailed(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(CaptchaError::RequestFailed(format!(
                "solver returned {}",
                resp.status()
            )));
        }

        let body: SolveResponse = resp
            .json()
            .await
            .map_err(|e| CaptchaError::RequestFailed(e.to_string()))?;

        body.label
            .filter(|l| labels.contains(l))
            .ok_or_else(|| CaptchaError::Unsolved {
                image_url: image_url.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use axum::routing::post;
    use axum::{Json, Router};

    use super::*;

    async fn solver_returning(label: &'static str) -> HttpCaptchaSolver {
        let app = Router::new().route(
            "/solve",
            post(move |Json(req): Json<serde_json::Value>| async move {
                assert!(req["image_url"].is_string());
                Json(serde_json::json!({ "label": label }))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        HttpCaptchaSolver::new(format!("http://{addr}/solve"))
    }

    fn labels() -> Vec<String> {
        vec!["cat".to_string(), "dog".to_string()]
    }

    #[tokio::test]
    async fn returns_known_label() {
        let solver = solver_returning("dog").await;
        let label = solver.solve("https://img/1.png", &labels()).await.unwrap();
        assert_eq!(label, "dog");
    }

    #[tokio::test]
    async fn rejects_label_not_offered() {
        let solver = solver_returning("horse").await;
        let err = solver.solve("https://img/1.png", &labels()).await.unwrap_err();
        assert!(matches!(err, CaptchaError::Unsolved { .. }));
    }

    #[tokio::test]
    async fn no_solver_is_unavailable() {
        let err = NoSolver.solve("x", &labels()).await.unwrap_err();
        assert!(matches!(err, CaptchaError::Unavailable));
    }
}
