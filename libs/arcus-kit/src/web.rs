//! Auxiliary HTTP surface: unit status and webhook entry point.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::bootstrap::WebConfig;
use crate::events::{Event, Reply};
use crate::runtime::{RuntimeShared, dispatch};

#[derive(Clone)]
struct WebState {
    shared: Arc<RuntimeShared>,
    reply_timeout: Duration,
}

/// A running web surface. Cancel its token to stop it.
#[derive(Debug)]
pub struct WebServer {
    pub local_addr: SocketAddr,
    cancel: CancellationToken,
}

impl WebServer {
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

#[must_use]
pub fn router(shared: Arc<RuntimeShared>, reply_timeout: Duration) -> Router {
    Router::new()
        .route("/", get(status))
        .route("/service/{webhook}", post(webhook))
        .with_state(WebState {
            shared,
            reply_timeout,
        })
}

/// Bind `cfg.bind` and serve on a tracked task of the unit.
///
/// # Errors
/// Fails when the address is invalid or cannot be bound.
pub async fn start(shared: &Arc<RuntimeShared>, cfg: &WebConfig) -> anyhow::Result<WebServer> {
    let listener = tokio::net::TcpListener::bind(&cfg.bind)
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind web surface on {}: {e}", cfg.bind))?;
    let local_addr = listener.local_addr()?;
    let cancel = CancellationToken::new();
    let app = router(Arc::clone(shared), cfg.reply_timeout);

    let stop = cancel.clone();
    shared.spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            stop.cancelled().await;
        });
        if let Err(e) = server.await {
            tracing::error!(error = %e, "Web surface failed");
        }
        tracing::debug!("Web surface stopped");
    });
    tracing::info!(addr = %local_addr, "Web surface listening");
    Ok(WebServer { local_addr, cancel })
}

async fn status(State(state): State<WebState>) -> Json<Value> {
    let shared = &state.shared;
    Json(json!({
        "unit": shared.unit(),
        "stats": shared.stats(),
        "handlers": shared.handler_count(),
        "connectors": shared.connector_names(),
        "databases": shared.memory().names(),
    }))
}

async fn webhook(State(state): State<WebState>, Path(name): Path<String>, body: Bytes) -> Response {
    let payload = if body.is_empty() {
        Value::Null
    } else {
        match serde_json::from_slice(&body) {
            Ok(v) => v,
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error": format!("invalid JSON body: {e}") })),
                )
                    .into_response();
            }
        }
    };

    let (tx, mut rx) = mpsc::unbounded_channel();
    let event = Event::webhook(name.as_str(), payload).with_reply(Reply::Webhook(tx));
    if !dispatch(&state.shared, event) {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("no handler for webhook '{name}'") })),
        )
            .into_response();
    }

    match tokio::time::timeout(state.reply_timeout, rx.recv()).await {
        Ok(Some(reply)) => Json(reply).into_response(),
        Ok(None) | Err(_) => (StatusCode::ACCEPTED, Json(json!({ "status": "accepted" }))).into_response(),
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::config::ModuleEntry;
    use crate::contracts::HandlerSpec;
    use crate::events::Matcher;
    use crate::runtime::{ModuleCtx, ServiceHandle};
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    fn shared_with_echo() -> Arc<RuntimeShared> {
        let ctx = ModuleCtx::standalone("web-test", ModuleEntry::new("echo"));
        let shared = Arc::clone(ctx.shared());
        let spec = HandlerSpec::new("echo", vec![Matcher::webhook("echo")], |event, _| async move {
            let payload = event.payload().cloned().unwrap_or(Value::Null);
            event.respond_json(json!({ "echo": payload })).await
        });
        let silent = HandlerSpec::new("silent", vec![Matcher::webhook("silent")], |_, _| async {
            Ok::<(), anyhow::Error>(())
        });
        let entry = Arc::new(ModuleEntry::new("echo"));
        *shared.services.write() = vec![
            ServiceHandle::new(Arc::clone(&entry), spec),
            ServiceHandle::new(entry, silent),
        ];
        shared
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn webhook_returns_handler_reply() {
        let app = router(shared_with_echo(), Duration::from_secs(2));
        let response = app
            .oneshot(
                Request::post("/service/echo")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"text":"hi"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({"echo": {"text": "hi"}}));
    }

    #[tokio::test]
    async fn webhook_without_reply_is_accepted() {
        let app = router(shared_with_echo(), Duration::from_millis(200));
        let response = app
            .oneshot(Request::post("/service/silent").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn unknown_webhook_is_not_found() {
        let app = router(shared_with_echo(), Duration::from_millis(200));
        let response = app
            .oneshot(Request::post("/service/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn status_reports_counters() {
        let shared = shared_with_echo();
        let app = router(Arc::clone(&shared), Duration::from_millis(200));
        let accepted = app
            .clone()
            .oneshot(Request::post("/service/silent").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(accepted.status(), StatusCode::ACCEPTED);
        let response = app
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["unit"], "web-test");
        assert_eq!(body["handlers"], 2);
        assert_eq!(body["stats"]["webhooks_called"], 1);
    }
}
