use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::AppState;

pub mod handlers;

/// Build the approval API router.
/// All routes are relative; the caller mounts this under `/api/v1`.
pub fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/login", post(handlers::login))
        .route(
            "/approvals",
            get(handlers::list_approvals).post(handlers::create_approval),
        )
        .route(
            "/approvals/supplier-onboarding",
            post(handlers::request_supplier_onboarding),
        )
        .route("/approvals/:id", get(handlers::get_approval))
        .route("/approvals/:id/decision", post(handlers::decide_approval))
        .route("/audit", get(handlers::list_audit_logs))
        .route("/notifications", get(handlers::list_notifications))
        .route(
            "/notifications/:id/read",
            post(handlers::mark_notification_read),
        )
        .fallback(fallback_404)
}

/// Full application: health, metrics and the API, with the shared layers.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(readiness_check))
        .route("/metrics", get(metrics_handler))
        .nest("/api/v1", api_router())
        .with_state(state)
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(request_id_middleware))
        .layer(middleware::from_fn(security_headers_middleware))
}

async fn fallback_404() -> StatusCode {
    StatusCode::NOT_FOUND
}

async fn readiness_check(State(state): State<Arc<AppState>>) -> Response {
    if let Some(db) = &state.db {
        if let Err(e) = db.ping().await {
            tracing::error!("readiness check failed: {}", e);
            return (StatusCode::SERVICE_UNAVAILABLE, "database unavailable").into_response();
        }
    }
    "ok".into_response()
}

async fn metrics_handler() -> Response {
    (
        [(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        crate::middleware::metrics::encode_metrics(),
    )
        .into_response()
}

/// Middleware: injects a unique X-Request-Id into every response, keeping the
/// caller's id when one was sent.
async fn request_id_middleware(req: Request, next: Next) -> Response {
    let req_id = req
        .headers()
        .get("x-request-id")
        .cloned()
        .or_else(|| HeaderValue::from_str(&uuid::Uuid::new_v4().to_string()).ok());
    let mut resp = next.run(req).await;
    if let Some(val) = req_id {
        resp.headers_mut().insert("x-request-id", val);
    }
    resp
}

/// Middleware: injects security headers into every response.
async fn security_headers_middleware(req: Request, next: Next) -> Response {
    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();

    headers.insert("X-Content-Type-Options", HeaderValue::from_static("nosniff"));
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    // API responses carry tokens and credentials
    headers.insert("Cache-Control", HeaderValue::from_static("no-store"));
    headers.insert("Referrer-Policy", HeaderValue::from_static("no-referrer"));
    headers.remove("Server");

    resp
}
