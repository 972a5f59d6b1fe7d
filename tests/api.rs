//! HTTP surface driven through the router with `oneshot`, backed by the
//! in-memory store.

mod common;

use std::sync::Arc;

use alupass::middleware::auth::JwtKeys;
use alupass::middleware::rate_limit::RateLimiter;
use alupass::middleware::rbac::Actor;
use alupass::workflow::ApprovalEngine;
use alupass::AppState;
use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use common::{wallet, Harness};

const SECRET: &[u8] = b"api-test-secret";

struct TestApp {
    router: Router,
    keys: JwtKeys,
    h: Harness,
}

impl TestApp {
    async fn new() -> Self {
        Self::with_limit(0).await
    }

    async fn with_limit(max_requests: u64) -> Self {
        let h = Harness::new().await;
        let keys = JwtKeys::new(SECRET, 3600);
        let state = AppState::new(
            ApprovalEngine::new(Arc::new(h.store.clone())),
            keys.clone(),
            RateLimiter::new(max_requests, 60),
        )
        .into_shared();
        Self {
            router: alupass::api::app(state),
            keys,
            h,
        }
    }

    fn token(&self, actor: &Actor) -> String {
        self.keys.issue(actor.user_id, &actor.role).unwrap()
    }

    async fn call(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(t) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {}", t));
        }
        let req = match body {
            Some(b) => req
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(b.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };
        let resp = self.router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }
}

fn onboarding_body(username: &str, wallet: &str) -> Value {
    json!({
        "username": username,
        "wallet_address": wallet,
        "role": "miner",
        "company_name": "Bauxite Partners",
        "company_metadata": {"iso14001": true}
    })
}

#[tokio::test]
async fn test_health_endpoints_need_no_auth() {
    let app = TestApp::new().await;
    for path in ["/healthz", "/readyz", "/metrics"] {
        let req = Request::builder().uri(path).body(Body::empty()).unwrap();
        let resp = app.router.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK, "{}", path);
        assert!(resp.headers().contains_key("x-request-id"));
        assert_eq!(resp.headers()["x-content-type-options"], "nosniff");
    }
}

#[tokio::test]
async fn test_missing_or_bad_token_is_401() {
    let app = TestApp::new().await;
    let (status, body) = app.call("GET", "/api/v1/approvals", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["type"], "authentication_error");

    let forged = JwtKeys::new(b"other", 3600).issue(1, "super_admin").unwrap();
    let (status, _) = app
        .call("GET", "/api/v1/approvals", Some(&forged), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_login_returns_usable_token() {
    let app = TestApp::new().await;
    let (status, body) = app
        .call(
            "POST",
            "/api/v1/auth/login",
            None,
            Some(json!({"username": "root", "password": "root-pw"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["token_type"], "Bearer");
    assert_eq!(body["user"]["role"], "super_admin");
    assert!(body["user"].get("password_hash").is_none());

    let token = body["token"].as_str().unwrap();
    let (status, _) = app.call("GET", "/api/v1/approvals", Some(token), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .call(
            "POST",
            "/api/v1/auth/login",
            None,
            Some(json!({"username": "root", "password": "nope"})),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "invalid_credentials");
}

#[tokio::test]
async fn test_onboarding_flow_over_http() {
    let app = TestApp::new().await;
    let admin = app.token(&app.h.admin);
    let root = app.token(&app.h.super_admin);
    let viewer = app.token(&app.h.viewer);

    let (status, receipt) = app
        .call(
            "POST",
            "/api/v1/approvals/supplier-onboarding",
            Some(&admin),
            Some(onboarding_body("bauxite-partners", &wallet('7'))),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(receipt["status"], "pending_super_admin_approval");
    assert_eq!(receipt["approver_role"], "super_admin");
    let id = receipt["request_id"].as_i64().unwrap();

    let (status, queue) = app
        .call("GET", "/api/v1/approvals?for_approval=true", Some(&root), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(queue["total"], 1);
    assert_eq!(queue["requests"][0]["id"], id);

    let (status, detail) = app
        .call("GET", &format!("/api/v1/approvals/{}", id), Some(&root), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["pending_user"]["username"], "bauxite-partners");
    assert!(detail["pending_user"].get("password_hash").is_none());

    let (status, body) = app
        .call(
            "POST",
            &format!("/api/v1/approvals/{}/decision", id),
            Some(&viewer),
            Some(json!({"action": "approve"})),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["type"], "authorization_error");

    let (status, outcome) = app
        .call(
            "POST",
            &format!("/api/v1/approvals/{}/decision", id),
            Some(&root),
            Some(json!({"action": "approve", "reason": "verified KYC"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["request"]["status"], "approved");
    assert_eq!(outcome["effect"]["effect"], "user_activated");
    assert_eq!(outcome["effect"]["user"]["role"], "miner");

    let (status, body) = app
        .call(
            "POST",
            &format!("/api/v1/approvals/{}/decision", id),
            Some(&root),
            Some(json!({"decision": "rejected"})),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["type"], "conflict_error");

    // the new supplier can sign in with the credential from the receipt
    let (status, login) = app
        .call(
            "POST",
            "/api/v1/auth/login",
            None,
            Some(json!({
                "username": "bauxite-partners",
                "password": receipt["temporary_credential"],
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(login["user"]["role"], "miner");
}

#[tokio::test]
async fn test_error_kinds_map_to_status_codes() {
    let app = TestApp::new().await;
    let admin = app.token(&app.h.admin);

    let (status, body) = app
        .call(
            "POST",
            "/api/v1/approvals",
            Some(&admin),
            Some(json!({
                "request_type": "not_a_real_type",
                "approver_role": "admin",
                "title": "x",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["type"], "validation_error");

    let (status, body) = app
        .call(
            "POST",
            "/api/v1/approvals",
            Some(&admin),
            Some(json!({
                "request_type": "system_configuration",
                "approver_role": "super_admin",
                "title": "Raise recycled content floor",
                "request_data": {"key": "esg.min_recycled_share", "value": 0.4},
                "expires_in_days": 100_000_000
            })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["type"], "validation_error");

    let (status, _) = app
        .call("GET", &format!("/api/v1/approvals?page={}", i64::MAX), Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .call(
            "POST",
            "/api/v1/approvals/999/decision",
            Some(&admin),
            Some(json!({"action": "approve"})),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .call(
            "POST",
            "/api/v1/approvals/999/decision",
            Some(&admin),
            Some(json!({"action": "shrug"})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .call(
            "POST",
            "/api/v1/approvals/supplier-onboarding",
            Some(&admin),
            Some(onboarding_body("ops-admin", &wallet('8'))),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_create_and_list_with_filters() {
    let app = TestApp::new().await;
    let admin = app.token(&app.h.admin);

    let (status, created) = app
        .call(
            "POST",
            "/api/v1/approvals",
            Some(&admin),
            Some(json!({
                "request_type": "system_configuration",
                "approver_role": "super_admin",
                "title": "Raise recycled content floor",
                "request_data": {"key": "esg.min_recycled_share", "value": 0.4},
                "expires_in_days": 2
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["status"], "pending");
    assert_eq!(created["request_type"], "system_configuration");

    let (status, page) = app
        .call(
            "GET",
            "/api/v1/approvals?type=system_configuration&status=pending&page=1&limit=5",
            Some(&admin),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total"], 1);
    assert_eq!(page["limit"], 5);
    assert_eq!(page["total_pages"], 1);

    let (status, _) = app
        .call("GET", "/api/v1/approvals?status=bogus", Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_audit_endpoint_requires_auditor() {
    let app = TestApp::new().await;
    let viewer = app.token(&app.h.viewer);
    let (status, _) = app.call("GET", "/api/v1/audit", Some(&viewer), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_per_user_rate_limit_returns_429() {
    let app = TestApp::with_limit(2).await;
    let admin = app.token(&app.h.admin);
    for _ in 0..2 {
        let (status, _) = app.call("GET", "/api/v1/approvals", Some(&admin), None).await;
        assert_eq!(status, StatusCode::OK);
    }
    let req = Request::builder()
        .uri("/api/v1/approvals")
        .header(header::AUTHORIZATION, format!("Bearer {}", admin))
        .body(Body::empty())
        .unwrap();
    let resp = app.router.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(resp.headers().contains_key(header::RETRY_AFTER));

    // other callers are unaffected
    let root = app.token(&app.h.super_admin);
    let (status, _) = app.call("GET", "/api/v1/approvals", Some(&root), None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let app = TestApp::new().await;
    let admin = app.token(&app.h.admin);
    let (status, _) = app.call("GET", "/api/v1/nope", Some(&admin), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
