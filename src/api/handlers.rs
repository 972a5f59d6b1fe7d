use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::middleware::rbac::{roles_at_or_below, Actor, Role};
use crate::models::approval::Decision;
use crate::models::audit::AuditLogRow;
use crate::models::notification::Notification;
use crate::models::user::User;
use crate::store::postgres::PgStore;
use crate::workflow::{
    CreateRequestInput, CreatedRequest, DecisionOutcome, ListParams, OnboardingInput,
    OnboardingReceipt, RequestDetail, RequestPage,
};
use crate::AppState;

// ── Request / Response DTOs ──────────────────────────────────

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub token_type: &'static str,
    pub expires_in: u64,
    pub user: User,
}

#[derive(Deserialize)]
pub struct DecisionRequest {
    /// "approve" | "reject" (past tense accepted)
    #[serde(alias = "decision")]
    pub action: String,
    pub reason: Option<String>,
}

#[derive(Deserialize)]
pub struct AuditParams {
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Deserialize)]
pub struct NotificationParams {
    pub limit: Option<i64>,
}

#[derive(Serialize)]
pub struct MarkReadResponse {
    pub id: i64,
    pub updated: bool,
}

fn database(state: &AppState) -> Result<&PgStore, AppError> {
    state
        .db
        .as_ref()
        .ok_or_else(|| AppError::Transaction(anyhow::anyhow!("database is not configured")))
}

// ── Handlers ─────────────────────────────────────────────────

/// POST /api/v1/auth/login: exchange a username and password for a session token
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    state
        .rate_limiter
        .check(&format!("login:{}", payload.username.trim().to_lowercase()))?;
    let user = state
        .engine
        .authenticate(&payload.username, &payload.password)
        .await?;
    let token = state.jwt.issue(user.id, &user.role)?;
    Ok(Json(LoginResponse {
        token,
        token_type: "Bearer",
        expires_in: state.jwt.ttl_secs(),
        user,
    }))
}

/// POST /api/v1/approvals: open a user_role_change or system_configuration request
pub async fn create_approval(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(payload): Json<CreateRequestInput>,
) -> Result<(StatusCode, Json<CreatedRequest>), AppError> {
    let created = state.engine.create_request(&actor, payload).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// POST /api/v1/approvals/supplier-onboarding: onboard a supplier pending super admin sign-off
pub async fn request_supplier_onboarding(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(payload): Json<OnboardingInput>,
) -> Result<(StatusCode, Json<OnboardingReceipt>), AppError> {
    let receipt = state
        .engine
        .request_supplier_onboarding(&actor, payload)
        .await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

/// GET /api/v1/approvals: paginated list; `for_approval=true` shows the caller's queue
pub async fn list_approvals(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Query(params): Query<ListParams>,
) -> Result<Json<RequestPage>, AppError> {
    Ok(Json(state.engine.list_requests(&actor, params).await?))
}

/// GET /api/v1/approvals/:id
pub async fn get_approval(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<i64>,
) -> Result<Json<RequestDetail>, AppError> {
    Ok(Json(state.engine.get_request(&actor, id).await?))
}

/// POST /api/v1/approvals/:id/decision: approve or reject a request
pub async fn decide_approval(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<i64>,
    Json(payload): Json<DecisionRequest>,
) -> Result<Json<DecisionOutcome>, AppError> {
    let decision = Decision::parse(&payload.action).ok_or_else(|| {
        AppError::Validation(format!(
            "invalid action '{}', expected approve or reject",
            payload.action
        ))
    })?;
    let outcome = state
        .engine
        .decide(&actor, id, decision, payload.reason)
        .await?;
    Ok(Json(outcome))
}

/// GET /api/v1/audit: paginated audit records, auditors and above
pub async fn list_audit_logs(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Query(params): Query<AuditParams>,
) -> Result<Json<Vec<AuditLogRow>>, AppError> {
    actor
        .require(Role::Auditor, "read audit log")
        .map_err(AppError::Authorization)?;
    let limit = params.limit.unwrap_or(50).clamp(1, 200);
    let offset = params.offset.unwrap_or(0).max(0);

    let logs = database(&state)?
        .list_audit_logs(
            params.resource_type.as_deref(),
            params.resource_id.as_deref(),
            limit,
            offset,
        )
        .await?;
    Ok(Json(logs))
}

/// GET /api/v1/notifications: inbox for the caller and every role at or
/// below theirs
pub async fn list_notifications(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Query(params): Query<NotificationParams>,
) -> Result<Json<Vec<Notification>>, AppError> {
    let limit = params.limit.unwrap_or(20).clamp(1, 100);
    let notifs = database(&state)?
        .list_notifications(actor.user_id, &roles_at_or_below(actor.level()), limit)
        .await?;
    Ok(Json(notifs))
}

/// POST /api/v1/notifications/:id/read
pub async fn mark_notification_read(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<i64>,
) -> Result<Json<MarkReadResponse>, AppError> {
    let updated = database(&state)?
        .mark_notification_read(id, actor.user_id, &roles_at_or_below(actor.level()))
        .await?;
    if !updated {
        return Err(AppError::NotFound(format!("notification {} not found", id)));
    }
    Ok(Json(MarkReadResponse { id, updated }))
}
