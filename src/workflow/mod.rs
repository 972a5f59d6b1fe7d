//! Approval workflow engine.
//!
//! Every operation takes the caller as a plain [`Actor`] and returns either a
//! payload or a typed [`AppError`]. Validation and authorization run before a
//! transaction is opened; each write happens inside exactly one [`StoreTx`].
//! Audit and notification are best-effort and run after commit.

pub mod effect;
pub mod onboarding;
pub mod session;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::middleware::audit::{AuditSink, TracingAuditSink};
use crate::middleware::metrics;
use crate::middleware::rbac::{roles_at_or_below, Actor, Role};
use crate::models::approval::{
    compute_expiry, ApprovalRequest, ApprovalStatus, Decision, NewApprovalRequest, RequestType,
    Resolution,
};
use crate::models::audit::{AuditAction, AuditEntry};
use crate::models::notification::{EventKind, Recipients, RequestSummary};
use crate::models::user::PendingUser;
use crate::notification::{NoopNotifier, NotificationSink};
use crate::store::{ApprovalStore, RequestQuery};

use self::effect::{EffectOutcome, ResolutionEffect};

pub use self::onboarding::{OnboardingInput, OnboardingReceipt};

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;
/// Pages past this are always empty; keeps the offset arithmetic in range.
pub const MAX_PAGE: i64 = 1_000_000;
const MAX_TITLE_LEN: usize = 200;

/// Lowest role that sees every request rather than only its own.
const VISIBILITY_FLOOR: Role = Role::Auditor;

/// Source of "now". Expiry is always judged against this clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateRequestInput {
    pub request_type: String,
    pub approver_role: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub request_data: serde_json::Value,
    #[serde(default)]
    pub expires_in_days: Option<i64>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CreatedRequest {
    pub id: i64,
    pub request_type: RequestType,
    pub status: ApprovalStatus,
    pub approver_role: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub status: Option<String>,
    #[serde(rename = "type")]
    pub request_type: Option<String>,
    #[serde(default)]
    pub for_approval: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestPage {
    pub requests: Vec<ApprovalRequest>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
    pub total_pages: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestDetail {
    pub request: ApprovalRequest,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_user: Option<PendingUser>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DecisionOutcome {
    pub request: ApprovalRequest,
    pub effect: EffectOutcome,
}

pub struct ApprovalEngine {
    store: Arc<dyn ApprovalStore>,
    notifier: Arc<dyn NotificationSink>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
}

impl ApprovalEngine {
    pub fn new(store: Arc<dyn ApprovalStore>) -> Self {
        Self {
            store,
            notifier: Arc::new(NoopNotifier),
            audit: Arc::new(TracingAuditSink),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &Arc<dyn ApprovalStore> {
        &self.store
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn create_request(
        &self,
        actor: &Actor,
        input: CreateRequestInput,
    ) -> Result<CreatedRequest, AppError> {
        observe(self.create_request_inner(actor, input).await)
    }

    async fn create_request_inner(
        &self,
        actor: &Actor,
        input: CreateRequestInput,
    ) -> Result<CreatedRequest, AppError> {
        let request_type = RequestType::parse(&input.request_type).ok_or_else(|| {
            AppError::Validation(format!("invalid request_type '{}'", input.request_type))
        })?;
        let approver = Role::parse(&input.approver_role).ok_or_else(|| {
            AppError::Validation(format!("invalid approver_role '{}'", input.approver_role))
        })?;
        actor
            .require(request_type.min_creator_role(), "create approval request")
            .map_err(AppError::Authorization)?;
        let title = validate_title(&input.title)?;
        let request_data = effect::validate_payload(request_type, &input.request_data, approver)?;
        let now = self.clock.now();
        let expires_at = compute_expiry(now, input.expires_in_days)?;

        let new_request = NewApprovalRequest {
            request_type,
            requested_by: actor.user_id,
            approver_role: approver.as_str().to_string(),
            title,
            description: input.description.unwrap_or_default(),
            request_data,
            expires_at,
            created_at: now,
        };

        let mut tx = self.store.begin().await?;
        let request = tx.insert_request(&new_request).await?;
        tx.commit().await?;

        tracing::info!(
            request_id = request.id,
            request_type = %request.request_type,
            approver_role = %request.approver_role,
            requested_by = actor.user_id,
            "approval request created"
        );
        metrics::record_created(request.request_type.as_str());

        self.record_audit(
            actor,
            AuditAction::Create,
            request.id,
            None,
            Some(serde_json::json!({
                "status": request.status,
                "request_type": request.request_type,
                "approver_role": request.approver_role,
                "request_data": request.request_data,
            })),
        )
        .await;
        self.notify(
            Recipients::Role(request.approver_role.clone()),
            EventKind::ApprovalRequested,
            &request,
        )
        .await;

        Ok(CreatedRequest {
            id: request.id,
            request_type: request.request_type,
            status: request.status,
            approver_role: request.approver_role,
            expires_at: request.expires_at,
        })
    }

    pub async fn list_requests(
        &self,
        actor: &Actor,
        params: ListParams,
    ) -> Result<RequestPage, AppError> {
        observe(self.list_requests_inner(actor, params).await)
    }

    async fn list_requests_inner(
        &self,
        actor: &Actor,
        params: ListParams,
    ) -> Result<RequestPage, AppError> {
        let page = params.page.unwrap_or(1).clamp(1, MAX_PAGE);
        let limit = params
            .limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);
        let status = params
            .status
            .as_deref()
            .map(|s| {
                ApprovalStatus::parse(s)
                    .ok_or_else(|| AppError::Validation(format!("invalid status '{}'", s)))
            })
            .transpose()?;
        let request_type = params
            .request_type
            .as_deref()
            .map(|t| {
                RequestType::parse(t)
                    .ok_or_else(|| AppError::Validation(format!("invalid request_type '{}'", t)))
            })
            .transpose()?;

        let mut query = RequestQuery {
            now: self.clock.now(),
            status,
            request_type,
            requested_by: None,
            approver_roles: None,
            limit,
            offset: (page - 1).saturating_mul(limit),
        };
        if params.for_approval {
            query.status = Some(ApprovalStatus::Pending);
            query.approver_roles = Some(roles_at_or_below(actor.level()));
        } else if !actor.has_role_at_least(VISIBILITY_FLOOR) {
            query.requested_by = Some(actor.user_id);
        }

        let (rows, total) = self.store.list_requests(&query).await?;
        let requests = rows
            .into_iter()
            .map(|r| r.observed_at(query.now))
            .collect();
        Ok(RequestPage {
            requests,
            total,
            page,
            limit,
            total_pages: (total + limit - 1) / limit,
        })
    }

    pub async fn get_request(&self, actor: &Actor, id: i64) -> Result<RequestDetail, AppError> {
        observe(self.get_request_inner(actor, id).await)
    }

    async fn get_request_inner(&self, actor: &Actor, id: i64) -> Result<RequestDetail, AppError> {
        let not_found = || AppError::NotFound(format!("approval request {} not found", id));
        let request = self.store.get_request(id).await?.ok_or_else(not_found)?;
        let visible = actor.has_role_at_least(VISIBILITY_FLOOR)
            || request.requested_by == actor.user_id
            || request.can_be_approved_by(&actor.role);
        if !visible {
            return Err(not_found());
        }
        let pending_user = match request.request_type {
            RequestType::SupplierOnboarding => self.store.get_pending_user(id).await?,
            _ => None,
        };
        Ok(RequestDetail {
            request: request.observed_at(self.clock.now()),
            pending_user,
        })
    }

    pub async fn decide(
        &self,
        actor: &Actor,
        request_id: i64,
        decision: Decision,
        reason: Option<String>,
    ) -> Result<DecisionOutcome, AppError> {
        observe(self.decide_inner(actor, request_id, decision, reason).await)
    }

    async fn decide_inner(
        &self,
        actor: &Actor,
        request_id: i64,
        decision: Decision,
        reason: Option<String>,
    ) -> Result<DecisionOutcome, AppError> {
        if actor.level() == 0 {
            return Err(AppError::Authorization(format!(
                "role '{}' may not decide approval requests",
                actor.role
            )));
        }
        let request = self
            .store
            .get_request(request_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("approval request {} not found", request_id))
            })?;
        if !request.can_be_approved_by(&actor.role) {
            tracing::warn!(
                request_id,
                user_id = actor.user_id,
                role = %actor.role,
                approver_role = %request.approver_role,
                "decision denied: insufficient role"
            );
            return Err(AppError::Authorization(format!(
                "deciding this request requires role '{}' or higher",
                request.approver_role
            )));
        }
        let now = self.clock.now();
        if !request.is_pending(now) {
            return Err(not_pending(&request, now));
        }
        let effect = match decision {
            Decision::Approve => Some(ResolutionEffect::for_request(&request)?),
            Decision::Reject => None,
        };

        let resolution = Resolution {
            decision,
            decided_by: actor.user_id,
            reason: reason
                .map(|r| r.trim().to_string())
                .filter(|r| !r.is_empty()),
            decided_at: now,
        };

        let mut tx = self.store.begin().await?;
        let claimed = match tx.claim_pending(request_id, &resolution).await? {
            Some(claimed) => claimed,
            None => {
                tracing::info!(request_id, "decision lost: request no longer pending");
                return Err(AppError::Conflict(format!(
                    "approval request {} is no longer pending",
                    request_id
                )));
            }
        };
        let outcome = match &effect {
            Some(effect) => match effect.apply(tx.as_mut(), actor.user_id, now).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(
                        request_id,
                        request_type = %request.request_type,
                        "resolution effect failed, rolling back: {:#}",
                        e
                    );
                    return Err(AppError::Transaction(e));
                }
            },
            None => {
                if request.request_type == RequestType::SupplierOnboarding {
                    tx.reject_pending_user(request_id).await?;
                }
                EffectOutcome::Nothing
            }
        };
        tx.commit().await?;

        tracing::info!(
            request_id,
            action = decision.as_str(),
            decided_by = actor.user_id,
            request_type = %claimed.request_type,
            "approval request decided"
        );
        metrics::record_decision(claimed.request_type.as_str(), decision.as_str());

        let action = match decision {
            Decision::Approve => AuditAction::Approve,
            Decision::Reject => AuditAction::Reject,
        };
        self.record_audit(
            actor,
            action,
            request_id,
            Some(serde_json::json!({ "status": request.status })),
            Some(serde_json::json!({
                "status": claimed.status,
                "approved_by": claimed.approved_by,
                "approval_reason": claimed.approval_reason,
                "rejection_reason": claimed.rejection_reason,
                "outcome": outcome,
            })),
        )
        .await;
        let kind = match decision {
            Decision::Approve => EventKind::ApprovalApproved,
            Decision::Reject => EventKind::ApprovalRejected,
        };
        self.notify(Recipients::User(claimed.requested_by), kind, &claimed)
            .await;

        Ok(DecisionOutcome {
            request: claimed,
            effect: outcome,
        })
    }

    /// Persist `expired` on overdue pending rows. Decide never depends on it.
    pub async fn expire_stale(&self) -> Result<u64, AppError> {
        let now = self.clock.now();
        let n = self.store.expire_stale(now).await?;
        if n > 0 {
            tracing::info!(expired = n, "marked overdue approval requests expired");
        }
        Ok(n)
    }

    async fn record_audit(
        &self,
        actor: &Actor,
        action: AuditAction,
        request_id: i64,
        old_values: Option<serde_json::Value>,
        new_values: Option<serde_json::Value>,
    ) {
        let mut entry = AuditEntry::approval_request(
            actor.user_id,
            &actor.role,
            action,
            request_id,
            old_values,
            new_values,
        );
        entry.timestamp = self.clock.now();
        if let Err(e) = self.audit.record(entry).await {
            tracing::warn!(request_id, action = action.as_str(), "audit record failed: {}", e);
        }
    }

    async fn notify(&self, recipients: Recipients, kind: EventKind, request: &ApprovalRequest) {
        let summary = RequestSummary::of(request);
        if let Err(e) = self.notifier.notify(&recipients, kind, &summary).await {
            tracing::warn!(
                request_id = request.id,
                event = kind.as_str(),
                "notification failed: {}",
                e
            );
        }
    }
}

fn validate_title(title: &str) -> Result<String, AppError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(AppError::Validation("title is required".into()));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(AppError::Validation(format!(
            "title must be at most {} characters",
            MAX_TITLE_LEN
        )));
    }
    Ok(title.to_string())
}

fn not_pending(request: &ApprovalRequest, now: DateTime<Utc>) -> AppError {
    AppError::Conflict(format!(
        "approval request {} is not pending (status: {})",
        request.id,
        request.effective_status(now)
    ))
}

/// Count failures by kind before handing them back.
fn observe<T>(result: Result<T, AppError>) -> Result<T, AppError> {
    if let Err(e) = &result {
        metrics::record_error(e.kind());
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_title() {
        assert_eq!(validate_title("  Grant auditor  ").unwrap(), "Grant auditor");
        assert!(validate_title("   ").is_err());
        assert!(validate_title(&"x".repeat(201)).is_err());
        assert!(validate_title(&"x".repeat(200)).is_ok());
    }

    #[test]
    fn test_list_params_deserialize_type_alias() {
        let p: ListParams =
            serde_json::from_value(serde_json::json!({"type": "user_role_change", "page": 2}))
                .unwrap();
        assert_eq!(p.request_type.as_deref(), Some("user_role_change"));
        assert_eq!(p.page, Some(2));
        assert!(!p.for_approval);
    }
}
