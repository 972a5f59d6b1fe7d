use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One append-only record of who did what to which resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEntry {
    pub actor_id: i64,
    pub actor_role: String,
    pub action: AuditAction,
    pub resource_type: String,
    pub resource_id: String,
    pub old_values: Option<serde_json::Value>,
    pub new_values: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl AuditEntry {
    pub fn approval_request(
        actor_id: i64,
        actor_role: &str,
        action: AuditAction,
        request_id: i64,
        old_values: Option<serde_json::Value>,
        new_values: Option<serde_json::Value>,
    ) -> Self {
        Self {
            actor_id,
            actor_role: actor_role.to_string(),
            action,
            resource_type: "approval_request".to_string(),
            resource_id: request_id.to_string(),
            old_values,
            new_values,
            timestamp: Utc::now(),
        }
    }

    pub fn user(actor_id: i64, actor_role: &str, action: AuditAction, user_id: i64) -> Self {
        Self {
            actor_id,
            actor_role: actor_role.to_string(),
            action,
            resource_type: "user".to_string(),
            resource_id: user_id.to_string(),
            old_values: None,
            new_values: None,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    RequestOnboarding,
    Approve,
    Reject,
    Login,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "create",
            AuditAction::RequestOnboarding => "request_onboarding",
            AuditAction::Approve => "approve",
            AuditAction::Reject => "reject",
            AuditAction::Login => "login",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuditLogRow {
    pub id: i64,
    pub actor_id: i64,
    pub actor_role: String,
    pub action: String,
    pub resource_type: String,
    pub resource_id: String,
    pub old_values: Option<serde_json::Value>,
    pub new_values: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}
