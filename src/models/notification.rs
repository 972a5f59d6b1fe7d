use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Notification {
    pub id: i64,
    pub recipient_role: Option<String>,
    pub recipient_user_id: Option<i64>,
    pub kind: String,
    pub title: String,
    pub body: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

/// Who a workflow event is addressed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Recipients {
    /// Everyone holding this role.
    Role(String),
    User(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ApprovalRequested,
    ApprovalApproved,
    ApprovalRejected,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ApprovalRequested => "approval_requested",
            EventKind::ApprovalApproved => "approval_approved",
            EventKind::ApprovalRejected => "approval_rejected",
        }
    }
}

/// Compact view of a request carried by every notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestSummary {
    pub request_id: i64,
    pub request_type: String,
    pub title: String,
    pub status: String,
    pub approver_role: String,
    pub requested_by: i64,
    pub reason: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl RequestSummary {
    pub fn of(req: &crate::models::approval::ApprovalRequest) -> Self {
        Self {
            request_id: req.id,
            request_type: req.request_type.as_str().to_string(),
            title: req.title.clone(),
            status: req.status.as_str().to_string(),
            approver_role: req.approver_role.clone(),
            requested_by: req.requested_by,
            reason: req
                .approval_reason
                .clone()
                .or_else(|| req.rejection_reason.clone()),
            expires_at: req.expires_at,
        }
    }
}
