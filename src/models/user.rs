use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, PartialEq)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub wallet_address: Option<String>,
    pub role: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub company_name: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub wallet_address: Option<String>,
    pub role: String,
    pub password_hash: String,
    pub company_name: Option<String>,
}

/// Provisional identity held until its onboarding request is decided.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, PartialEq)]
pub struct PendingUser {
    pub id: i64,
    pub request_id: i64,
    pub username: String,
    pub wallet_address: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub requested_role: String,
    pub company_name: String,
    pub company_metadata: serde_json::Value,
    pub status: PendingUserStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPendingUser {
    pub request_id: i64,
    pub username: String,
    pub wallet_address: String,
    pub password_hash: String,
    pub requested_role: String,
    pub company_name: String,
    pub company_metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum PendingUserStatus {
    PendingSuperAdminApproval,
    Activated,
    Rejected,
    /// Left behind by an expired request and released so its username and
    /// wallet can be onboarded again.
    Discarded,
}

impl PendingUserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PendingUserStatus::PendingSuperAdminApproval => "pending_super_admin_approval",
            PendingUserStatus::Activated => "activated",
            PendingUserStatus::Rejected => "rejected",
            PendingUserStatus::Discarded => "discarded",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, PartialEq)]
pub struct SystemSetting {
    pub key: String,
    pub value: serde_json::Value,
    pub updated_by: Option<i64>,
    pub updated_at: DateTime<Utc>,
}
