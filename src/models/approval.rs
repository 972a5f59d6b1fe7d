use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::middleware::rbac::{role_level, Role};

/// Deadline applied when a request is created without an explicit expiry.
pub const DEFAULT_EXPIRY_DAYS: i64 = 7;
pub const MAX_EXPIRY_DAYS: i64 = 365;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, PartialEq)]
pub struct ApprovalRequest {
    pub id: i64,
    pub request_type: RequestType,
    pub requested_by: i64,
    pub approver_role: String,
    pub status: ApprovalStatus,
    pub title: String,
    pub description: String,
    pub request_data: serde_json::Value,
    pub approval_reason: Option<String>,
    pub rejection_reason: Option<String>,
    pub approved_by: Option<i64>,
    pub approved_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApprovalRequest {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == ApprovalStatus::Expired
            || (self.status == ApprovalStatus::Pending && now > self.expires_at)
    }

    /// Stored as pending and still inside its deadline.
    pub fn is_pending(&self, now: DateTime<Utc>) -> bool {
        self.status == ApprovalStatus::Pending && now <= self.expires_at
    }

    /// Status as observed at `now`: a stored-pending request past its
    /// deadline reads as expired.
    pub fn effective_status(&self, now: DateTime<Utc>) -> ApprovalStatus {
        if self.is_expired(now) {
            ApprovalStatus::Expired
        } else {
            self.status.clone()
        }
    }

    /// Copy with `status` replaced by the effective status at `now`.
    pub fn observed_at(mut self, now: DateTime<Utc>) -> Self {
        self.status = self.effective_status(now);
        self
    }

    /// Greater-or-equal: an actor at exactly `approver_role` may decide.
    pub fn can_be_approved_by(&self, role: &str) -> bool {
        let level = role_level(role);
        level > 0 && level >= role_level(&self.approver_role)
    }
}

#[derive(Debug, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum RequestType {
    SupplierOnboarding,
    UserRoleChange,
    SystemConfiguration,
}

impl RequestType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "supplier_onboarding" => Some(RequestType::SupplierOnboarding),
            "user_role_change" => Some(RequestType::UserRoleChange),
            "system_configuration" => Some(RequestType::SystemConfiguration),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestType::SupplierOnboarding => "supplier_onboarding",
            RequestType::UserRoleChange => "user_role_change",
            RequestType::SystemConfiguration => "system_configuration",
        }
    }

    /// Lowest role allowed to open a request of this type.
    pub fn min_creator_role(&self) -> Role {
        match self {
            RequestType::SupplierOnboarding => Role::Admin,
            RequestType::UserRoleChange => Role::Admin,
            RequestType::SystemConfiguration => Role::Admin,
        }
    }
}

impl std::fmt::Display for RequestType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl ApprovalStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Some(ApprovalStatus::Pending),
            "approved" => Some(ApprovalStatus::Approved),
            "rejected" => Some(ApprovalStatus::Rejected),
            "expired" => Some(ApprovalStatus::Expired),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
            ApprovalStatus::Expired => "expired",
        }
    }
}

impl std::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "approve" | "approved" => Some(Decision::Approve),
            "reject" | "rejected" => Some(Decision::Reject),
            _ => None,
        }
    }

    pub fn resulting_status(&self) -> ApprovalStatus {
        match self {
            Decision::Approve => ApprovalStatus::Approved,
            Decision::Reject => ApprovalStatus::Rejected,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Approve => "approve",
            Decision::Reject => "reject",
        }
    }
}

/// Row to insert. Status is always `pending` on creation.
#[derive(Debug, Clone)]
pub struct NewApprovalRequest {
    pub request_type: RequestType,
    pub requested_by: i64,
    pub approver_role: String,
    pub title: String,
    pub description: String,
    pub request_data: serde_json::Value,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Final decision written by a conditional `pending` update.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub decision: Decision,
    pub decided_by: i64,
    pub reason: Option<String>,
    pub decided_at: DateTime<Utc>,
}

/// `now + days`, falling back to the default when `days` is absent or not
/// positive. More than [`MAX_EXPIRY_DAYS`] is a validation error.
pub fn compute_expiry(
    now: DateTime<Utc>,
    expires_in_days: Option<i64>,
) -> Result<DateTime<Utc>, AppError> {
    let days = match expires_in_days {
        Some(d) if d > MAX_EXPIRY_DAYS => {
            return Err(AppError::Validation(format!(
                "expires_in_days must be at most {}",
                MAX_EXPIRY_DAYS
            )))
        }
        Some(d) if d > 0 => d,
        _ => DEFAULT_EXPIRY_DAYS,
    };
    Duration::try_days(days)
        .and_then(|d| now.checked_add_signed(d))
        .ok_or_else(|| AppError::Validation("expiry is out of range".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample(status: ApprovalStatus, expires_at: DateTime<Utc>) -> ApprovalRequest {
        let now = Utc::now();
        ApprovalRequest {
            id: 1,
            request_type: RequestType::UserRoleChange,
            requested_by: 7,
            approver_role: "admin".into(),
            status,
            title: "t".into(),
            description: String::new(),
            request_data: json!({}),
            approval_reason: None,
            rejection_reason: None,
            approved_by: None,
            approved_at: None,
            expires_at,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_compute_expiry_defaults_to_seven_days() {
        let now = Utc::now();
        assert_eq!(compute_expiry(now, None).unwrap(), now + Duration::days(7));
        assert_eq!(compute_expiry(now, Some(0)).unwrap(), now + Duration::days(7));
        assert_eq!(compute_expiry(now, Some(-3)).unwrap(), now + Duration::days(7));
        assert_eq!(compute_expiry(now, Some(2)).unwrap(), now + Duration::days(2));
        assert_eq!(compute_expiry(now, Some(365)).unwrap(), now + Duration::days(365));
    }

    #[test]
    fn test_compute_expiry_rejects_oversized_windows() {
        let now = Utc::now();
        for days in [366, 100_000_000, i64::MAX] {
            assert!(matches!(
                compute_expiry(now, Some(days)),
                Err(AppError::Validation(_))
            ));
        }
    }

    #[test]
    fn test_pending_past_deadline_reads_as_expired() {
        let now = Utc::now();
        let req = sample(ApprovalStatus::Pending, now - Duration::seconds(1));
        assert!(!req.is_pending(now));
        assert!(req.is_expired(now));
        assert_eq!(req.effective_status(now), ApprovalStatus::Expired);
    }

    #[test]
    fn test_deadline_itself_is_still_pending() {
        let now = Utc::now();
        let req = sample(ApprovalStatus::Pending, now);
        assert!(req.is_pending(now));
    }

    #[test]
    fn test_terminal_status_never_expires() {
        let now = Utc::now();
        let req = sample(ApprovalStatus::Approved, now - Duration::days(30));
        assert_eq!(req.effective_status(now), ApprovalStatus::Approved);
        assert!(!req.is_pending(now));
    }

    #[test]
    fn test_can_be_approved_by_is_greater_or_equal() {
        let req = sample(ApprovalStatus::Pending, Utc::now());
        assert!(req.can_be_approved_by("admin"));
        assert!(req.can_be_approved_by("super_admin"));
        assert!(!req.can_be_approved_by("certifier"));
        assert!(!req.can_be_approved_by("unknown"));
    }

    #[test]
    fn test_request_type_parse() {
        assert_eq!(
            RequestType::parse("supplier_onboarding"),
            Some(RequestType::SupplierOnboarding)
        );
        assert_eq!(RequestType::parse("not_a_real_type"), None);
    }

    #[test]
    fn test_decision_parse_accepts_both_tenses() {
        assert_eq!(Decision::parse("approve"), Some(Decision::Approve));
        assert_eq!(Decision::parse("Approved"), Some(Decision::Approve));
        assert_eq!(Decision::parse("reject"), Some(Decision::Reject));
        assert_eq!(Decision::parse("maybe"), None);
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let v = serde_json::to_value(ApprovalStatus::Pending).unwrap();
        assert_eq!(v, json!("pending"));
        let t = serde_json::to_value(RequestType::SystemConfiguration).unwrap();
        assert_eq!(t, json!("system_configuration"));
    }
}
