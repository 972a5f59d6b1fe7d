//! Supplier onboarding: an approval request plus a provisional user, created
//! together or not at all.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::effect::OnboardingRequestData;
use super::{observe, validate_title, ApprovalEngine};
use crate::credential;
use crate::errors::AppError;
use crate::middleware::metrics;
use crate::middleware::rbac::{Actor, Role};
use crate::models::approval::{compute_expiry, NewApprovalRequest, RequestType};
use crate::models::audit::AuditAction;
use crate::models::notification::{EventKind, Recipients};
use crate::models::user::{NewPendingUser, PendingUserStatus};
use crate::store::is_unique_violation;

static WALLET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^0x[0-9a-fA-F]{40}$").expect("valid wallet regex"));
static USERNAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.-]{3,64}$").expect("valid username regex"));

#[derive(Debug, Clone, Deserialize)]
pub struct OnboardingInput {
    pub username: String,
    pub wallet_address: String,
    pub role: String,
    pub company_name: String,
    #[serde(default)]
    pub company_metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub expires_in_days: Option<i64>,
}

/// Returned once. `temporary_credential` is never stored in clear and cannot
/// be recovered later.
#[derive(Debug, Clone, Serialize)]
pub struct OnboardingReceipt {
    pub request_id: i64,
    pub pending_user_id: i64,
    pub status: PendingUserStatus,
    pub approver_role: String,
    pub expires_at: DateTime<Utc>,
    pub username: String,
    pub wallet_address: String,
    pub role: String,
    pub temporary_credential: String,
}

pub fn is_valid_wallet(wallet: &str) -> bool {
    WALLET.is_match(wallet)
}

pub fn is_valid_username(username: &str) -> bool {
    USERNAME.is_match(username)
}

impl ApprovalEngine {
    pub async fn request_supplier_onboarding(
        &self,
        actor: &Actor,
        input: OnboardingInput,
    ) -> Result<OnboardingReceipt, AppError> {
        observe(self.request_supplier_onboarding_inner(actor, input).await)
    }

    async fn request_supplier_onboarding_inner(
        &self,
        actor: &Actor,
        input: OnboardingInput,
    ) -> Result<OnboardingReceipt, AppError> {
        actor
            .require(Role::Admin, "supplier onboarding")
            .map_err(AppError::Authorization)?;

        let wallet = input.wallet_address.trim();
        if !is_valid_wallet(wallet) {
            return Err(AppError::Validation(
                "wallet_address must be 0x followed by 40 hex characters".into(),
            ));
        }
        let wallet = wallet.to_lowercase();
        let role = Role::parse(&input.role)
            .filter(|r| r.requires_super_admin_approval())
            .ok_or_else(|| {
                AppError::Validation(format!(
                    "role '{}' is not a supplier role (miner, manufacturer, recycler, certifier)",
                    input.role
                ))
            })?;
        let username = input.username.trim().to_string();
        if !is_valid_username(&username) {
            return Err(AppError::Validation(
                "username must be 3-64 characters of letters, digits, '_', '.' or '-'".into(),
            ));
        }
        let company_name = input.company_name.trim().to_string();
        if company_name.is_empty() {
            return Err(AppError::Validation("company_name is required".into()));
        }
        let title = match input.title.as_deref() {
            Some(t) => validate_title(t)?,
            None => format!("Supplier onboarding: {} ({})", username, role),
        };
        let company_metadata = input
            .company_metadata
            .unwrap_or_else(|| serde_json::json!({}));

        let now = self.clock.now();
        let expires_at = compute_expiry(now, input.expires_in_days)?;

        let temporary_credential = credential::generate_temporary_credential();
        let request_data = serde_json::to_value(OnboardingRequestData {
            username: username.clone(),
            wallet_address: wallet.clone(),
            role: role.as_str().to_string(),
            company_name: company_name.clone(),
            company_metadata: company_metadata.clone(),
        })
        .map_err(anyhow::Error::from)?;

        let new_request = NewApprovalRequest {
            request_type: RequestType::SupplierOnboarding,
            requested_by: actor.user_id,
            approver_role: Role::SuperAdmin.as_str().to_string(),
            title,
            description: input.description.unwrap_or_default(),
            request_data,
            expires_at,
            created_at: now,
        };

        let mut tx = self.store.begin().await?;
        if let Some(conflict) = tx.reserve_identity(&username, &wallet, now).await? {
            return Err(AppError::Conflict(conflict.describe().to_string()));
        }
        let request = tx.insert_request(&new_request).await?;
        let pending = tx
            .insert_pending_user(&NewPendingUser {
                request_id: request.id,
                username: username.clone(),
                wallet_address: wallet.clone(),
                password_hash: credential::hash_credential(&temporary_credential),
                requested_role: role.as_str().to_string(),
                company_name,
                company_metadata,
                created_at: now,
            })
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    AppError::Conflict("identity already has a pending onboarding request".into())
                } else {
                    AppError::Transaction(e)
                }
            })?;
        tx.commit().await?;

        tracing::info!(
            request_id = request.id,
            pending_user_id = pending.id,
            role = %role,
            requested_by = actor.user_id,
            "supplier onboarding requested"
        );
        metrics::record_created(RequestType::SupplierOnboarding.as_str());

        self.record_audit(
            actor,
            AuditAction::RequestOnboarding,
            request.id,
            None,
            Some(serde_json::json!({
                "status": request.status,
                "pending_user_id": pending.id,
                "username": pending.username,
                "wallet_address": pending.wallet_address,
                "requested_role": pending.requested_role,
            })),
        )
        .await;
        self.notify(
            Recipients::Role(request.approver_role.clone()),
            EventKind::ApprovalRequested,
            &request,
        )
        .await;

        Ok(OnboardingReceipt {
            request_id: request.id,
            pending_user_id: pending.id,
            status: PendingUserStatus::PendingSuperAdminApproval,
            approver_role: request.approver_role,
            expires_at: request.expires_at,
            username: pending.username,
            wallet_address: pending.wallet_address,
            role: pending.requested_role,
            temporary_credential,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wallet_format() {
        assert!(is_valid_wallet(&format!("0x{}", "a".repeat(40))));
        assert!(is_valid_wallet("0x52908400098527886E0F7030069857D2E4169EE7"));
        assert!(!is_valid_wallet(&format!("0x{}", "a".repeat(39))));
        assert!(!is_valid_wallet(&format!("0x{}", "g".repeat(40))));
        assert!(!is_valid_wallet(&format!("1x{}", "a".repeat(40))));
        assert!(!is_valid_wallet(""));
    }

    #[test]
    fn test_username_format() {
        assert!(is_valid_username("acme.mining-01"));
        assert!(!is_valid_username("ab"));
        assert!(!is_valid_username("has space"));
        assert!(!is_valid_username(&"x".repeat(65)));
    }

    #[test]
    fn test_receipt_status_serializes_for_callers() {
        let v = serde_json::to_value(PendingUserStatus::PendingSuperAdminApproval).unwrap();
        assert_eq!(v, serde_json::json!("pending_super_admin_approval"));
    }
}
