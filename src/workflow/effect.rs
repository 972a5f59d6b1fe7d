//! Typed resolution effects, one per request type.
//!
//! `request_data` is decoded into one of these payloads when a request is
//! created (so malformed data never reaches the store) and again when it is
//! approved, inside the decision transaction.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::middleware::rbac::Role;
use crate::models::approval::{ApprovalRequest, RequestType};
use crate::models::user::User;
use crate::store::StoreTx;

static SETTING_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_.]{0,127}$").expect("valid setting key regex"));

/// `request_data` of a supplier onboarding request. Never carries the
/// credential; that lives hashed on the pending user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OnboardingRequestData {
    pub username: String,
    pub wallet_address: String,
    pub role: String,
    pub company_name: String,
    #[serde(default)]
    pub company_metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoleChangeData {
    pub user_id: i64,
    pub new_role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfigurationData {
    pub key: String,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResolutionEffect {
    /// Activate the pending user linked to the request.
    SupplierOnboarding { request_id: i64 },
    RoleChange(RoleChangeData),
    Configuration(ConfigurationData),
}

/// What an applied effect changed, reported back to the caller and audit log.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum EffectOutcome {
    UserActivated { user: User },
    RoleChanged { user: User },
    SettingUpdated { key: String },
    Nothing,
}

/// Validate and normalise the payload of a generic (non-onboarding) request.
/// The approver must sit at or above whatever the request would grant, and
/// granting a supplier-class role always needs a super admin.
pub fn validate_payload(
    request_type: RequestType,
    data: &serde_json::Value,
    approver: Role,
) -> Result<serde_json::Value, AppError> {
    match request_type {
        RequestType::SupplierOnboarding => Err(AppError::Validation(
            "supplier_onboarding requests must be created through the onboarding endpoint".into(),
        )),
        RequestType::UserRoleChange => {
            let mut payload: RoleChangeData = serde_json::from_value(data.clone())
                .map_err(|e| AppError::Validation(format!("invalid user_role_change data: {}", e)))?;
            let new_role = Role::parse(&payload.new_role).ok_or_else(|| {
                AppError::Validation(format!("unknown role '{}'", payload.new_role))
            })?;
            if payload.user_id <= 0 {
                return Err(AppError::Validation("user_id must be positive".into()));
            }
            let floor = if new_role.requires_super_admin_approval() {
                Role::SuperAdmin
            } else {
                new_role
            };
            if approver.level() < floor.level() {
                return Err(AppError::Validation(format!(
                    "granting '{}' needs approver_role '{}' or higher",
                    new_role, floor
                )));
            }
            payload.new_role = new_role.as_str().to_string();
            Ok(serde_json::to_value(payload).map_err(anyhow::Error::from)?)
        }
        RequestType::SystemConfiguration => {
            let payload: ConfigurationData = serde_json::from_value(data.clone()).map_err(|e| {
                AppError::Validation(format!("invalid system_configuration data: {}", e))
            })?;
            if !SETTING_KEY.is_match(&payload.key) {
                return Err(AppError::Validation(format!(
                    "invalid setting key '{}'",
                    payload.key
                )));
            }
            Ok(serde_json::to_value(payload).map_err(anyhow::Error::from)?)
        }
    }
}

impl ResolutionEffect {
    /// Decode the effect a stored request will apply on approval.
    pub fn for_request(req: &ApprovalRequest) -> anyhow::Result<Self> {
        Ok(match req.request_type {
            RequestType::SupplierOnboarding => {
                ResolutionEffect::SupplierOnboarding { request_id: req.id }
            }
            RequestType::UserRoleChange => {
                ResolutionEffect::RoleChange(serde_json::from_value(req.request_data.clone())?)
            }
            RequestType::SystemConfiguration => {
                ResolutionEffect::Configuration(serde_json::from_value(req.request_data.clone())?)
            }
        })
    }

    pub async fn apply(
        &self,
        tx: &mut dyn StoreTx,
        decided_by: i64,
        at: DateTime<Utc>,
    ) -> anyhow::Result<EffectOutcome> {
        match self {
            ResolutionEffect::SupplierOnboarding { request_id } => {
                apply_onboarding(tx, *request_id, at).await
            }
            ResolutionEffect::RoleChange(change) => apply_role_change(tx, change, at).await,
            ResolutionEffect::Configuration(setting) => {
                apply_configuration(tx, setting, decided_by, at).await
            }
        }
    }
}

async fn apply_onboarding(
    tx: &mut dyn StoreTx,
    request_id: i64,
    at: DateTime<Utc>,
) -> anyhow::Result<EffectOutcome> {
    let user = tx.activate_pending_user(request_id, at).await?;
    tracing::info!(
        request_id,
        user_id = user.id,
        role = %user.role,
        "supplier account activated"
    );
    Ok(EffectOutcome::UserActivated { user })
}

async fn apply_role_change(
    tx: &mut dyn StoreTx,
    change: &RoleChangeData,
    at: DateTime<Utc>,
) -> anyhow::Result<EffectOutcome> {
    let role = Role::parse(&change.new_role)
        .ok_or_else(|| anyhow::anyhow!("unknown role '{}'", change.new_role))?;
    let user = tx.update_user_role(change.user_id, role.as_str(), at).await?;
    tracing::info!(user_id = user.id, role = %role, "user role changed");
    Ok(EffectOutcome::RoleChanged { user })
}

async fn apply_configuration(
    tx: &mut dyn StoreTx,
    setting: &ConfigurationData,
    decided_by: i64,
    at: DateTime<Utc>,
) -> anyhow::Result<EffectOutcome> {
    tx.upsert_system_setting(&setting.key, &setting.value, decided_by, at)
        .await?;
    tracing::info!(key = %setting.key, "system setting updated");
    Ok(EffectOutcome::SettingUpdated {
        key: setting.key.clone(),
    })
}
