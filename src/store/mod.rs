//! Persistence seam for the approval workflow.
//!
//! [`ApprovalStore`] covers reads and opens transactions; every write goes
//! through a [`StoreTx`]. Dropping a transaction without calling
//! [`StoreTx::commit`] rolls it back.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::approval::{
    ApprovalRequest, ApprovalStatus, NewApprovalRequest, RequestType, Resolution,
};
use crate::models::user::{NewPendingUser, NewUser, PendingUser, SystemSetting, User};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Filter for listing approval requests. Expiry is evaluated against `now`.
#[derive(Debug, Clone)]
pub struct RequestQuery {
    pub now: DateTime<Utc>,
    pub status: Option<ApprovalStatus>,
    pub request_type: Option<RequestType>,
    pub requested_by: Option<i64>,
    /// Restrict to requests whose approver role is one of these.
    pub approver_roles: Option<Vec<String>>,
    pub limit: i64,
    pub offset: i64,
}

impl RequestQuery {
    /// Whether a single row passes every filter. Used by the in-memory store
    /// and mirrored in SQL by the Postgres store.
    pub fn matches(&self, req: &ApprovalRequest) -> bool {
        if let Some(status) = self.status {
            if req.effective_status(self.now) != status {
                return false;
            }
        }
        if let Some(t) = self.request_type {
            if req.request_type != t {
                return false;
            }
        }
        if let Some(by) = self.requested_by {
            if req.requested_by != by {
                return false;
            }
        }
        if let Some(roles) = &self.approver_roles {
            if !roles.iter().any(|r| r == &req.approver_role) {
                return false;
            }
        }
        true
    }
}

/// Existing identity that blocks an onboarding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityConflict {
    Username,
    Wallet,
    /// Another onboarding for the same wallet is still waiting on a decision.
    PendingWallet,
    /// Another onboarding for the same username is still waiting on a decision.
    PendingUsername,
}

impl IdentityConflict {
    pub fn describe(&self) -> &'static str {
        match self {
            IdentityConflict::Username => "username is already registered",
            IdentityConflict::Wallet => "wallet address is already registered",
            IdentityConflict::PendingWallet => {
                "wallet address already has a pending onboarding request"
            }
            IdentityConflict::PendingUsername => {
                "username already has a pending onboarding request"
            }
        }
    }
}

#[async_trait]
pub trait ApprovalStore: Send + Sync {
    async fn begin(&self) -> anyhow::Result<Box<dyn StoreTx>>;

    async fn get_request(&self, id: i64) -> anyhow::Result<Option<ApprovalRequest>>;
    /// Returns one page of matches plus the total match count.
    async fn list_requests(
        &self,
        query: &RequestQuery,
    ) -> anyhow::Result<(Vec<ApprovalRequest>, i64)>;
    async fn get_pending_user(&self, request_id: i64) -> anyhow::Result<Option<PendingUser>>;

    async fn get_user(&self, id: i64) -> anyhow::Result<Option<User>>;
    async fn get_user_by_username(&self, username: &str) -> anyhow::Result<Option<User>>;
    async fn get_user_by_wallet(&self, wallet_address: &str) -> anyhow::Result<Option<User>>;
    async fn insert_user(&self, user: &NewUser) -> anyhow::Result<User>;

    async fn get_system_setting(&self, key: &str) -> anyhow::Result<Option<SystemSetting>>;

    /// Persist `expired` on stored-pending requests past their deadline.
    async fn expire_stale(&self, now: DateTime<Utc>) -> anyhow::Result<u64>;
}

#[async_trait]
pub trait StoreTx: Send {
    async fn insert_request(&mut self, req: &NewApprovalRequest)
        -> anyhow::Result<ApprovalRequest>;
    async fn insert_pending_user(&mut self, user: &NewPendingUser) -> anyhow::Result<PendingUser>;

    /// Check a username and wallet against registered users and live
    /// onboardings, holding them for the rest of the transaction. Pending
    /// users of expired requests that hold either identity are marked
    /// `discarded` first.
    async fn reserve_identity(
        &mut self,
        username: &str,
        wallet_address: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<IdentityConflict>>;

    /// Conditional `pending → approved|rejected` update. Returns `None` when
    /// the row is missing, no longer pending, or past its deadline.
    async fn claim_pending(
        &mut self,
        id: i64,
        resolution: &Resolution,
    ) -> anyhow::Result<Option<ApprovalRequest>>;

    /// Turn the pending user linked to `request_id` into an active user.
    async fn activate_pending_user(
        &mut self,
        request_id: i64,
        at: DateTime<Utc>,
    ) -> anyhow::Result<User>;
    async fn reject_pending_user(&mut self, request_id: i64) -> anyhow::Result<()>;

    /// Fails when the user does not exist.
    async fn update_user_role(
        &mut self,
        user_id: i64,
        role: &str,
        at: DateTime<Utc>,
    ) -> anyhow::Result<User>;
    async fn upsert_system_setting(
        &mut self,
        key: &str,
        value: &serde_json::Value,
        updated_by: i64,
        at: DateTime<Utc>,
    ) -> anyhow::Result<()>;

    async fn commit(self: Box<Self>) -> anyhow::Result<()>;
}

/// A write hit a uniqueness constraint.
#[derive(Debug, Error)]
#[error("unique violation: {0}")]
pub struct UniqueViolation(pub String);

/// Whether `err` came from a uniqueness constraint in either store.
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    if err.downcast_ref::<UniqueViolation>().is_some() {
        return true;
    }
    err.downcast_ref::<sqlx::Error>()
        .and_then(|e| e.as_database_error())
        .is_some_and(|e| e.is_unique_violation())
}
