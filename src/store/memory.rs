use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{ApprovalStore, IdentityConflict, RequestQuery, StoreTx, UniqueViolation};
use crate::models::approval::{
    ApprovalRequest, ApprovalStatus, Decision, NewApprovalRequest, Resolution,
};
use crate::models::user::{
    NewPendingUser, NewUser, PendingUser, PendingUserStatus, SystemSetting, User,
};

#[derive(Debug, Clone, Default)]
struct MemState {
    requests: BTreeMap<i64, ApprovalRequest>,
    pending_users: BTreeMap<i64, PendingUser>,
    users: BTreeMap<i64, User>,
    settings: HashMap<String, SystemSetting>,
    next_request_id: i64,
    next_pending_user_id: i64,
    next_user_id: i64,
}

impl MemState {
    fn username_taken(&self, username: &str) -> bool {
        self.users
            .values()
            .any(|u| u.username.eq_ignore_ascii_case(username))
    }

    fn wallet_taken(&self, wallet: &str) -> bool {
        self.users.values().any(|u| {
            u.wallet_address
                .as_deref()
                .is_some_and(|w| w.eq_ignore_ascii_case(wallet))
        })
    }

    fn insert_user(&mut self, user: &NewUser, at: DateTime<Utc>) -> anyhow::Result<User> {
        if self.username_taken(&user.username) {
            return Err(UniqueViolation(format!("users.username '{}'", user.username)).into());
        }
        if let Some(w) = &user.wallet_address {
            if self.wallet_taken(w) {
                return Err(UniqueViolation(format!("users.wallet_address '{}'", w)).into());
            }
        }
        self.next_user_id += 1;
        let row = User {
            id: self.next_user_id,
            username: user.username.clone(),
            wallet_address: user.wallet_address.as_ref().map(|w| w.to_lowercase()),
            role: user.role.clone(),
            password_hash: user.password_hash.clone(),
            company_name: user.company_name.clone(),
            is_active: true,
            created_at: at,
            updated_at: at,
        };
        self.users.insert(row.id, row.clone());
        Ok(row)
    }

    fn live_pending(&self) -> impl Iterator<Item = &PendingUser> {
        self.pending_users
            .values()
            .filter(|p| p.status == PendingUserStatus::PendingSuperAdminApproval)
    }

    fn pending_user_for(&mut self, request_id: i64) -> Option<&mut PendingUser> {
        self.pending_users
            .values_mut()
            .find(|p| p.request_id == request_id)
    }
}

/// In-process store with the same transactional semantics as Postgres:
/// transactions are serialised and their writes become visible only on
/// commit.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

pub struct MemoryTx {
    guard: OwnedMutexGuard<MemState>,
    staged: MemState,
}

#[async_trait]
impl ApprovalStore for MemoryStore {
    async fn begin(&self) -> anyhow::Result<Box<dyn StoreTx>> {
        let guard = self.state.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryTx { guard, staged }))
    }

    async fn get_request(&self, id: i64) -> anyhow::Result<Option<ApprovalRequest>> {
        Ok(self.state.lock().await.requests.get(&id).cloned())
    }

    async fn list_requests(
        &self,
        query: &RequestQuery,
    ) -> anyhow::Result<(Vec<ApprovalRequest>, i64)> {
        let state = self.state.lock().await;
        let mut matched: Vec<&ApprovalRequest> =
            state.requests.values().filter(|r| query.matches(r)).collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        let total = matched.len() as i64;
        let page = matched
            .into_iter()
            .skip(query.offset.max(0) as usize)
            .take(query.limit.max(0) as usize)
            .cloned()
            .collect();
        Ok((page, total))
    }

    async fn get_pending_user(&self, request_id: i64) -> anyhow::Result<Option<PendingUser>> {
        let state = self.state.lock().await;
        Ok(state
            .pending_users
            .values()
            .find(|p| p.request_id == request_id)
            .cloned())
    }

    async fn get_user(&self, id: i64) -> anyhow::Result<Option<User>> {
        Ok(self.state.lock().await.users.get(&id).cloned())
    }

    async fn get_user_by_username(&self, username: &str) -> anyhow::Result<Option<User>> {
        let state = self.state.lock().await;
        Ok(state
            .users
            .values()
            .find(|u| u.username.eq_ignore_ascii_case(username))
            .cloned())
    }

    async fn get_user_by_wallet(&self, wallet_address: &str) -> anyhow::Result<Option<User>> {
        let state = self.state.lock().await;
        Ok(state
            .users
            .values()
            .find(|u| {
                u.wallet_address
                    .as_deref()
                    .is_some_and(|w| w.eq_ignore_ascii_case(wallet_address))
            })
            .cloned())
    }

    async fn insert_user(&self, user: &NewUser) -> anyhow::Result<User> {
        self.state.lock().await.insert_user(user, Utc::now())
    }

    async fn get_system_setting(&self, key: &str) -> anyhow::Result<Option<SystemSetting>> {
        Ok(self.state.lock().await.settings.get(key).cloned())
    }

    async fn expire_stale(&self, now: DateTime<Utc>) -> anyhow::Result<u64> {
        let mut state = self.state.lock().await;
        let mut count = 0;
        for req in state.requests.values_mut() {
            if req.status == ApprovalStatus::Pending && now > req.expires_at {
                req.status = ApprovalStatus::Expired;
                req.updated_at = now;
                count += 1;
            }
        }
        Ok(count)
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn insert_request(
        &mut self,
        req: &NewApprovalRequest,
    ) -> anyhow::Result<ApprovalRequest> {
        self.staged.next_request_id += 1;
        let row = ApprovalRequest {
            id: self.staged.next_request_id,
            request_type: req.request_type,
            requested_by: req.requested_by,
            approver_role: req.approver_role.clone(),
            status: ApprovalStatus::Pending,
            title: req.title.clone(),
            description: req.description.clone(),
            request_data: req.request_data.clone(),
            approval_reason: None,
            rejection_reason: None,
            approved_by: None,
            approved_at: None,
            expires_at: req.expires_at,
            created_at: req.created_at,
            updated_at: req.created_at,
        };
        self.staged.requests.insert(row.id, row.clone());
        Ok(row)
    }

    async fn insert_pending_user(&mut self, user: &NewPendingUser) -> anyhow::Result<PendingUser> {
        if !self.staged.requests.contains_key(&user.request_id) {
            bail!(
                "foreign key violation: approval request {} does not exist",
                user.request_id
            );
        }
        let wallet = user.wallet_address.to_lowercase();
        if self
            .staged
            .live_pending()
            .any(|p| p.username.eq_ignore_ascii_case(&user.username))
        {
            let key = format!("pending_users.username '{}'", user.username);
            return Err(UniqueViolation(key).into());
        }
        if self.staged.live_pending().any(|p| p.wallet_address == wallet) {
            let key = format!("pending_users.wallet_address '{}'", wallet);
            return Err(UniqueViolation(key).into());
        }
        self.staged.next_pending_user_id += 1;
        let row = PendingUser {
            id: self.staged.next_pending_user_id,
            request_id: user.request_id,
            username: user.username.clone(),
            wallet_address: wallet,
            password_hash: user.password_hash.clone(),
            requested_role: user.requested_role.clone(),
            company_name: user.company_name.clone(),
            company_metadata: user.company_metadata.clone(),
            status: PendingUserStatus::PendingSuperAdminApproval,
            created_at: user.created_at,
        };
        self.staged.pending_users.insert(row.id, row.clone());
        Ok(row)
    }

    async fn reserve_identity(
        &mut self,
        username: &str,
        wallet_address: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<IdentityConflict>> {
        let state = &mut self.staged;
        if state.username_taken(username) {
            return Ok(Some(IdentityConflict::Username));
        }
        if state.wallet_taken(wallet_address) {
            return Ok(Some(IdentityConflict::Wallet));
        }
        let mut conflict = None;
        for p in state.pending_users.values_mut() {
            if p.status != PendingUserStatus::PendingSuperAdminApproval {
                continue;
            }
            let same_wallet = p.wallet_address.eq_ignore_ascii_case(wallet_address);
            let same_name = p.username.eq_ignore_ascii_case(username);
            if !same_wallet && !same_name {
                continue;
            }
            let live = state
                .requests
                .get(&p.request_id)
                .is_some_and(|r| r.is_pending(now));
            if !live {
                p.status = PendingUserStatus::Discarded;
            } else if same_wallet {
                conflict = Some(IdentityConflict::PendingWallet);
            } else if conflict.is_none() {
                conflict = Some(IdentityConflict::PendingUsername);
            }
        }
        Ok(conflict)
    }

    async fn claim_pending(
        &mut self,
        id: i64,
        resolution: &Resolution,
    ) -> anyhow::Result<Option<ApprovalRequest>> {
        let Some(req) = self.staged.requests.get_mut(&id) else {
            return Ok(None);
        };
        if !req.is_pending(resolution.decided_at) {
            return Ok(None);
        }
        req.status = resolution.decision.resulting_status();
        req.approved_by = Some(resolution.decided_by);
        req.approved_at = Some(resolution.decided_at);
        req.updated_at = resolution.decided_at;
        match resolution.decision {
            Decision::Approve => req.approval_reason = resolution.reason.clone(),
            Decision::Reject => req.rejection_reason = resolution.reason.clone(),
        }
        Ok(Some(req.clone()))
    }

    async fn activate_pending_user(
        &mut self,
        request_id: i64,
        at: DateTime<Utc>,
    ) -> anyhow::Result<User> {
        let pending = self
            .staged
            .pending_user_for(request_id)
            .ok_or_else(|| anyhow!("no pending user linked to request {}", request_id))?;
        if pending.status != PendingUserStatus::PendingSuperAdminApproval {
            bail!(
                "pending user {} is already {}",
                pending.id,
                pending.status.as_str()
            );
        }
        pending.status = PendingUserStatus::Activated;
        let new_user = NewUser {
            username: pending.username.clone(),
            wallet_address: Some(pending.wallet_address.clone()),
            role: pending.requested_role.clone(),
            password_hash: pending.password_hash.clone(),
            company_name: Some(pending.company_name.clone()),
        };
        self.staged.insert_user(&new_user, at)
    }

    async fn reject_pending_user(&mut self, request_id: i64) -> anyhow::Result<()> {
        if let Some(pending) = self.staged.pending_user_for(request_id) {
            if pending.status == PendingUserStatus::PendingSuperAdminApproval {
                pending.status = PendingUserStatus::Rejected;
            }
        }
        Ok(())
    }

    async fn update_user_role(
        &mut self,
        user_id: i64,
        role: &str,
        at: DateTime<Utc>,
    ) -> anyhow::Result<User> {
        let user = self
            .staged
            .users
            .get_mut(&user_id)
            .ok_or_else(|| anyhow!("user {} does not exist", user_id))?;
        user.role = role.to_string();
        user.updated_at = at;
        Ok(user.clone())
    }

    async fn upsert_system_setting(
        &mut self,
        key: &str,
        value: &serde_json::Value,
        updated_by: i64,
        at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        self.staged.settings.insert(
            key.to_string(),
            SystemSetting {
                key: key.to_string(),
                value: value.clone(),
                updated_by: Some(updated_by),
                updated_at: at,
            },
        );
        Ok(())
    }

    async fn commit(self: Box<Self>) -> anyhow::Result<()> {
        let MemoryTx { mut guard, staged } = *self;
        *guard = staged;
        Ok(())
    }
}
