use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};

use super::{ApprovalStore, IdentityConflict, RequestQuery, StoreTx};
use crate::models::approval::{
    ApprovalRequest, ApprovalStatus, Decision, NewApprovalRequest, Resolution,
};
use crate::models::audit::{AuditEntry, AuditLogRow};
use crate::models::notification::Notification;
use crate::models::user::{NewPendingUser, NewUser, PendingUser, SystemSetting, User};

const REQUEST_COLUMNS: &str = "id, request_type, requested_by, approver_role, status, title, \
     description, request_data, approval_reason, rejection_reason, approved_by, approved_at, \
     expires_at, created_at, updated_at";

const USER_COLUMNS: &str = "id, username, wallet_address, role, password_hash, company_name, \
     is_active, created_at, updated_at";

const PENDING_USER_COLUMNS: &str = "id, request_id, username, wallet_address, password_hash, \
     requested_role, company_name, company_metadata, status, created_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub async fn ping(&self) -> anyhow::Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    // -- Audit Log Operations --

    pub async fn insert_audit_log(&self, entry: &AuditEntry) -> anyhow::Result<()> {
        sqlx::query(
            r#"INSERT INTO audit_logs (actor_id, actor_role, action, resource_type, resource_id,
                                       old_values, new_values, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"#,
        )
        .bind(entry.actor_id)
        .bind(&entry.actor_role)
        .bind(entry.action.as_str())
        .bind(&entry.resource_type)
        .bind(&entry.resource_id)
        .bind(&entry.old_values)
        .bind(&entry.new_values)
        .bind(entry.timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_audit_logs(
        &self,
        resource_type: Option<&str>,
        resource_id: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<Vec<AuditLogRow>> {
        let rows = sqlx::query_as::<_, AuditLogRow>(
            r#"SELECT id, actor_id, actor_role, action, resource_type, resource_id,
                      old_values, new_values, created_at
               FROM audit_logs
               WHERE ($1::TEXT IS NULL OR resource_type = $1)
                 AND ($2::TEXT IS NULL OR resource_id = $2)
               ORDER BY created_at DESC, id DESC
               LIMIT $3 OFFSET $4"#,
        )
        .bind(resource_type)
        .bind(resource_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // -- Notification Operations --

    pub async fn create_notification(
        &self,
        recipient_role: Option<&str>,
        recipient_user_id: Option<i64>,
        kind: &str,
        title: &str,
        body: Option<&str>,
        metadata: Option<serde_json::Value>,
    ) -> anyhow::Result<i64> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"INSERT INTO notifications (recipient_role, recipient_user_id, kind, title, body, metadata)
               VALUES ($1, $2, $3, $4, $5, $6)
               RETURNING id"#,
        )
        .bind(recipient_role)
        .bind(recipient_user_id)
        .bind(kind)
        .bind(title)
        .bind(body)
        .bind(metadata)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    /// Notifications addressed to the user directly or to any of `roles`.
    /// Read state of role-addressed rows is per user.
    pub async fn list_notifications(
        &self,
        user_id: i64,
        roles: &[String],
        limit: i64,
    ) -> anyhow::Result<Vec<Notification>> {
        let rows = sqlx::query_as::<_, Notification>(
            r#"SELECT n.id, n.recipient_role, n.recipient_user_id, n.kind, n.title, n.body,
                      n.metadata,
                      (n.is_read OR EXISTS(
                          SELECT 1 FROM notification_reads r
                          WHERE r.notification_id = n.id AND r.user_id = $1)) AS is_read,
                      n.created_at
               FROM notifications n
               WHERE n.recipient_user_id = $1 OR n.recipient_role = ANY($2)
               ORDER BY n.created_at DESC
               LIMIT $3"#,
        )
        .bind(user_id)
        .bind(roles)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Mark a notification read for one user. `false` when it is not
    /// addressed to the user or any of `roles`.
    pub async fn mark_notification_read(
        &self,
        id: i64,
        user_id: i64,
        roles: &[String],
    ) -> anyhow::Result<bool> {
        let direct = sqlx::query_scalar::<_, bool>(
            r#"SELECT COALESCE(recipient_user_id = $2, false) FROM notifications
               WHERE id = $1 AND (recipient_user_id = $2 OR recipient_role = ANY($3))"#,
        )
        .bind(id)
        .bind(user_id)
        .bind(roles)
        .fetch_optional(&self.pool)
        .await?;
        match direct {
            None => Ok(false),
            Some(true) => {
                sqlx::query("UPDATE notifications SET is_read = true WHERE id = $1")
                    .bind(id)
                    .execute(&self.pool)
                    .await?;
                Ok(true)
            }
            Some(false) => {
                sqlx::query(
                    r#"INSERT INTO notification_reads (notification_id, user_id)
                       VALUES ($1, $2)
                       ON CONFLICT DO NOTHING"#,
                )
                .bind(id)
                .bind(user_id)
                .execute(&self.pool)
                .await?;
                Ok(true)
            }
        }
    }
}

fn push_request_filters(qb: &mut QueryBuilder<'_, Postgres>, q: &RequestQuery) {
    qb.push(" WHERE TRUE");
    match q.status {
        Some(ApprovalStatus::Pending) => {
            qb.push(" AND status = 'pending' AND expires_at >= ");
            qb.push_bind(q.now);
        }
        Some(ApprovalStatus::Expired) => {
            qb.push(" AND (status = 'expired' OR (status = 'pending' AND expires_at < ");
            qb.push_bind(q.now);
            qb.push("))");
        }
        Some(other) => {
            qb.push(" AND status = ");
            qb.push_bind(other);
        }
        None => {}
    }
    if let Some(t) = q.request_type {
        qb.push(" AND request_type = ");
        qb.push_bind(t);
    }
    if let Some(by) = q.requested_by {
        qb.push(" AND requested_by = ");
        qb.push_bind(by);
    }
    if let Some(roles) = &q.approver_roles {
        qb.push(" AND approver_role = ANY(");
        qb.push_bind(roles.clone());
        qb.push(")");
    }
}

#[async_trait]
impl ApprovalStore for PgStore {
    async fn begin(&self) -> anyhow::Result<Box<dyn StoreTx>> {
        let tx = self.pool.begin().await.context("failed to open transaction")?;
        Ok(Box::new(PgTx { tx }))
    }

    async fn get_request(&self, id: i64) -> anyhow::Result<Option<ApprovalRequest>> {
        let row = sqlx::query_as::<_, ApprovalRequest>(&format!(
            "SELECT {REQUEST_COLUMNS} FROM approval_requests WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_requests(
        &self,
        query: &RequestQuery,
    ) -> anyhow::Result<(Vec<ApprovalRequest>, i64)> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM approval_requests");
        push_request_filters(&mut count, query);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut page = QueryBuilder::<Postgres>::new(format!(
            "SELECT {REQUEST_COLUMNS} FROM approval_requests"
        ));
        push_request_filters(&mut page, query);
        page.push(" ORDER BY created_at DESC, id DESC LIMIT ");
        page.push_bind(query.limit);
        page.push(" OFFSET ");
        page.push_bind(query.offset);
        let rows = page
            .build_query_as::<ApprovalRequest>()
            .fetch_all(&self.pool)
            .await?;

        Ok((rows, total))
    }

    async fn get_pending_user(&self, request_id: i64) -> anyhow::Result<Option<PendingUser>> {
        let row = sqlx::query_as::<_, PendingUser>(&format!(
            "SELECT {PENDING_USER_COLUMNS} FROM pending_users WHERE request_id = $1"
        ))
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get_user(&self, id: i64) -> anyhow::Result<Option<User>> {
        let row = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get_user_by_username(&self, username: &str) -> anyhow::Result<Option<User>> {
        let row = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE LOWER(username) = LOWER($1)"
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get_user_by_wallet(&self, wallet_address: &str) -> anyhow::Result<Option<User>> {
        let row = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE wallet_address = LOWER($1)"
        ))
        .bind(wallet_address)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn insert_user(&self, user: &NewUser) -> anyhow::Result<User> {
        let row = sqlx::query_as::<_, User>(&format!(
            r#"INSERT INTO users (username, wallet_address, role, password_hash, company_name)
               VALUES ($1, LOWER($2), $3, $4, $5)
               RETURNING {USER_COLUMNS}"#
        ))
        .bind(&user.username)
        .bind(&user.wallet_address)
        .bind(&user.role)
        .bind(&user.password_hash)
        .bind(&user.company_name)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get_system_setting(&self, key: &str) -> anyhow::Result<Option<SystemSetting>> {
        let row = sqlx::query_as::<_, SystemSetting>(
            "SELECT key, value, updated_by, updated_at FROM system_settings WHERE key = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn expire_stale(&self, now: DateTime<Utc>) -> anyhow::Result<u64> {
        let result = sqlx::query(
            r#"UPDATE approval_requests
               SET status = 'expired', updated_at = $1
               WHERE status = 'pending' AND expires_at < $1"#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

/// Open Postgres transaction. Rolled back by sqlx when dropped uncommitted.
pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgTx {
    async fn insert_request(
        &mut self,
        req: &NewApprovalRequest,
    ) -> anyhow::Result<ApprovalRequest> {
        let row = sqlx::query_as::<_, ApprovalRequest>(&format!(
            r#"INSERT INTO approval_requests
                   (request_type, requested_by, approver_role, status, title, description,
                    request_data, expires_at, created_at, updated_at)
               VALUES ($1, $2, $3, 'pending', $4, $5, $6, $7, $8, $8)
               RETURNING {REQUEST_COLUMNS}"#
        ))
        .bind(req.request_type)
        .bind(req.requested_by)
        .bind(&req.approver_role)
        .bind(&req.title)
        .bind(&req.description)
        .bind(&req.request_data)
        .bind(req.expires_at)
        .bind(req.created_at)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn insert_pending_user(&mut self, user: &NewPendingUser) -> anyhow::Result<PendingUser> {
        let row = sqlx::query_as::<_, PendingUser>(&format!(
            r#"INSERT INTO pending_users
                   (request_id, username, wallet_address, password_hash, requested_role,
                    company_name, company_metadata, status, created_at)
               VALUES ($1, $2, LOWER($3), $4, $5, $6, $7, 'pending_super_admin_approval', $8)
               RETURNING {PENDING_USER_COLUMNS}"#
        ))
        .bind(user.request_id)
        .bind(&user.username)
        .bind(&user.wallet_address)
        .bind(&user.password_hash)
        .bind(&user.requested_role)
        .bind(&user.company_name)
        .bind(&user.company_metadata)
        .bind(user.created_at)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn reserve_identity(
        &mut self,
        username: &str,
        wallet_address: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<IdentityConflict>> {
        // Username lock first, then wallet, so concurrent onboardings queue
        // instead of deadlocking. Both are released at commit or rollback.
        sqlx::query("SELECT pg_advisory_xact_lock(1, hashtext(LOWER($1)))")
            .bind(username)
            .execute(&mut *self.tx)
            .await?;
        sqlx::query("SELECT pg_advisory_xact_lock(2, hashtext(LOWER($1)))")
            .bind(wallet_address)
            .execute(&mut *self.tx)
            .await?;

        let username_taken = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM users WHERE LOWER(username) = LOWER($1))",
        )
        .bind(username)
        .fetch_one(&mut *self.tx)
        .await?;
        if username_taken {
            return Ok(Some(IdentityConflict::Username));
        }

        let wallet_taken = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM users WHERE wallet_address = LOWER($1))",
        )
        .bind(wallet_address)
        .fetch_one(&mut *self.tx)
        .await?;
        if wallet_taken {
            return Ok(Some(IdentityConflict::Wallet));
        }

        sqlx::query(
            r#"UPDATE pending_users p
               SET status = 'discarded'
               FROM approval_requests r
               WHERE r.id = p.request_id
                 AND p.status = 'pending_super_admin_approval'
                 AND (LOWER(p.username) = LOWER($1) OR p.wallet_address = LOWER($2))
                 AND NOT (r.status = 'pending' AND r.expires_at >= $3)"#,
        )
        .bind(username)
        .bind(wallet_address)
        .bind(now)
        .execute(&mut *self.tx)
        .await?;

        let same_wallet = sqlx::query_scalar::<_, bool>(
            r#"SELECT p.wallet_address = LOWER($2) FROM pending_users p
               WHERE p.status = 'pending_super_admin_approval'
                 AND (LOWER(p.username) = LOWER($1) OR p.wallet_address = LOWER($2))
               ORDER BY 1 DESC
               LIMIT 1"#,
        )
        .bind(username)
        .bind(wallet_address)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(same_wallet.map(|w| {
            if w {
                IdentityConflict::PendingWallet
            } else {
                IdentityConflict::PendingUsername
            }
        }))
    }

    async fn claim_pending(
        &mut self,
        id: i64,
        resolution: &Resolution,
    ) -> anyhow::Result<Option<ApprovalRequest>> {
        let (approval_reason, rejection_reason) = match resolution.decision {
            Decision::Approve => (resolution.reason.as_deref(), None),
            Decision::Reject => (None, resolution.reason.as_deref()),
        };
        // The status guard makes concurrent deciders race on the row lock;
        // the loser sees zero rows.
        let row = sqlx::query_as::<_, ApprovalRequest>(&format!(
            r#"UPDATE approval_requests
               SET status = $2, approved_by = $3, approved_at = $4, updated_at = $4,
                   approval_reason = $5, rejection_reason = $6
               WHERE id = $1 AND status = 'pending' AND expires_at >= $4
               RETURNING {REQUEST_COLUMNS}"#
        ))
        .bind(id)
        .bind(resolution.decision.resulting_status())
        .bind(resolution.decided_by)
        .bind(resolution.decided_at)
        .bind(approval_reason)
        .bind(rejection_reason)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn activate_pending_user(
        &mut self,
        request_id: i64,
        at: DateTime<Utc>,
    ) -> anyhow::Result<User> {
        let pending = sqlx::query_as::<_, PendingUser>(&format!(
            r#"UPDATE pending_users SET status = 'activated'
               WHERE request_id = $1 AND status = 'pending_super_admin_approval'
               RETURNING {PENDING_USER_COLUMNS}"#
        ))
        .bind(request_id)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or_else(|| anyhow!("no pending user awaiting activation for request {}", request_id))?;

        let user = sqlx::query_as::<_, User>(&format!(
            r#"INSERT INTO users (username, wallet_address, role, password_hash, company_name,
                                  is_active, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, true, $6, $6)
               RETURNING {USER_COLUMNS}"#
        ))
        .bind(&pending.username)
        .bind(&pending.wallet_address)
        .bind(&pending.requested_role)
        .bind(&pending.password_hash)
        .bind(&pending.company_name)
        .bind(at)
        .fetch_one(&mut *self.tx)
        .await
        .with_context(|| format!("failed to materialize pending user {}", pending.id))?;
        Ok(user)
    }

    async fn reject_pending_user(&mut self, request_id: i64) -> anyhow::Result<()> {
        sqlx::query(
            r#"UPDATE pending_users SET status = 'rejected'
               WHERE request_id = $1 AND status = 'pending_super_admin_approval'"#,
        )
        .bind(request_id)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_user_role(
        &mut self,
        user_id: i64,
        role: &str,
        at: DateTime<Utc>,
    ) -> anyhow::Result<User> {
        let user = sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET role = $2, updated_at = $3 WHERE id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(user_id)
        .bind(role)
        .bind(at)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or_else(|| anyhow!("user {} does not exist", user_id))?;
        Ok(user)
    }

    async fn upsert_system_setting(
        &mut self,
        key: &str,
        value: &serde_json::Value,
        updated_by: i64,
        at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"INSERT INTO system_settings (key, value, updated_by, updated_at)
               VALUES ($1, $2, $3, $4)
               ON CONFLICT (key) DO UPDATE
               SET value = EXCLUDED.value, updated_by = EXCLUDED.updated_by,
                   updated_at = EXCLUDED.updated_at"#,
        )
        .bind(key)
        .bind(value)
        .bind(updated_by)
        .bind(at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> anyhow::Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
