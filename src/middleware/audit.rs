use async_trait::async_trait;

use crate::models::audit::AuditEntry;
use crate::store::postgres::PgStore;

/// Append-only record of workflow mutations.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: AuditEntry) -> anyhow::Result<()>;
}

/// Async audit log writer. Fires off a Tokio task to insert
/// the audit entry into PG without blocking the response path.
#[derive(Clone)]
pub struct PgAuditSink {
    db: PgStore,
    detached: bool,
}

impl PgAuditSink {
    pub fn new(db: PgStore) -> Self {
        Self { db, detached: true }
    }

    /// Writes before returning. For short-lived processes (CLI commands)
    /// that would exit before a spawned insert runs.
    pub fn inline(db: PgStore) -> Self {
        Self {
            db,
            detached: false,
        }
    }
}

#[async_trait]
impl AuditSink for PgAuditSink {
    async fn record(&self, entry: AuditEntry) -> anyhow::Result<()> {
        if !self.detached {
            return self.db.insert_audit_log(&entry).await;
        }
        let db = self.db.clone();
        tokio::spawn(async move {
            if let Err(e) = db.insert_audit_log(&entry).await {
                tracing::error!(
                    resource_type = %entry.resource_type,
                    resource_id = %entry.resource_id,
                    action = entry.action.as_str(),
                    "failed to write audit log: {}",
                    e
                );
            } else {
                tracing::debug!(
                    resource_id = %entry.resource_id,
                    action = entry.action.as_str(),
                    "audit log recorded"
                );
            }
        });
        Ok(())
    }
}

/// Writes audit entries to the tracing log only. The engine's default when
/// no database sink is configured.
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, entry: AuditEntry) -> anyhow::Result<()> {
        tracing::info!(
            actor_id = entry.actor_id,
            actor_role = %entry.actor_role,
            action = entry.action.as_str(),
            resource_type = %entry.resource_type,
            resource_id = %entry.resource_id,
            "audit"
        );
        Ok(())
    }
}
