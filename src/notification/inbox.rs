use async_trait::async_trait;

use super::NotificationSink;
use crate::models::notification::{EventKind, Recipients, RequestSummary};
use crate::store::postgres::PgStore;

/// Persists events into the `notifications` table so users can read them
/// from `GET /api/v1/notifications`.
#[derive(Clone)]
pub struct InboxNotifier {
    db: PgStore,
}

impl InboxNotifier {
    pub fn new(db: PgStore) -> Self {
        Self { db }
    }
}

fn title_for(kind: EventKind, summary: &RequestSummary) -> String {
    match kind {
        EventKind::ApprovalRequested => format!("Approval required: {}", summary.title),
        EventKind::ApprovalApproved => format!("Approved: {}", summary.title),
        EventKind::ApprovalRejected => format!("Rejected: {}", summary.title),
    }
}

#[async_trait]
impl NotificationSink for InboxNotifier {
    async fn notify(
        &self,
        recipients: &Recipients,
        kind: EventKind,
        summary: &RequestSummary,
    ) -> anyhow::Result<()> {
        let (role, user_id) = match recipients {
            Recipients::Role(r) => (Some(r.as_str()), None),
            Recipients::User(id) => (None, Some(*id)),
        };
        self.db
            .create_notification(
                role,
                user_id,
                kind.as_str(),
                &title_for(kind, summary),
                summary.reason.as_deref(),
                Some(serde_json::to_value(summary)?),
            )
            .await?;
        Ok(())
    }
}
