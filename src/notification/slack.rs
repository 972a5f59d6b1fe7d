use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;

use super::NotificationSink;
use crate::models::notification::{EventKind, Recipients, RequestSummary};

#[derive(Clone)]
pub struct SlackNotifier {
    client: reqwest::Client,
    webhook_url: Option<String>,
}

impl SlackNotifier {
    pub fn new(webhook_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            webhook_url,
        }
    }
}

fn render(recipients: &Recipients, kind: EventKind, summary: &RequestSummary) -> String {
    let audience = match recipients {
        Recipients::Role(role) => format!("role `{}`", role),
        Recipients::User(id) => format!("user #{}", id),
    };
    match kind {
        EventKind::ApprovalRequested => format!(
            "*Approval required* for {}\n\nRequest `#{}` ({})\nTitle: {}\nExpires: {}\n\nRun `alupass approval approve {}` or `alupass approval reject {}`",
            audience,
            summary.request_id,
            summary.request_type,
            summary.title,
            summary.expires_at,
            summary.request_id,
            summary.request_id
        ),
        EventKind::ApprovalApproved | EventKind::ApprovalRejected => format!(
            "Request `#{}` ({}) was *{}* (notifying {})\nTitle: {}\nReason: {}",
            summary.request_id,
            summary.request_type,
            summary.status,
            audience,
            summary.title,
            summary.reason.as_deref().unwrap_or("-")
        ),
    }
}

#[async_trait]
impl NotificationSink for SlackNotifier {
    async fn notify(
        &self,
        recipients: &Recipients,
        kind: EventKind,
        summary: &RequestSummary,
    ) -> anyhow::Result<()> {
        let url = match &self.webhook_url {
            Some(u) => u,
            None => {
                tracing::debug!("No Slack webhook URL configured, skipping notification");
                return Ok(());
            }
        };

        let message = SlackMessage {
            text: render(recipients, kind, summary),
        };

        let resp = self
            .client
            .post(url)
            .json(&message)
            .send()
            .await
            .context("failed to send slack notification")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("slack returned error: status={}, body={}", status, body);
        }

        tracing::info!(
            request_id = summary.request_id,
            kind = kind.as_str(),
            "Sent Slack notification"
        );
        Ok(())
    }
}

#[derive(Serialize)]
struct SlackMessage {
    text: String,
}
