//! Fire-and-forget delivery of workflow events.
//!
//! The engine calls [`NotificationSink::notify`] after a write has committed;
//! sinks must not block it and their failures are only logged.

pub mod inbox;
pub mod slack;
pub mod webhook;

use std::sync::Arc;

use async_trait::async_trait;

use crate::models::notification::{EventKind, Recipients, RequestSummary};

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(
        &self,
        recipients: &Recipients,
        kind: EventKind,
        summary: &RequestSummary,
    ) -> anyhow::Result<()>;
}

/// Sink that drops everything. Used when no channel is configured.
pub struct NoopNotifier;

#[async_trait]
impl NotificationSink for NoopNotifier {
    async fn notify(&self, _: &Recipients, _: EventKind, _: &RequestSummary) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Forwards each event to every configured channel on a background task.
/// One failing channel does not stop the others.
#[derive(Clone, Default)]
pub struct FanoutNotifier {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl FanoutNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Spawn delivery and return immediately.
    pub fn dispatch(&self, recipients: Recipients, kind: EventKind, summary: RequestSummary) {
        if self.sinks.is_empty() {
            tracing::debug!(kind = kind.as_str(), "no notification sinks configured, skipping");
            return;
        }
        let sinks = self.sinks.clone();
        tokio::spawn(async move {
            for sink in &sinks {
                if let Err(e) = sink.notify(&recipients, kind, &summary).await {
                    tracing::warn!(
                        request_id = summary.request_id,
                        kind = kind.as_str(),
                        error = %e,
                        "notification delivery failed"
                    );
                }
            }
        });
    }
}

#[async_trait]
impl NotificationSink for FanoutNotifier {
    async fn notify(
        &self,
        recipients: &Recipients,
        kind: EventKind,
        summary: &RequestSummary,
    ) -> anyhow::Result<()> {
        self.dispatch(recipients.clone(), kind, summary.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    struct Failing;

    #[async_trait]
    impl NotificationSink for Failing {
        async fn notify(&self, _: &Recipients, _: EventKind, _: &RequestSummary) -> anyhow::Result<()> {
            anyhow::bail!("channel down")
        }
    }

    struct Counting {
        hits: AtomicUsize,
        done: Notify,
    }

    #[async_trait]
    impl NotificationSink for Counting {
        async fn notify(&self, _: &Recipients, _: EventKind, _: &RequestSummary) -> anyhow::Result<()> {
            self.hits.fetch_add(1, Ordering::SeqCst);
            self.done.notify_one();
            Ok(())
        }
    }

    fn summary() -> RequestSummary {
        RequestSummary {
            request_id: 1,
            request_type: "system_configuration".into(),
            title: "t".into(),
            status: "pending".into(),
            approver_role: "super_admin".into(),
            requested_by: 2,
            reason: None,
            expires_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_failing_sink_does_not_block_the_next() {
        let counting = Arc::new(Counting {
            hits: AtomicUsize::new(0),
            done: Notify::new(),
        });
        let fanout = FanoutNotifier::new()
            .with_sink(Arc::new(Failing))
            .with_sink(counting.clone());

        fanout
            .notify(
                &Recipients::Role("super_admin".into()),
                EventKind::ApprovalRequested,
                &summary(),
            )
            .await
            .unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(2), counting.done.notified())
            .await
            .expect("second sink never called");
        assert_eq!(counting.hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_empty_fanout() {
        assert!(FanoutNotifier::new().is_empty());
    }
}
