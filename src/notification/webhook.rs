use anyhow::Result;
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::NotificationSink;
use crate::models::notification::{EventKind, Recipients, RequestSummary};

// ── Webhook Event Types ───────────────────────────────────────

/// A structured event payload sent to webhook endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookEvent {
    /// Event type identifier, e.g. "approval_requested", "approval_approved".
    pub event_type: String,
    /// ISO-8601 timestamp of when the event occurred.
    pub timestamp: String,
    /// Who the event is addressed to.
    pub recipients: Recipients,
    /// The request the event is about.
    pub request: RequestSummary,
}

impl WebhookEvent {
    pub fn new(recipients: &Recipients, kind: EventKind, summary: &RequestSummary) -> Self {
        Self {
            event_type: kind.as_str().to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            recipients: recipients.clone(),
            request: summary.clone(),
        }
    }
}

// ── HMAC Signing ─────────────────────────────────────────────

/// Compute HMAC-SHA256 of `payload` using `secret`.
/// Returns lowercase hex digest (e.g. "sha256=<hex>").
fn hmac_sha256_hex(secret: &str, payload: &[u8]) -> Result<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("invalid HMAC key: {}", e))?;
    mac.update(payload);
    let bytes = mac.finalize().into_bytes();
    Ok(format!("sha256={}", hex::encode(bytes)))
}

// ── Webhook Notifier ──────────────────────────────────────────

/// Delivers workflow events to every configured URL.
/// Supports:
/// - HMAC-SHA256 signing (X-Alupass-Signature header)
/// - Up to 3 retries with exponential back-off (1s → 5s → 25s)
#[derive(Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    urls: Vec<String>,
    signing_secret: Option<String>,
    backoff_secs: Vec<u64>,
}

impl WebhookNotifier {
    pub fn new(urls: Vec<String>, signing_secret: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("Alupass-Webhook/1.0")
            .build()?;
        Ok(Self {
            client,
            urls,
            signing_secret,
            backoff_secs: vec![0, 1, 5, 25],
        })
    }

    /// Override the retry schedule. The first entry is the delay before the
    /// first attempt.
    pub fn with_backoff(mut self, backoff_secs: Vec<u64>) -> Self {
        self.backoff_secs = backoff_secs;
        self
    }

    /// Send a signed webhook event to a single URL with retry.
    /// Returns `Ok(())` if delivery succeeded on any attempt.
    pub async fn send(&self, url: &str, event: &WebhookEvent) -> Result<()> {
        let payload = serde_json::to_vec(event)
            .map_err(|e| anyhow::anyhow!("webhook serialize error: {}", e))?;
        let delivery_id = uuid::Uuid::new_v4().to_string();
        let timestamp = chrono::Utc::now().timestamp().to_string();
        let signature = match &self.signing_secret {
            Some(s) => Some(hmac_sha256_hex(s, &payload)?),
            None => None,
        };

        for (attempt, &delay) in self.backoff_secs.iter().enumerate() {
            if delay > 0 {
                debug!(
                    url,
                    attempt,
                    delay_secs = delay,
                    event_type = %event.event_type,
                    "retrying webhook delivery"
                );
                tokio::time::sleep(Duration::from_secs(delay)).await;
            }

            let mut req = self
                .client
                .post(url)
                .header("content-type", "application/json")
                .header("x-alupass-delivery-id", &delivery_id)
                .header("x-alupass-timestamp", &timestamp)
                .header("x-alupass-event", &event.event_type);

            if let Some(ref sig) = signature {
                req = req.header("x-alupass-signature", sig.as_str());
            }

            match req.body(payload.clone()).send().await {
                Ok(resp) if resp.status().is_success() => {
                    info!(
                        url,
                        event_type = %event.event_type,
                        delivery_id = %delivery_id,
                        attempt,
                        status = %resp.status(),
                        "webhook delivered successfully"
                    );
                    return Ok(());
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    warn!(
                        url,
                        event_type = %event.event_type,
                        delivery_id = %delivery_id,
                        attempt,
                        status = %status,
                        body = %body,
                        "webhook delivery failed (non-2xx), will retry"
                    );
                }
                Err(e) => {
                    warn!(
                        url,
                        event_type = %event.event_type,
                        delivery_id = %delivery_id,
                        attempt,
                        error = %e,
                        "webhook request error, will retry"
                    );
                }
            }
        }

        Err(anyhow::anyhow!(
            "webhook delivery failed after {} attempts: {}",
            self.backoff_secs.len(),
            url
        ))
    }
}

#[async_trait]
impl NotificationSink for WebhookNotifier {
    async fn notify(
        &self,
        recipients: &Recipients,
        kind: EventKind,
        summary: &RequestSummary,
    ) -> Result<()> {
        if self.urls.is_empty() {
            return Ok(());
        }
        let event = WebhookEvent::new(recipients, kind, summary);
        let mut failed = Vec::new();
        for url in &self.urls {
            if let Err(e) = self.send(url, &event).await {
                warn!(url, error = %e, "webhook dispatch ultimately failed");
                failed.push(url.as_str());
            }
        }
        if failed.is_empty() {
            Ok(())
        } else {
            Err(anyhow::anyhow!("webhook delivery failed for: {}", failed.join(", ")))
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn summary() -> RequestSummary {
        RequestSummary {
            request_id: 42,
            request_type: "supplier_onboarding".into(),
            title: "Onboard smelter".into(),
            status: "pending".into(),
            approver_role: "super_admin".into(),
            requested_by: 3,
            reason: None,
            expires_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_event_carries_kind_and_request() {
        let event = WebhookEvent::new(
            &Recipients::Role("super_admin".into()),
            EventKind::ApprovalRequested,
            &summary(),
        );
        assert_eq!(event.event_type, "approval_requested");
        assert_eq!(event.request.request_id, 42);
    }

    #[test]
    fn test_event_serializes_to_json() {
        let event = WebhookEvent::new(&Recipients::User(3), EventKind::ApprovalRejected, &summary());
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "approval_rejected");
        assert_eq!(json["recipients"]["type"], "user");
        assert_eq!(json["recipients"]["value"], 3);
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn test_hmac_signature_deterministic() {
        let sig1 = hmac_sha256_hex("secret123", b"payload").unwrap();
        let sig2 = hmac_sha256_hex("secret123", b"payload").unwrap();
        assert_eq!(sig1, sig2);
        assert!(sig1.starts_with("sha256="));
    }

    #[test]
    fn test_hmac_signature_different_secret() {
        let sig1 = hmac_sha256_hex("secret1", b"payload").unwrap();
        let sig2 = hmac_sha256_hex("secret2", b"payload").unwrap();
        assert_ne!(sig1, sig2);
    }
}
