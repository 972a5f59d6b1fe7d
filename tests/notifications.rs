//! Outbound channels against a local mock HTTP server.

use std::sync::Arc;

use alupass::models::notification::{EventKind, Recipients, RequestSummary};
use alupass::notification::slack::SlackNotifier;
use alupass::notification::webhook::WebhookNotifier;
use alupass::notification::{FanoutNotifier, NotificationSink};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tokio_test::{assert_err, assert_ok};
use wiremock::matchers::{header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn summary() -> RequestSummary {
    RequestSummary {
        request_id: 7,
        request_type: "supplier_onboarding".into(),
        title: "Supplier onboarding: nordic-bauxite (miner)".into(),
        status: "pending".into(),
        approver_role: "super_admin".into(),
        requested_by: 1,
        reason: None,
        expires_at: chrono::Utc::now(),
    }
}

fn expected_signature(secret: &str, body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

#[tokio::test]
async fn test_webhook_delivery_is_signed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hooks/alupass"))
        .and(header("x-alupass-event", "approval_requested"))
        .and(header_exists("x-alupass-delivery-id"))
        .and(header_exists("x-alupass-timestamp"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let notifier = WebhookNotifier::new(
        vec![format!("{}/hooks/alupass", server.uri())],
        Some("whsec_test".into()),
    )
    .unwrap();
    notifier
        .notify(
            &Recipients::Role("super_admin".into()),
            EventKind::ApprovalRequested,
            &summary(),
        )
        .await
        .unwrap();

    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 1);
    let req = &received[0];
    let sig = req.headers.get("x-alupass-signature").unwrap().to_str().unwrap();
    assert_eq!(sig, expected_signature("whsec_test", &req.body));

    let body: serde_json::Value = serde_json::from_slice(&req.body).unwrap();
    assert_eq!(body["event_type"], "approval_requested");
    assert_eq!(body["request"]["request_id"], 7);
    assert_eq!(body["recipients"]["type"], "role");
}

#[tokio::test]
async fn test_webhook_without_secret_sends_no_signature() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let notifier = WebhookNotifier::new(vec![server.uri()], None).unwrap();
    assert_ok!(
        notifier
            .notify(&Recipients::User(1), EventKind::ApprovalApproved, &summary())
            .await
    );

    let received = server.received_requests().await.unwrap();
    assert!(received[0].headers.get("x-alupass-signature").is_none());
}

#[tokio::test]
async fn test_webhook_retries_then_gives_up() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let notifier = WebhookNotifier::new(vec![server.uri()], None)
        .unwrap()
        .with_backoff(vec![0, 0, 0]);
    let err = notifier
        .notify(&Recipients::User(1), EventKind::ApprovalRejected, &summary())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("webhook delivery failed"));
}

#[tokio::test]
async fn test_webhook_recovers_on_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let notifier = WebhookNotifier::new(vec![server.uri()], None)
        .unwrap()
        .with_backoff(vec![0, 0]);
    notifier
        .notify(&Recipients::User(1), EventKind::ApprovalApproved, &summary())
        .await
        .unwrap();
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_slack_posts_rendered_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/slack"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let slack = SlackNotifier::new(Some(format!("{}/slack", server.uri())));
    slack
        .notify(
            &Recipients::Role("super_admin".into()),
            EventKind::ApprovalRequested,
            &summary(),
        )
        .await
        .unwrap();

    let received = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&received[0].body).unwrap();
    let text = body["text"].as_str().unwrap();
    assert!(text.contains("Approval required"));
    assert!(text.contains("#7"));
}

#[tokio::test]
async fn test_slack_error_status_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_string("invalid_payload"))
        .mount(&server)
        .await;

    let slack = SlackNotifier::new(Some(server.uri()));
    assert_err!(
        slack
            .notify(&Recipients::User(2), EventKind::ApprovalRejected, &summary())
            .await
    );
}

#[tokio::test]
async fn test_fanout_reaches_every_channel() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/a"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/slack"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let webhook = WebhookNotifier::new(vec![format!("{}/a", server.uri())], None).unwrap();
    let fanout = FanoutNotifier::new()
        .with_sink(Arc::new(webhook))
        .with_sink(Arc::new(SlackNotifier::new(Some(format!(
            "{}/slack",
            server.uri()
        )))));
    assert_eq!(fanout.len(), 2);

    fanout
        .notify(
            &Recipients::Role("super_admin".into()),
            EventKind::ApprovalRequested,
            &summary(),
        )
        .await
        .unwrap();

    // delivery runs on a background task
    let mut seen = 0;
    for _ in 0..50 {
        seen = server.received_requests().await.unwrap().len();
        if seen == 2 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert_eq!(seen, 2);
}
