//! Shared fixtures: an in-memory engine with a hand-driven clock and sinks
//! that remember what they were given.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use alupass::credential;
use alupass::middleware::audit::AuditSink;
use alupass::middleware::rbac::Actor;
use alupass::models::audit::AuditEntry;
use alupass::models::notification::{EventKind, Recipients, RequestSummary};
use alupass::models::user::{NewUser, User};
use alupass::notification::NotificationSink;
use alupass::store::{ApprovalStore, MemoryStore};
use alupass::workflow::{ApprovalEngine, Clock, OnboardingInput};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};

pub struct ManualClock(Mutex<DateTime<Utc>>);

impl ManualClock {
    pub fn new() -> Self {
        Self(Mutex::new(Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()))
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.0.lock().unwrap();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub events: Mutex<Vec<(Recipients, EventKind, RequestSummary)>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<(Recipients, EventKind, RequestSummary)> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingNotifier {
    async fn notify(
        &self,
        recipients: &Recipients,
        kind: EventKind,
        summary: &RequestSummary,
    ) -> anyhow::Result<()> {
        self.events
            .lock()
            .unwrap()
            .push((recipients.clone(), kind, summary.clone()));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingAudit {
    pub entries: Mutex<Vec<AuditEntry>>,
}

impl RecordingAudit {
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().unwrap().clone()
    }
}

#[async_trait]
impl AuditSink for RecordingAudit {
    async fn record(&self, entry: AuditEntry) -> anyhow::Result<()> {
        self.entries.lock().unwrap().push(entry);
        Ok(())
    }
}

pub struct Harness {
    pub engine: Arc<ApprovalEngine>,
    pub store: MemoryStore,
    pub clock: Arc<ManualClock>,
    pub notifier: Arc<RecordingNotifier>,
    pub audit: Arc<RecordingAudit>,
    pub admin: Actor,
    pub super_admin: Actor,
    pub auditor: Actor,
    pub viewer: Actor,
}

impl Harness {
    pub async fn new() -> Self {
        let store = MemoryStore::new();
        let clock = Arc::new(ManualClock::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let audit = Arc::new(RecordingAudit::default());
        let engine = ApprovalEngine::new(Arc::new(store.clone()))
            .with_clock(clock.clone())
            .with_notifier(notifier.clone())
            .with_audit(audit.clone());

        let admin = seed_user(&store, "ops-admin", "admin").await;
        let super_admin = seed_user(&store, "root", "super_admin").await;
        let auditor = seed_user(&store, "inspector", "auditor").await;
        let viewer = seed_user(&store, "guest", "viewer").await;

        Self {
            engine: Arc::new(engine),
            store,
            clock,
            notifier,
            audit,
            admin: Actor::new(admin.id, admin.role),
            super_admin: Actor::new(super_admin.id, super_admin.role),
            auditor: Actor::new(auditor.id, auditor.role),
            viewer: Actor::new(viewer.id, viewer.role),
        }
    }
}

/// Active user whose password is `<username>-pw`.
pub async fn seed_user(store: &MemoryStore, username: &str, role: &str) -> User {
    store
        .insert_user(&NewUser {
            username: username.to_string(),
            wallet_address: None,
            role: role.to_string(),
            password_hash: credential::hash_credential(&format!("{}-pw", username)),
            company_name: None,
        })
        .await
        .unwrap()
}

pub fn wallet(fill: char) -> String {
    format!("0x{}", fill.to_string().repeat(40))
}

pub fn onboarding(username: &str, wallet: &str, role: &str) -> OnboardingInput {
    OnboardingInput {
        username: username.to_string(),
        wallet_address: wallet.to_string(),
        role: role.to_string(),
        company_name: "Nordic Bauxite AB".to_string(),
        company_metadata: Some(serde_json::json!({"country": "SE"})),
        title: None,
        description: None,
        expires_in_days: None,
    }
}
