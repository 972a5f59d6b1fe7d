//! Alupass approval service: role-gated approval workflow for the
//! aluminium passport platform.
//!
//! The binary in `main.rs` wires these modules to Postgres; integration tests
//! in `tests/` wire them to the in-memory store.

pub mod api;
pub mod cli;
pub mod config;
pub mod credential;
pub mod errors;
pub mod jobs;
pub mod middleware;
pub mod models;
pub mod notification;
pub mod store;
pub mod workflow;

use std::sync::Arc;

use middleware::auth::JwtKeys;
use middleware::rate_limit::RateLimiter;
use store::postgres::PgStore;
use workflow::ApprovalEngine;

/// Shared application state passed to handlers and middleware.
pub struct AppState {
    pub engine: ApprovalEngine,
    /// Backs the audit and inbox endpoints. `None` when running on the
    /// in-memory store.
    pub db: Option<PgStore>,
    pub jwt: JwtKeys,
    pub rate_limiter: RateLimiter,
}

impl AppState {
    pub fn new(engine: ApprovalEngine, jwt: JwtKeys, rate_limiter: RateLimiter) -> Self {
        Self {
            engine,
            db: None,
            jwt,
            rate_limiter,
        }
    }

    pub fn with_db(mut self, db: PgStore) -> Self {
        self.db = Some(db);
        self
    }

    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}
