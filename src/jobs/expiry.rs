//! Background job: persist `expired` on overdue approval requests.
//!
//! Decide judges expiry from `expires_at` itself, so this only keeps stored
//! status in step with what readers observe. It also drops elapsed
//! rate-limit windows.

use std::sync::Arc;
use std::time::Duration;

use tokio::time;

use crate::AppState;

/// Spawn the sweep task. Call this once at startup. An interval of 0
/// disables the job.
pub fn spawn(state: Arc<AppState>, interval_secs: u64) -> Option<tokio::task::JoinHandle<()>> {
    if interval_secs == 0 {
        tracing::info!("expiry sweep disabled");
        return None;
    }
    Some(tokio::spawn(async move {
        let mut interval = time::interval(Duration::from_secs(interval_secs));
        loop {
            interval.tick().await;
            sweep(&state).await;
        }
    }))
}

/// One pass of the job.
pub async fn sweep(state: &AppState) -> u64 {
    state.rate_limiter.evict_expired();
    match state.engine.expire_stale().await {
        Ok(n) => n,
        Err(e) => {
            tracing::error!("expiry sweep failed: {}", e);
            0
        }
    }
}
