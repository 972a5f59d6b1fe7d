use super::{observe, ApprovalEngine};
use crate::credential;
use crate::errors::AppError;
use crate::models::audit::{AuditAction, AuditEntry};
use crate::models::user::User;

impl ApprovalEngine {
    /// Check a username/password pair. Activated suppliers log in with the
    /// temporary credential issued at onboarding.
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<User, AppError> {
        observe(self.authenticate_inner(username, password).await)
    }

    async fn authenticate_inner(&self, username: &str, password: &str) -> Result<User, AppError> {
        let invalid = || AppError::Authentication("invalid username or password".into());
        let user = self
            .store
            .get_user_by_username(username.trim())
            .await?
            .ok_or_else(invalid)?;
        if !user.is_active || !credential::verify_credential(password, &user.password_hash) {
            tracing::warn!(user_id = user.id, "login rejected");
            return Err(invalid());
        }

        let mut entry = AuditEntry::user(user.id, &user.role, AuditAction::Login, user.id);
        entry.timestamp = self.clock.now();
        if let Err(e) = self.audit.record(entry).await {
            tracing::warn!(user_id = user.id, "audit record failed: {}", e);
        }
        tracing::info!(user_id = user.id, role = %user.role, "user logged in");
        Ok(user)
    }
}
