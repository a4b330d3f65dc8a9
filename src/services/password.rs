// src/services/password.rs

//! Forgotten-password flow. Only the SHA-256 of a reset token is stored; the
//! raw token travels to the user by email and back in the reset request.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::Serialize;

use super::{
    clock::Clock,
    notifier::{DeviceInfo, Notifier},
    tokens::issue_reset_token,
};
use crate::{
    config::Config,
    error::AppError,
    models::user::{PasswordHistoryEntry, ResetTokenChange, User, UserChanges, push_password_history},
    store::UserStore,
    utils::{hash::digest_token, validate::is_reset_token},
};

const MIN_PASSWORD_LEN: usize = 6;
const MAX_PASSWORD_LEN: usize = 128;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetRequested {
    pub expires_at: DateTime<Utc>,
    /// Development only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_url: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetTokenInfo {
    pub email: String,
    pub name: String,
    /// Whole seconds left, rounded down.
    pub expires_in: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetStatus {
    pub has_active_reset: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct PasswordResetService {
    users: Arc<dyn UserStore>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    config: Arc<Config>,
}

impl PasswordResetService {
    pub fn new(
        users: Arc<dyn UserStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            users,
            notifier,
            clock,
            config,
        }
    }

    /// Issues a reset token and mails the link. At most one token is active
    /// per user; asking again while it lives is rate limited.
    pub async fn request_reset(&self, email: &str) -> Result<ResetRequested, AppError> {
        let email = email.trim().to_lowercase();
        let user = self
            .users
            .find_by_email(&email)
            .await?
            .ok_or_else(|| AppError::NotFound("No account found with this email address".to_string()))?;

        if !user.email_verified {
            return Err(AppError::EmailNotVerified);
        }

        let now = self.clock.now();
        if let Some(expires) = user.active_reset_expiry(now) {
            let remaining_ms = (expires - now).num_milliseconds().max(1);
            return Err(AppError::RateLimited {
                retry_after: (remaining_ms as u64).div_ceil(1000),
            });
        }

        let token = issue_reset_token();
        let expires_at = now + self.reset_ttl();
        self.users
            .update(
                user.id,
                UserChanges {
                    reset_token: Some(ResetTokenChange::Set {
                        token_hash: token.hash.clone(),
                        expires_at,
                        requested_at: now,
                        request_count: user.reset_requests.saturating_add(1),
                    }),
                    ..Default::default()
                },
            )
            .await?;

        let reset_url = self.config.reset_link(&token.raw);
        if let Err(e) = self.notifier.send_password_reset(&user.email, &reset_url).await {
            self.rollback_request(&user).await;
            return Err(AppError::EmailDelivery(e.to_string()));
        }

        tracing::info!(user_id = user.id, %expires_at, "Password reset requested");
        Ok(ResetRequested {
            expires_at,
            reset_url: self.config.is_development().then_some(reset_url),
        })
    }

    /// Consumes a reset token and installs `new_password`.
    pub async fn reset_password(
        &self,
        raw_token: &str,
        new_password: &str,
        device: DeviceInfo,
    ) -> Result<(), AppError> {
        let raw_token = raw_token.trim();
        if raw_token.is_empty() || new_password.is_empty() {
            return Err(AppError::Validation(
                "Token and new password are required".to_string(),
            ));
        }
        let length = new_password.chars().count();
        if !(MIN_PASSWORD_LEN..=MAX_PASSWORD_LEN).contains(&length) {
            return Err(AppError::WeakPassword(format!(
                "Password must be between {} and {} characters",
                MIN_PASSWORD_LEN, MAX_PASSWORD_LEN
            )));
        }

        let now = self.clock.now();
        let user = self.find_by_raw_token(raw_token, now).await?;

        if self.users.compare_password(&user, new_password).await? {
            return Err(AppError::SamePassword);
        }

        let history = push_password_history(
            user.password_history.0.clone(),
            PasswordHistoryEntry {
                password_hash: user.password_hash.clone(),
                changed_at: now,
            },
        );

        // Conditional on the token still being live, so two requests racing
        // with one token cannot both change the password.
        self.users
            .consume_reset_token(
                user.id,
                &digest_token(raw_token),
                now,
                UserChanges {
                    password: Some(SecretString::from(new_password.to_string())),
                    password_history: Some(history),
                    password_changed_at: Some(now),
                    reset_token: Some(ResetTokenChange::Clear),
                    reset_requests: Some(0),
                    ..Default::default()
                },
            )
            .await?
            .ok_or(AppError::InvalidOrExpiredToken)?;

        tracing::info!(user_id = user.id, "Password reset completed");

        if let Err(e) = self.notifier.send_security_alert(&user.email, &device).await {
            tracing::warn!(user_id = user.id, "Security alert email failed: {}", e);
        }
        Ok(())
    }

    /// Read-only check used to decide whether to show the reset form.
    pub async fn verify_reset_token(&self, raw_token: &str) -> Result<ResetTokenInfo, AppError> {
        let now = self.clock.now();
        let user = self.find_by_raw_token(raw_token.trim(), now).await?;

        if !user.email_verified {
            return Err(AppError::EmailNotVerified);
        }

        let expires_in = user
            .active_reset_expiry(now)
            .map(|expires| (expires - now).num_seconds())
            .unwrap_or(0);

        Ok(ResetTokenInfo {
            email: user.email,
            name: user.name,
            expires_in,
        })
    }

    pub async fn check_reset_status(&self, email: &str) -> Result<ResetStatus, AppError> {
        let email = email.trim().to_lowercase();
        let now = self.clock.now();
        let expires_at = self
            .users
            .find_by_email(&email)
            .await?
            .and_then(|user| user.active_reset_expiry(now));

        Ok(ResetStatus {
            has_active_reset: expires_at.is_some(),
            expires_at,
        })
    }

    /// Clears any outstanding token. Succeeds when there is nothing to cancel.
    pub async fn cancel_reset(&self, email: &str) -> Result<(), AppError> {
        let email = email.trim().to_lowercase();
        let Some(user) = self.users.find_by_email(&email).await? else {
            return Ok(());
        };
        if user.reset_token_hash.is_none() && user.reset_token_expires.is_none() {
            return Ok(());
        }

        self.users
            .update(
                user.id,
                UserChanges {
                    reset_token: Some(ResetTokenChange::Clear),
                    ..Default::default()
                },
            )
            .await?;
        tracing::info!(user_id = user.id, "Password reset cancelled");
        Ok(())
    }

    async fn find_by_raw_token(&self, raw_token: &str, now: DateTime<Utc>) -> Result<User, AppError> {
        if !is_reset_token(raw_token) {
            return Err(AppError::InvalidOrExpiredToken);
        }
        self.users
            .find_by_reset_token(&digest_token(raw_token), now)
            .await?
            .ok_or(AppError::InvalidOrExpiredToken)
    }

    /// Puts the token fields back the way they were before the request.
    async fn rollback_request(&self, user: &User) {
        let changes = UserChanges {
            reset_token: Some(ResetTokenChange::Clear),
            reset_requests: Some(user.reset_requests),
            ..Default::default()
        };
        if let Err(e) = self.users.update(user.id, changes).await {
            tracing::error!(user_id = user.id, "Failed to roll back reset token: {}", e);
        }
    }

    fn reset_ttl(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.config.reset_ttl).unwrap_or(chrono::Duration::minutes(5))
    }
}
