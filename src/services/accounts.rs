// src/services/accounts.rs

use std::sync::Arc;

use secrecy::SecretString;
use serde::Serialize;

use super::{
    clock::Clock,
    notifier::Notifier,
    registration::{CacheLookup, RegistrationCache, RegistrationPayload},
};
use crate::{
    config::Config,
    error::{AppError, AuthFailure},
    models::user::{
        LoginRequest, NewUser, SignupRequest, UpdateProfileRequest, User, UserChanges, UserProfile,
    },
    store::UserStore,
    utils::{jwt::sign_jwt, validate::normalize_contact},
};

/// A signed-in user: bearer token plus their own profile.
#[derive(Debug, Serialize)]
pub struct Session {
    pub token: String,
    pub user: UserProfile,
}

/// Signup with email verification, login and self-service profile edits.
#[derive(Clone)]
pub struct AccountService {
    users: Arc<dyn UserStore>,
    registrations: Arc<dyn RegistrationCache>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    config: Arc<Config>,
}

impl AccountService {
    pub fn new(
        users: Arc<dyn UserStore>,
        registrations: Arc<dyn RegistrationCache>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            users,
            registrations,
            notifier,
            clock,
            config,
        }
    }

    /// Buffers the registration and mails an OTP. Nothing is persisted until
    /// the code comes back through [`Self::verify_otp`].
    pub async fn signup(&self, req: SignupRequest) -> Result<(), AppError> {
        let email = req.email.trim().to_lowercase();

        if self.users.find_by_email(&email).await?.is_some() {
            return Err(AppError::Conflict(
                "User already exists with this email".to_string(),
            ));
        }

        let payload = RegistrationPayload {
            name: req.name.trim().to_string(),
            password: SecretString::from(req.password),
            country: req.country.trim().to_string(),
            contact: normalize_contact(&req.contact),
        };
        let otp = self.registrations.put(&email, payload);

        if let Err(e) = self.notifier.send_otp(&email, &otp).await {
            self.registrations.consume(&email);
            return Err(AppError::EmailDelivery(e.to_string()));
        }

        tracing::info!(%email, "Registration pending verification");
        Ok(())
    }

    /// Turns a pending registration into a verified account.
    pub async fn verify_otp(&self, email: &str, otp: &str) -> Result<Session, AppError> {
        let email = email.trim().to_lowercase();

        let pending = match self.registrations.lookup(&email) {
            CacheLookup::Active(pending) => pending,
            CacheLookup::Expired => return Err(AppError::OtpExpired),
            CacheLookup::Absent => {
                return Err(AppError::NotFound(
                    "No pending registration found".to_string(),
                ));
            }
        };

        if pending.otp != otp.trim() {
            return Err(AppError::InvalidOtp);
        }

        let payload = pending.payload;
        let user = self
            .users
            .create(NewUser {
                name: payload.name,
                email: email.clone(),
                password: payload.password,
                country: payload.country,
                contact: payload.contact,
                is_admin: false,
                is_active: true,
                email_verified: true,
                last_login: Some(self.clock.now()),
            })
            .await?;
        self.registrations.consume(&email);

        let token = self.issue_session(&user)?;
        tracing::info!(user_id = user.id, "Account verified");

        if let Err(e) = self.notifier.send_welcome(&user.email, &user.name).await {
            tracing::warn!(user_id = user.id, "Welcome email failed: {}", e);
        }

        Ok(Session {
            token,
            user: UserProfile::from(&user),
        })
    }

    pub async fn resend_otp(&self, email: &str) -> Result<(), AppError> {
        let email = email.trim().to_lowercase();
        let otp = self
            .registrations
            .resend(&email)
            .ok_or_else(|| AppError::NotFound("No pending registration found".to_string()))?;

        self.notifier
            .send_otp(&email, &otp)
            .await
            .map_err(|e| AppError::EmailDelivery(e.to_string()))
    }

    pub async fn login(&self, req: LoginRequest) -> Result<Session, AppError> {
        let user = self.authenticate(&req).await?;
        self.open_session(user).await
    }

    /// Same as [`Self::login`], restricted to administrators.
    pub async fn admin_login(&self, req: LoginRequest) -> Result<Session, AppError> {
        let user = self.authenticate(&req).await?;
        if !user.is_admin {
            return Err(AppError::Forbidden("Admin access required".to_string()));
        }
        self.open_session(user).await
    }

    pub async fn profile(&self, user_id: i64) -> Result<UserProfile, AppError> {
        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;
        Ok(UserProfile::from(&user))
    }

    pub async fn update_profile(
        &self,
        user_id: i64,
        req: UpdateProfileRequest,
    ) -> Result<UserProfile, AppError> {
        let changes = UserChanges {
            name: req.name.map(|n| n.trim().to_string()),
            country: req.country.map(|c| c.trim().to_string()),
            contact: req.contact.as_deref().map(normalize_contact),
            profile_image: req.profile_image,
            ..Default::default()
        };

        let user = self
            .users
            .update(user_id, changes)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;
        Ok(UserProfile::from(&user))
    }

    async fn authenticate(&self, req: &LoginRequest) -> Result<User, AppError> {
        let email = req.email.trim().to_lowercase();
        let user = self
            .users
            .find_by_email(&email)
            .await?
            .ok_or(AppError::Unauthorized(AuthFailure::InvalidCredentials))?;

        if !self.users.compare_password(&user, &req.password).await? {
            return Err(AppError::Unauthorized(AuthFailure::InvalidCredentials));
        }
        if !user.is_active {
            return Err(AppError::Forbidden("Account is deactivated".to_string()));
        }
        Ok(user)
    }

    async fn open_session(&self, user: User) -> Result<Session, AppError> {
        let changes = UserChanges {
            last_login: Some(self.clock.now()),
            ..Default::default()
        };
        let user = self.users.update(user.id, changes).await?.unwrap_or(user);
        let token = self.issue_session(&user)?;
        tracing::info!(user_id = user.id, "User logged in");
        Ok(Session {
            token,
            user: UserProfile::from(&user),
        })
    }

    fn issue_session(&self, user: &User) -> Result<String, AppError> {
        sign_jwt(
            user.id,
            user.is_admin,
            &self.config.jwt_secret,
            self.config.jwt_expiration,
        )
    }
}
