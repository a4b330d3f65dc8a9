// src/models/user.rs

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, types::Json};
use validator::Validate;

use crate::utils::validate::validate_contact;

/// Maximum number of retired password hashes kept per user.
pub const PASSWORD_HISTORY_LIMIT: usize = 5;

/// Represents the 'users' table in the database.
///
/// Never serialized directly; handlers map it to [`UserProfile`] or
/// [`AdminUserSummary`].
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: i64,
    pub name: String,

    /// Stored lowercase; unique.
    pub email: String,
    pub email_verified: bool,

    /// Argon2 password hash.
    pub password_hash: String,

    pub country: String,
    pub contact: String,
    pub profile_image: String,
    pub is_admin: bool,
    pub is_active: bool,

    /// SHA-256 hex of the outstanding reset token, if any.
    pub reset_token_hash: Option<String>,
    pub reset_token_expires: Option<DateTime<Utc>>,
    pub reset_requests: i32,
    pub last_reset_request: Option<DateTime<Utc>>,

    /// Retired hashes, oldest first, at most [`PASSWORD_HISTORY_LIMIT`].
    pub password_history: Json<Vec<PasswordHistoryEntry>>,
    pub password_changed_at: Option<DateTime<Utc>>,

    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// A reset token is active while its expiry lies in the future.
    pub fn active_reset_expiry(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match (&self.reset_token_hash, self.reset_token_expires) {
            (Some(_), Some(expires)) if expires > now => Some(expires),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordHistoryEntry {
    pub password_hash: String,
    pub changed_at: DateTime<Utc>,
}

/// Appends `retired` and evicts from the front until the limit holds.
pub fn push_password_history(
    mut history: Vec<PasswordHistoryEntry>,
    retired: PasswordHistoryEntry,
) -> Vec<PasswordHistoryEntry> {
    history.push(retired);
    if history.len() > PASSWORD_HISTORY_LIMIT {
        let excess = history.len() - PASSWORD_HISTORY_LIMIT;
        history.drain(..excess);
    }
    history
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub product_id: i64,
    pub quantity: i32,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct WishlistItem {
    pub product_id: i64,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingStatus {
    Active,
    Inactive,
    Sold,
    Pending,
}

impl ListingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Sold => "sold",
            Self::Pending => "pending",
        }
    }
}

impl std::str::FromStr for ListingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            "sold" => Ok(Self::Sold),
            "pending" => Ok(Self::Pending),
            other => Err(format!("unknown listing status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
    pub product_id: i64,
    pub status: ListingStatus,
    pub created_at: DateTime<Utc>,
}

/// Fields for a freshly verified account. The store hashes `password`.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password: SecretString,
    pub country: String,
    pub contact: String,
    pub is_admin: bool,
    pub is_active: bool,
    pub email_verified: bool,
    pub last_login: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub enum ResetTokenChange {
    Set {
        token_hash: String,
        expires_at: DateTime<Utc>,
        requested_at: DateTime<Utc>,
        request_count: i32,
    },
    Clear,
}

/// Partial update. `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct UserChanges {
    pub name: Option<String>,
    pub email: Option<String>,
    pub country: Option<String>,
    pub contact: Option<String>,
    pub profile_image: Option<String>,
    pub is_admin: Option<bool>,
    pub is_active: Option<bool>,
    /// Plaintext; hashed by the store on write.
    pub password: Option<SecretString>,
    pub password_history: Option<Vec<PasswordHistoryEntry>>,
    pub password_changed_at: Option<DateTime<Utc>>,
    pub reset_token: Option<ResetTokenChange>,
    pub reset_requests: Option<i32>,
    pub last_login: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleFilter {
    Admin,
    User,
}

#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    /// Case-insensitive match over name, email and contact.
    pub search: Option<String>,
    pub role: Option<RoleFilter>,
    pub active: Option<bool>,
    pub created_since: Option<DateTime<Utc>>,
    pub logged_in_since: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Request DTOs
// ---------------------------------------------------------------------------

/// DTO for starting a registration.
#[derive(Debug, Deserialize, Validate)]
pub struct SignupRequest {
    #[validate(length(min = 2, max = 50, message = "Name must be 2-50 characters"))]
    pub name: String,
    #[validate(email(message = "Please enter a valid email"))]
    pub email: String,
    #[validate(length(min = 6, message = "Password must be at least 6 characters"))]
    pub password: String,
    #[validate(length(min = 1, max = 100, message = "Country is required"))]
    pub country: String,
    #[validate(custom(function = validate_contact))]
    pub contact: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct VerifyOtpRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(equal = 6, message = "OTP must be 6 digits"))]
    pub otp: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct EmailRequest {
    #[validate(email(message = "Please provide a valid email address"))]
    pub email: String,
}

/// DTO for user login.
#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, max = 254))]
    pub email: String,
    #[validate(length(min = 1, max = 128))]
    pub password: String,
}

/// Self-service profile edit. Unknown fields are rejected so that attempts
/// to change email, password or role fail loudly.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UpdateProfileRequest {
    #[validate(length(min = 2, max = 50))]
    pub name: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub country: Option<String>,
    #[validate(custom(function = validate_contact))]
    pub contact: Option<String>,
    #[validate(length(max = 500))]
    pub profile_image: Option<String>,
}

/// DTO for Admin creating a user (can specify role).
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AdminCreateUserRequest {
    #[validate(length(min = 2, max = 50))]
    pub name: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 6, max = 128))]
    pub password: Option<String>,
    #[validate(custom(function = validate_contact))]
    pub contact: String,
    #[validate(length(min = 1, max = 100))]
    pub country: String,
    #[serde(default)]
    pub is_admin: bool,
    pub is_active: Option<bool>,
}

/// DTO for updating a user. Fields are optional.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AdminUpdateUserRequest {
    #[validate(length(min = 2, max = 50))]
    pub name: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
    #[validate(custom(function = validate_contact))]
    pub contact: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub country: Option<String>,
    pub is_admin: Option<bool>,
    pub is_active: Option<bool>,
    #[validate(length(min = 6, max = 128))]
    pub password: Option<String>,
}

fn one() -> i32 {
    1
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AddToCartRequest {
    pub product_id: i64,
    #[serde(default = "one")]
    #[validate(range(min = 1, max = 1000, message = "Quantity must be at least 1"))]
    pub quantity: i32,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CartQuantityRequest {
    #[validate(range(min = 1, max = 1000, message = "Quantity must be at least 1"))]
    pub quantity: i32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WishlistRequest {
    pub product_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct UserListParams {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub search: Option<String>,
    pub role: Option<RoleFilter>,
    pub active: Option<bool>,
}

// ---------------------------------------------------------------------------
// Response shapes
// ---------------------------------------------------------------------------

/// What a signed-in user sees about themselves.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub country: String,
    pub contact: String,
    pub profile_image: String,
    pub email_verified: bool,
    pub is_admin: bool,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
            country: user.country.clone(),
            contact: user.contact.clone(),
            profile_image: user.profile_image.clone(),
            email_verified: user.email_verified,
            is_admin: user.is_admin,
            last_login: user.last_login,
            created_at: user.created_at,
        }
    }
}

/// Row in the admin user table.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminUserSummary {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub country: String,
    pub contact: String,
    pub profile_image: String,
    pub is_admin: bool,
    pub is_active: bool,
    pub email_verified: bool,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&User> for AdminUserSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
            country: user.country.clone(),
            contact: user.contact.clone(),
            profile_image: user.profile_image.clone(),
            is_admin: user.is_admin,
            is_active: user.is_active,
            email_verified: user.email_verified,
            last_login: user.last_login,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(n: i64) -> PasswordHistoryEntry {
        PasswordHistoryEntry {
            password_hash: format!("hash-{}", n),
            changed_at: DateTime::from_timestamp(n, 0).unwrap(),
        }
    }

    #[test]
    fn history_evicts_oldest_first() {
        let mut history = Vec::new();
        for n in 0..7 {
            history = push_password_history(history, entry(n));
        }
        let kept: Vec<_> = history.iter().map(|e| e.password_hash.as_str()).collect();
        assert_eq!(kept, ["hash-2", "hash-3", "hash-4", "hash-5", "hash-6"]);
    }

    #[test]
    fn listing_status_round_trips_through_str() {
        for status in [
            ListingStatus::Active,
            ListingStatus::Inactive,
            ListingStatus::Sold,
            ListingStatus::Pending,
        ] {
            assert_eq!(status.as_str().parse::<ListingStatus>().unwrap(), status);
        }
        assert!("archived".parse::<ListingStatus>().is_err());
    }
}
