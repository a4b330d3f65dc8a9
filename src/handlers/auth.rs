// src/handlers/auth.rs

use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use serde_json::{Value, json};
use validator::Validate;

use super::strict_body;
use crate::{
    error::AppError,
    models::user::{EmailRequest, LoginRequest, SignupRequest, UpdateProfileRequest, VerifyOtpRequest},
    services::accounts::AccountService,
    utils::jwt::AuthUser,
};

/// Starts a registration and mails the OTP.
pub async fn signup(
    State(accounts): State<AccountService>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let payload: SignupRequest = strict_body(body)?;
    let email = payload.email.trim().to_lowercase();
    accounts.signup(payload).await?;

    Ok(Json(json!({
        "success": true,
        "message": "OTP sent to your email. Please verify to complete registration.",
        "email": email,
    })))
}

/// Completes a registration. Returns 201 with a session token.
pub async fn verify_otp(
    State(accounts): State<AccountService>,
    Json(payload): Json<VerifyOtpRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    let session = accounts.verify_otp(&payload.email, &payload.otp).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Email verified successfully. Welcome!",
            "token": session.token,
            "type": "Bearer",
            "user": session.user,
        })),
    ))
}

pub async fn resend_otp(
    State(accounts): State<AccountService>,
    Json(payload): Json<EmailRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    accounts.resend_otp(&payload.email).await?;

    Ok(Json(json!({
        "success": true,
        "message": "New OTP sent",
    })))
}

pub async fn login(
    State(accounts): State<AccountService>,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    let session = accounts.login(payload).await?;

    Ok(Json(json!({
        "success": true,
        "token": session.token,
        "type": "Bearer",
        "user": session.user,
    })))
}

pub async fn admin_login(
    State(accounts): State<AccountService>,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    let session = accounts.admin_login(payload).await?;

    Ok(Json(json!({
        "success": true,
        "token": session.token,
        "type": "Bearer",
        "user": session.user,
    })))
}

pub async fn get_profile(
    State(accounts): State<AccountService>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, AppError> {
    let profile = accounts.profile(user.id).await?;
    Ok(Json(json!({ "success": true, "user": profile })))
}

/// Only name, country, contact and profile image may change here.
pub async fn update_profile(
    State(accounts): State<AccountService>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let payload: UpdateProfileRequest = strict_body(body)?;
    let profile = accounts.update_profile(user.id, payload).await?;

    Ok(Json(json!({
        "success": true,
        "message": "Profile updated",
        "user": profile,
    })))
}
