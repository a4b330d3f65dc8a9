// src/handlers/password.rs

use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, header},
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;
use validator::Validate;

use crate::{
    error::AppError,
    models::user::EmailRequest,
    services::{notifier::DeviceInfo, password::PasswordResetService},
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub new_password: String,
}

fn device_info(headers: &HeaderMap) -> DeviceInfo {
    let text = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    DeviceInfo {
        user_agent: text(header::USER_AGENT.as_str()),
        ip: text("x-forwarded-for")
            .and_then(|v| v.split(',').next().map(|ip| ip.trim().to_string()))
            .or_else(|| text("x-real-ip")),
    }
}

pub async fn forgot_password(
    State(passwords): State<PasswordResetService>,
    Json(payload): Json<EmailRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    let requested = passwords.request_reset(&payload.email).await?;

    let mut body = json!({
        "success": true,
        "message": "Password reset link sent to your email",
        "expiresAt": requested.expires_at,
    });
    if let Some(url) = requested.reset_url {
        body["resetUrl"] = json!(url);
    }
    Ok(Json(body))
}

pub async fn reset_password(
    State(passwords): State<PasswordResetService>,
    headers: HeaderMap,
    Json(payload): Json<ResetPasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    passwords
        .reset_password(&payload.token, &payload.new_password, device_info(&headers))
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Password has been reset successfully. Please log in with your new password.",
    })))
}

pub async fn verify_reset_token(
    State(passwords): State<PasswordResetService>,
    Path(token): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let info = passwords.verify_reset_token(&token).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Token is valid",
        "email": info.email,
        "name": info.name,
        "expiresIn": info.expires_in,
    })))
}

pub async fn reset_status(
    State(passwords): State<PasswordResetService>,
    Path(email): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let status = passwords.check_reset_status(&email).await?;
    Ok(Json(json!({
        "success": true,
        "hasActiveReset": status.has_active_reset,
        "expiresAt": status.expires_at,
    })))
}

pub async fn cancel_reset(
    State(passwords): State<PasswordResetService>,
    Json(payload): Json<EmailRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    passwords.cancel_reset(&payload.email).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Password reset cancelled",
    })))
}
