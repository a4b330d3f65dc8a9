// src/handlers/mod.rs

pub mod admin;
pub mod auth;
pub mod cart;
pub mod orders;
pub mod password;
pub mod products;

use serde::de::DeserializeOwned;
use serde_json::Value;
use validator::Validate;

use crate::error::AppError;

/// Deserializes and validates a body taken as raw JSON, so that unknown or
/// mistyped fields come back as `validation_error` rather than axum's
/// plain-text rejection.
pub(crate) fn strict_body<T: DeserializeOwned + Validate>(body: Value) -> Result<T, AppError> {
    let payload: T = serde_json::from_value(body)?;
    payload.validate()?;
    Ok(payload)
}
