// tests/auth_tests.rs

mod common;

use common::{json_body, spawn_app};
use jsonwebtoken::{EncodingKey, Header, encode};
use reqwest::Method;
use serde_json::json;
use shopeasy::utils::jwt::Claims;

fn token_with_exp(user_id: i64, exp: i64) -> String {
    let claims = Claims {
        sub: user_id.to_string(),
        is_admin: false,
        exp: exp as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(b"test_secret_for_integration_tests"),
    )
    .unwrap()
}

#[tokio::test]
async fn unknown_route_is_not_found() {
    let app = spawn_app().await;

    let response = app.get("/api/this-does-not-exist").await;

    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn profile_requires_a_token() {
    // Arrange
    let app = spawn_app().await;

    // Act
    let response = app.get("/api/auth/profile").await;

    // Assert
    assert_eq!(response.status().as_u16(), 401);
    assert_eq!(json_body(response).await["reason"], "token_missing");
}

#[tokio::test]
async fn garbage_token_is_invalid() {
    let app = spawn_app().await;

    let response = app.get_auth("/api/auth/profile", "not.a.jwt").await;

    assert_eq!(response.status().as_u16(), 401);
    assert_eq!(json_body(response).await["reason"], "token_invalid");
}

#[tokio::test]
async fn token_signed_with_another_secret_is_invalid() {
    // Arrange
    let app = spawn_app().await;
    app.register("mallory@example.com", "secret1").await;
    let user = app.user_by_email("mallory@example.com").await;
    let claims = Claims {
        sub: user.id.to_string(),
        is_admin: true,
        exp: (chrono::Utc::now().timestamp() + 3600) as usize,
    };
    let forged = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(b"some-other-secret"),
    )
    .unwrap();

    // Act
    let response = app.get_auth("/api/admin/stats", &forged).await;

    // Assert
    assert_eq!(response.status().as_u16(), 401);
    assert_eq!(json_body(response).await["reason"], "token_invalid");
}

#[tokio::test]
async fn expired_token_is_reported_as_expired() {
    // Arrange
    let app = spawn_app().await;
    app.register("old@example.com", "secret1").await;
    let user = app.user_by_email("old@example.com").await;
    let token = token_with_exp(user.id, chrono::Utc::now().timestamp() - 3600);

    // Act
    let response = app.get_auth("/api/auth/profile", &token).await;

    // Assert
    assert_eq!(response.status().as_u16(), 401);
    assert_eq!(json_body(response).await["reason"], "token_expired");
}

#[tokio::test]
async fn token_for_deleted_user_is_invalid() {
    // Arrange
    let app = spawn_app().await;
    let token = token_with_exp(9_999, chrono::Utc::now().timestamp() + 3600);

    // Act
    let response = app.get_auth("/api/auth/profile", &token).await;

    // Assert
    assert_eq!(response.status().as_u16(), 401);
    assert_eq!(json_body(response).await["reason"], "token_invalid");
}

#[tokio::test]
async fn profile_reads_and_updates() {
    // Arrange
    let app = spawn_app().await;
    let token = app.register("pat@example.com", "secret1").await;

    // Act
    let response = app
        .send_auth(
            Method::PATCH,
            "/api/auth/profile",
            &token,
            Some(json!({ "name": "Pat Doe", "country": "CA" })),
        )
        .await;

    // Assert
    assert_eq!(response.status().as_u16(), 200);
    let profile = json_body(app.get_auth("/api/auth/profile", &token).await).await;
    assert_eq!(profile["user"]["name"], "Pat Doe");
    assert_eq!(profile["user"]["country"], "CA");
    assert_eq!(profile["user"]["email"], "pat@example.com");
}

#[tokio::test]
async fn profile_update_rejects_protected_fields() {
    // Arrange
    let app = spawn_app().await;
    let token = app.register("pat@example.com", "secret1").await;

    // Act
    let response = app
        .send_auth(
            Method::PATCH,
            "/api/auth/profile",
            &token,
            Some(json!({ "name": "Pat", "isAdmin": true })),
        )
        .await;

    // Assert
    assert_eq!(response.status().as_u16(), 400);
    assert_eq!(json_body(response).await["reason"], "validation_error");
    let user = app.user_by_email("pat@example.com").await;
    assert!(!user.is_admin);
    assert_eq!(user.name, "Test Shopper");
}

#[tokio::test]
async fn regular_user_cannot_reach_admin_routes() {
    // Arrange
    let app = spawn_app().await;
    let token = app.register("user@example.com", "secret1").await;

    // Act
    let response = app.get_auth("/api/admin/users", &token).await;

    // Assert
    assert_eq!(response.status().as_u16(), 403);
}

#[tokio::test]
async fn admin_login_refuses_regular_users() {
    // Arrange
    let app = spawn_app().await;
    app.register("user@example.com", "secret1").await;

    // Act
    let response = app
        .post(
            "/api/admin/login",
            json!({ "email": "user@example.com", "password": "secret1" }),
        )
        .await;

    // Assert
    assert_eq!(response.status().as_u16(), 403);
}

#[tokio::test]
async fn deactivated_account_is_locked_out() {
    // Arrange
    let app = spawn_app().await;
    let (_, admin) = app.admin_token().await;
    let token = app.register("user@example.com", "secret1").await;
    let user = app.user_by_email("user@example.com").await;
    let response = app
        .send_auth(
            Method::PUT,
            &format!("/api/admin/users/{}", user.id),
            &admin,
            Some(json!({ "isActive": false })),
        )
        .await;
    assert_eq!(response.status().as_u16(), 200);

    // Act
    let with_token = app.get_auth("/api/auth/profile", &token).await;
    let login = app
        .post(
            "/api/auth/login",
            json!({ "email": "user@example.com", "password": "secret1" }),
        )
        .await;

    // Assert
    assert_eq!(with_token.status().as_u16(), 403);
    assert_eq!(login.status().as_u16(), 403);
}
