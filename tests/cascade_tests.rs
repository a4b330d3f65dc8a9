// tests/cascade_tests.rs

mod common;

use common::{TestApp, json_body, shipping_address, spawn_app};
use reqwest::Method;
use serde_json::{Value, json};
use shopeasy::store::{UserStore, memory::FailPoint};

/// Registers a seller and lists one product through the API.
async fn listed_product(app: &TestApp, email: &str) -> (String, i64) {
    let token = app.register(email, "secret1").await;
    let response = app
        .send_auth(
            Method::POST,
            "/api/listings",
            &token,
            Some(json!({
                "title": "Walnut Tray",
                "price": "24.50",
                "category": "home",
                "description": "<p>Oiled walnut.</p><script>alert(1)</script>",
                "image": "https://img.example.com/tray.png",
                "stock": 8,
            })),
        )
        .await;
    assert_eq!(response.status().as_u16(), 201);
    let id = json_body(response).await["product"]["id"].as_i64().unwrap();
    (token, id)
}

async fn stash(app: &TestApp, token: &str, product_id: i64) {
    let response = app
        .send_auth(
            Method::POST,
            "/api/cart",
            token,
            Some(json!({ "productId": product_id, "quantity": 2 })),
        )
        .await;
    assert_eq!(response.status().as_u16(), 200);
    let response = app
        .send_auth(
            Method::POST,
            "/api/wishlist",
            token,
            Some(json!({ "productId": product_id })),
        )
        .await;
    assert_eq!(response.status().as_u16(), 200);
}

async fn cart(app: &TestApp, token: &str) -> Value {
    json_body(app.get_auth("/api/cart", token).await).await["cart"].clone()
}

#[tokio::test]
async fn listing_description_is_sanitized() {
    let app = spawn_app().await;
    let (token, id) = listed_product(&app, "seller@example.com").await;

    let body = json_body(app.get(&format!("/api/products/{}", id)).await).await;

    let description = body["product"]["description"].as_str().unwrap();
    assert!(description.contains("Oiled walnut."));
    assert!(!description.contains("<script>"));

    let listings = json_body(app.get_auth("/api/listings", &token).await).await;
    assert_eq!(listings["listings"][0]["productId"], id);
    assert_eq!(listings["listings"][0]["status"], "active");
}

#[tokio::test]
async fn delete_without_orders_removes_every_reference() {
    // Arrange
    let app = spawn_app().await;
    let (seller, id) = listed_product(&app, "seller@example.com").await;
    let shopper = app.register("shopper@example.com", "secret1").await;
    stash(&app, &shopper, id).await;

    // Act
    let response = app
        .send_auth(Method::DELETE, &format!("/api/listings/{}", id), &seller, None)
        .await;

    // Assert
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(json_body(response).await["deleted"], true);
    assert!(app.product(id).await.is_none());

    let seller_id = app.user_by_email("seller@example.com").await.id;
    let shopper_id = app.user_by_email("shopper@example.com").await.id;
    assert!(app.store.listings(seller_id).await.unwrap().is_empty());
    assert!(app.store.cart(shopper_id).await.unwrap().is_empty());
    assert!(app.store.wishlist(shopper_id).await.unwrap().is_empty());
    assert_eq!(app.get(&format!("/api/products/{}", id)).await.status().as_u16(), 404);
}

#[tokio::test]
async fn delete_with_orders_only_deactivates() {
    // Arrange
    let app = spawn_app().await;
    let (seller, id) = listed_product(&app, "seller@example.com").await;
    let shopper = app.register("shopper@example.com", "secret1").await;
    let response = app
        .send_auth(
            Method::POST,
            "/api/orders",
            &shopper,
            Some(json!({
                "items": [{ "productId": id, "quantity": 1 }],
                "shippingAddress": shipping_address(),
            })),
        )
        .await;
    assert_eq!(response.status().as_u16(), 201);

    // Act
    let response = app
        .send_auth(Method::DELETE, &format!("/api/listings/{}", id), &seller, None)
        .await;

    // Assert
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(json_body(response).await["deleted"], false);
    let product = app.product(id).await.expect("product kept for order history");
    assert!(!product.is_active);

    // Hidden from the public catalog, still readable by its owner
    assert_eq!(app.get(&format!("/api/products/{}", id)).await.status().as_u16(), 404);
    let response = app.get_auth(&format!("/api/listings/{}", id), &seller).await;
    assert_eq!(response.status().as_u16(), 200);

    // The order still shows what was bought
    let orders = json_body(app.get_auth("/api/orders", &shopper).await).await;
    assert_eq!(orders["orders"]["total"], 1);
}

#[tokio::test]
async fn interrupted_cascade_reports_saga_and_finishes_on_retry() {
    // Arrange
    let app = spawn_app().await;
    let (_, admin) = app.admin_token().await;
    let (_, id) = listed_product(&app, "seller@example.com").await;
    let shopper = app.register("shopper@example.com", "secret1").await;
    stash(&app, &shopper, id).await;
    app.store.fail_next(FailPoint::PullCarts, 1).await;

    // Act
    let response = app
        .send_auth(Method::DELETE, &format!("/api/admin/products/{}", id), &admin, None)
        .await;

    // Assert
    assert_eq!(response.status().as_u16(), 500);
    let body = json_body(response).await;
    assert_eq!(body["reason"], "partial_cascade_failure");
    assert!(body["sagaId"].is_string());

    // Product is gone but the cart still points at it
    assert!(app.product(id).await.is_none());
    let view = cart(&app, &shopper).await;
    assert_eq!(view["items"][0]["available"], false);
    assert!(view["items"][0]["product"].is_null());
    assert_eq!(view["subtotal"], "0");

    // The coordinator picks the saga up once its backoff has passed
    app.clock.advance(chrono::Duration::seconds(2));
    let report = app.coordinator.run_once().await.unwrap();
    assert_eq!(report.attempted, 1);
    assert_eq!(report.finished, 1);

    let shopper_id = app.user_by_email("shopper@example.com").await.id;
    assert!(app.store.cart(shopper_id).await.unwrap().is_empty());
    assert!(app.store.wishlist(shopper_id).await.unwrap().is_empty());

    // Nothing left to do
    app.clock.advance(chrono::Duration::minutes(10));
    let report = app.coordinator.run_once().await.unwrap();
    assert_eq!(report.attempted, 0);
}

#[tokio::test]
async fn only_owner_or_admin_may_delete_a_listing() {
    // Arrange
    let app = spawn_app().await;
    let (_, id) = listed_product(&app, "seller@example.com").await;
    let stranger = app.register("stranger@example.com", "secret1").await;

    // Act
    let response = app
        .send_auth(Method::DELETE, &format!("/api/listings/{}", id), &stranger, None)
        .await;

    // Assert
    assert_eq!(response.status().as_u16(), 403);
    assert!(app.product(id).await.is_some());
}

#[tokio::test]
async fn deleting_a_missing_product_is_not_found() {
    let app = spawn_app().await;
    let (_, admin) = app.admin_token().await;

    let response = app
        .send_auth(Method::DELETE, "/api/admin/products/424242", &admin, None)
        .await;

    assert_eq!(response.status().as_u16(), 404);
    assert_eq!(json_body(response).await["reason"], "product_not_found");
}

#[tokio::test]
async fn deactivated_product_cannot_be_added_to_cart() {
    // Arrange
    let app = spawn_app().await;
    let (seller, id) = listed_product(&app, "seller@example.com").await;
    let response = app
        .send_auth(
            Method::PUT,
            &format!("/api/listings/{}", id),
            &seller,
            Some(json!({ "isActive": false })),
        )
        .await;
    assert_eq!(response.status().as_u16(), 200);
    let shopper = app.register("shopper@example.com", "secret1").await;

    // Act
    let response = app
        .send_auth(
            Method::POST,
            "/api/cart",
            &shopper,
            Some(json!({ "productId": id })),
        )
        .await;

    // Assert
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn cart_quantities_merge_and_update() {
    // Arrange
    let app = spawn_app().await;
    let (_, id) = listed_product(&app, "seller@example.com").await;
    let shopper = app.register("shopper@example.com", "secret1").await;
    stash(&app, &shopper, id).await;

    // Act
    app.send_auth(
        Method::POST,
        "/api/cart",
        &shopper,
        Some(json!({ "productId": id, "quantity": 1 })),
    )
    .await;

    // Assert
    let view = cart(&app, &shopper).await;
    assert_eq!(view["items"][0]["quantity"], 3);
    assert_eq!(view["subtotal"], "73.50");

    let response = app
        .send_auth(
            Method::PUT,
            &format!("/api/cart/{}", id),
            &shopper,
            Some(json!({ "quantity": 1 })),
        )
        .await;
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(cart(&app, &shopper).await["items"][0]["quantity"], 1);

    let response = app
        .send_auth(
            Method::PUT,
            "/api/cart/999999",
            &shopper,
            Some(json!({ "quantity": 1 })),
        )
        .await;
    assert_eq!(response.status().as_u16(), 404);
}
