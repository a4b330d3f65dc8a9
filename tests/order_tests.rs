// tests/order_tests.rs

mod common;

use common::{TestApp, decimal, json_body, shipping_address, spawn_app};
use regex::Regex;
use reqwest::Method;
use rust_decimal::Decimal;
use serde_json::{Value, json};
use shopeasy::store::memory::FailPoint;

async fn place(app: &TestApp, token: &str, items: Value) -> reqwest::Response {
    app.send_auth(
        Method::POST,
        "/api/orders",
        token,
        Some(json!({
            "items": items,
            "shippingAddress": shipping_address(),
            "paymentMethod": "Credit Card",
        })),
    )
    .await
}

#[tokio::test]
async fn order_decrements_stock_and_snapshots_price() {
    // Arrange
    let app = spawn_app().await;
    let token = app.register("buyer@example.com", "secret1").await;
    let buyer = app.user_by_email("buyer@example.com").await;
    let lamp = app.seed_product(buyer.id, "Desk Lamp", Decimal::new(1999, 2), 5).await;

    // Act
    let response = place(&app, &token, json!([{ "productId": lamp.id, "quantity": 3 }])).await;

    // Assert
    assert_eq!(response.status().as_u16(), 201);
    let body = json_body(response).await;
    let order = &body["order"];
    assert_eq!(decimal(&order["totalPrice"]), Decimal::new(5997, 2));
    assert_eq!(order["orderStatus"], "Pending");
    assert_eq!(order["paymentStatus"], "Pending");
    assert_eq!(order["paymentMethod"], "Credit Card");
    assert_eq!(order["items"][0]["name"], "Desk Lamp");
    assert_eq!(decimal(&order["items"][0]["price"]), Decimal::new(1999, 2));

    let number_re = Regex::new(r"^ORD-\d{8}-\d{5}$").unwrap();
    assert!(number_re.is_match(order["orderNumber"].as_str().unwrap()));

    assert_eq!(app.product(lamp.id).await.unwrap().stock, 2);
}

#[tokio::test]
async fn insufficient_stock_leaves_stock_untouched() {
    // Arrange
    let app = spawn_app().await;
    let token = app.register("buyer@example.com", "secret1").await;
    let buyer = app.user_by_email("buyer@example.com").await;
    let lamp = app.seed_product(buyer.id, "Desk Lamp", Decimal::new(1999, 2), 5).await;
    let first = place(&app, &token, json!([{ "productId": lamp.id, "quantity": 3 }])).await;
    assert_eq!(first.status().as_u16(), 201);

    // Act
    let response = place(&app, &token, json!([{ "productId": lamp.id, "quantity": 3 }])).await;

    // Assert
    assert_eq!(response.status().as_u16(), 409);
    assert_eq!(json_body(response).await["reason"], "insufficient_stock");
    assert_eq!(app.product(lamp.id).await.unwrap().stock, 2);
    let orders = json_body(app.get_auth("/api/orders", &token).await).await;
    assert_eq!(orders["orders"]["total"], 1);
}

#[tokio::test]
async fn repeated_lines_share_the_stock_check() {
    // Arrange
    let app = spawn_app().await;
    let token = app.register("buyer@example.com", "secret1").await;
    let buyer = app.user_by_email("buyer@example.com").await;
    let mug = app.seed_product(buyer.id, "Mug", Decimal::new(500, 2), 4).await;

    // Act
    let response = place(
        &app,
        &token,
        json!([
            { "productId": mug.id, "quantity": 3 },
            { "productId": mug.id, "quantity": 2 },
        ]),
    )
    .await;

    // Assert
    assert_eq!(response.status().as_u16(), 409);
    assert_eq!(app.product(mug.id).await.unwrap().stock, 4);
}

#[tokio::test]
async fn unknown_product_fails_before_any_reservation() {
    // Arrange
    let app = spawn_app().await;
    let token = app.register("buyer@example.com", "secret1").await;
    let buyer = app.user_by_email("buyer@example.com").await;
    let mug = app.seed_product(buyer.id, "Mug", Decimal::new(500, 2), 4).await;

    // Act
    let response = place(
        &app,
        &token,
        json!([
            { "productId": mug.id, "quantity": 1 },
            { "productId": 999_999, "quantity": 1 },
        ]),
    )
    .await;

    // Assert
    assert_eq!(response.status().as_u16(), 404);
    assert_eq!(json_body(response).await["reason"], "product_not_found");
    assert_eq!(app.product(mug.id).await.unwrap().stock, 4);
}

#[tokio::test]
async fn failed_order_write_releases_reserved_stock() {
    // Arrange
    let app = spawn_app().await;
    let token = app.register("buyer@example.com", "secret1").await;
    let buyer = app.user_by_email("buyer@example.com").await;
    let mug = app.seed_product(buyer.id, "Mug", Decimal::new(500, 2), 4).await;
    let plate = app.seed_product(buyer.id, "Plate", Decimal::new(800, 2), 6).await;
    app.store.fail_next(FailPoint::CreateOrder, 1).await;

    // Act
    let response = place(
        &app,
        &token,
        json!([
            { "productId": mug.id, "quantity": 2 },
            { "productId": plate.id, "quantity": 1 },
        ]),
    )
    .await;

    // Assert
    assert_eq!(response.status().as_u16(), 500);
    assert_eq!(app.product(mug.id).await.unwrap().stock, 4);
    assert_eq!(app.product(plate.id).await.unwrap().stock, 6);

    let orders = json_body(app.get_auth("/api/orders", &token).await).await;
    assert_eq!(orders["orders"]["total"], 0);
}

#[tokio::test]
async fn empty_order_is_rejected() {
    let app = spawn_app().await;
    let token = app.register("buyer@example.com", "secret1").await;

    let response = place(&app, &token, json!([])).await;

    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
async fn users_only_see_their_own_orders() {
    // Arrange
    let app = spawn_app().await;
    let alice = app.register("alice@example.com", "secret1").await;
    let bob = app.register("bob@example.com", "secret1").await;
    let owner = app.user_by_email("alice@example.com").await;
    let mug = app.seed_product(owner.id, "Mug", Decimal::new(500, 2), 10).await;

    let response = place(&app, &alice, json!([{ "productId": mug.id, "quantity": 1 }])).await;
    let order_id = json_body(response).await["order"]["id"].as_i64().unwrap();

    // Act
    let mine = app.get_auth(&format!("/api/orders/{}", order_id), &alice).await;
    let theirs = app.get_auth(&format!("/api/orders/{}", order_id), &bob).await;

    // Assert
    assert_eq!(mine.status().as_u16(), 200);
    assert_eq!(theirs.status().as_u16(), 404);

    let listed = json_body(app.get_auth("/api/orders", &alice).await).await;
    assert_eq!(listed["orders"]["total"], 1);
    assert_eq!(listed["orders"]["items"][0]["itemCount"], 1);
}

#[tokio::test]
async fn shipping_stamps_date_once_and_merges_tracking() {
    // Arrange
    let app = spawn_app().await;
    let (_, admin) = app.admin_token().await;
    let token = app.register("buyer@example.com", "secret1").await;
    let buyer = app.user_by_email("buyer@example.com").await;
    let mug = app.seed_product(buyer.id, "Mug", Decimal::new(500, 2), 10).await;
    let response = place(&app, &token, json!([{ "productId": mug.id, "quantity": 1 }])).await;
    let order_id = json_body(response).await["order"]["id"].as_i64().unwrap();
    let path = format!("/api/admin/orders/{}", order_id);

    // Act
    let response = app
        .send_auth(
            Method::PUT,
            &path,
            &admin,
            Some(json!({ "orderStatus": "Shipped", "carrier": "UPS" })),
        )
        .await;

    // Assert
    assert_eq!(response.status().as_u16(), 200);
    let shipped = json_body(response).await["order"].clone();
    assert_eq!(shipped["orderStatus"], "Shipped");
    assert_eq!(shipped["shippingDetails"]["carrier"], "UPS");
    let shipped_date = shipped["shippingDetails"]["shippedDate"].clone();
    assert!(shipped_date.is_string());

    // Re-sending Shipped later does not move the stamp
    app.clock.advance(chrono::Duration::hours(2));
    let response = app
        .send_auth(
            Method::PUT,
            &path,
            &admin,
            Some(json!({ "orderStatus": "Shipped", "trackingNumber": "1Z999" })),
        )
        .await;
    let order = json_body(response).await["order"].clone();
    assert_eq!(order["shippingDetails"]["shippedDate"], shipped_date);
    assert_eq!(order["shippingDetails"]["carrier"], "UPS");
    assert_eq!(order["shippingDetails"]["trackingNumber"], "1Z999");
}

#[tokio::test]
async fn status_update_rejects_unknown_and_empty_bodies() {
    // Arrange
    let app = spawn_app().await;
    let (_, admin) = app.admin_token().await;
    let token = app.register("buyer@example.com", "secret1").await;
    let buyer = app.user_by_email("buyer@example.com").await;
    let mug = app.seed_product(buyer.id, "Mug", Decimal::new(500, 2), 10).await;
    let response = place(&app, &token, json!([{ "productId": mug.id, "quantity": 1 }])).await;
    let order_id = json_body(response).await["order"]["id"].as_i64().unwrap();
    let path = format!("/api/admin/orders/{}", order_id);

    // Act
    let unknown = app
        .send_auth(Method::PUT, &path, &admin, Some(json!({ "totalPrice": "0" })))
        .await;
    let empty = app
        .send_auth(Method::PUT, &path, &admin, Some(json!({})))
        .await;

    // Assert
    assert_eq!(unknown.status().as_u16(), 400);
    assert_eq!(empty.status().as_u16(), 400);
}

#[tokio::test]
async fn admin_can_order_on_behalf_of_a_user() {
    // Arrange
    let app = spawn_app().await;
    let (_, admin) = app.admin_token().await;
    app.register("buyer@example.com", "secret1").await;
    let buyer = app.user_by_email("buyer@example.com").await;
    let mug = app.seed_product(buyer.id, "Mug", Decimal::new(500, 2), 10).await;

    // Act
    let response = app
        .send_auth(
            Method::POST,
            "/api/admin/orders",
            &admin,
            Some(json!({
                "userId": buyer.id,
                "items": [{ "productId": mug.id, "quantity": 4 }],
                "shippingAddress": shipping_address(),
            })),
        )
        .await;

    // Assert
    assert_eq!(response.status().as_u16(), 201);
    let order = json_body(response).await["order"].clone();
    assert_eq!(order["userId"], buyer.id);
    assert_eq!(order["paymentMethod"], "COD");
    assert_eq!(app.product(mug.id).await.unwrap().stock, 6);

    let listed = json_body(app.get_auth("/api/admin/orders", &admin).await).await;
    assert_eq!(listed["totals"]["count"], 1);
}
