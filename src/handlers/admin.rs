// src/handlers/admin.rs

//! Admin-only endpoints. Every route here sits behind `auth_middleware`
//! followed by `admin_middleware`.

use axum::{
    Json,
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::{Value, json};
use validator::Validate;

use super::{products::removal_message, strict_body};
use crate::{
    error::AppError,
    models::{
        order::{AdminPlaceOrderRequest, OrderDetails, OrderListParams, UpdateOrderStatusRequest},
        product::{CreateProductRequest, LowStockParams, ProductListParams, PublicProduct, UpdateProductRequest},
        user::{AdminCreateUserRequest, AdminUpdateUserRequest, UserListParams},
    },
    services::{admin::AdminService, catalog::CatalogService, orders::OrderService},
    utils::jwt::AuthUser,
};

pub async fn dashboard_stats(State(admin): State<AdminService>) -> Result<impl IntoResponse, AppError> {
    let stats = admin.dashboard_stats().await?;
    Ok(Json(json!({ "success": true, "stats": stats })))
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

/// Lists users with search, role and status filters.
pub async fn list_users(
    State(admin): State<AdminService>,
    Query(params): Query<UserListParams>,
) -> Result<impl IntoResponse, AppError> {
    let page = admin.list_users(&params).await?;
    Ok(Json(json!({ "success": true, "users": page })))
}

pub async fn get_user(
    State(admin): State<AdminService>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let details = admin.user_details(id).await?;
    Ok(Json(json!({ "success": true, "user": details.user, "orderStats": details.order_stats })))
}

/// Creates a user. A generated password is returned only in this response.
pub async fn create_user(
    State(admin): State<AdminService>,
    Json(payload): Json<AdminCreateUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    let created = admin.create_user(payload).await?;

    let mut body = json!({
        "success": true,
        "message": "User created",
        "user": created.user,
    });
    if let Some(password) = created.generated_password {
        body["generatedPassword"] = json!(password);
    }
    Ok((StatusCode::CREATED, Json(body)))
}

pub async fn update_user(
    State(admin): State<AdminService>,
    Extension(actor): Extension<AuthUser>,
    Path(id): Path<i64>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let payload: AdminUpdateUserRequest = strict_body(body)?;
    let user = admin.update_user(actor.id, id, payload).await?;
    Ok(Json(json!({ "success": true, "message": "User updated", "user": user })))
}

pub async fn delete_user(
    State(admin): State<AdminService>,
    Extension(actor): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    admin.delete_user(actor.id, id).await?;
    Ok(Json(json!({ "success": true, "message": "User deleted" })))
}

// ---------------------------------------------------------------------------
// Products
// ---------------------------------------------------------------------------

/// All products, hidden ones included.
pub async fn list_products(
    State(catalog): State<CatalogService>,
    Query(params): Query<ProductListParams>,
) -> Result<impl IntoResponse, AppError> {
    let page = catalog.list_all(&params).await?;
    Ok(Json(json!({ "success": true, "products": page })))
}

/// The admin becomes the owner of products created here.
pub async fn create_product(
    State(catalog): State<CatalogService>,
    Extension(actor): Extension<AuthUser>,
    Json(payload): Json<CreateProductRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    let product = catalog.create_listing(actor.id, payload).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Product created",
            "product": PublicProduct::from(&product),
        })),
    ))
}

pub async fn get_product(
    State(catalog): State<CatalogService>,
    Extension(actor): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let product = catalog.get_listing(&actor, id).await?;
    Ok(Json(json!({ "success": true, "product": PublicProduct::from(&product) })))
}

pub async fn update_product(
    State(catalog): State<CatalogService>,
    Extension(actor): Extension<AuthUser>,
    Path(id): Path<i64>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let payload: UpdateProductRequest = strict_body(body)?;
    let product = catalog.update_product(&actor, id, payload).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Product updated",
        "product": PublicProduct::from(&product),
    })))
}

pub async fn delete_product(
    State(catalog): State<CatalogService>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let removal = catalog.delete_product(id).await?;
    Ok(Json(removal_message(removal)))
}

pub async fn low_stock(
    State(catalog): State<CatalogService>,
    Query(params): Query<LowStockParams>,
) -> Result<impl IntoResponse, AppError> {
    let products = catalog.low_stock(params.threshold).await?;
    Ok(Json(json!({
        "success": true,
        "count": products.len(),
        "products": products,
    })))
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

pub async fn list_orders(
    State(orders): State<OrderService>,
    Query(params): Query<OrderListParams>,
) -> Result<impl IntoResponse, AppError> {
    let (page, totals) = orders.list_all(&params).await?;
    Ok(Json(json!({ "success": true, "orders": page, "totals": totals })))
}

/// Places an order on behalf of `userId`.
pub async fn create_order(
    State(orders): State<OrderService>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let payload: AdminPlaceOrderRequest = strict_body(body)?;
    let order = orders.place_order(payload.user_id, payload.order).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Order placed successfully",
            "order": OrderDetails::from(&order),
        })),
    ))
}

pub async fn get_order(
    State(orders): State<OrderService>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let order = orders.get(id).await?;
    Ok(Json(json!({ "success": true, "order": OrderDetails::from(&order) })))
}

pub async fn update_order_status(
    State(orders): State<OrderService>,
    Path(id): Path<i64>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let payload: UpdateOrderStatusRequest = strict_body(body)?;
    let order = orders.update_status(id, payload).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Order updated",
        "order": OrderDetails::from(&order),
    })))
}
