// src/handlers/orders.rs

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::{Value, json};

use super::strict_body;
use crate::{
    error::AppError,
    models::order::{OrderDetails, OrderListParams, PlaceOrderRequest},
    services::orders::OrderService,
    utils::jwt::AuthUser,
};

/// Places an order for the caller.
pub async fn place_order(
    State(orders): State<OrderService>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let payload: PlaceOrderRequest = strict_body(body)?;
    let order = orders.place_order(user.id, payload).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Order placed successfully",
            "order": OrderDetails::from(&order),
        })),
    ))
}

pub async fn my_orders(
    State(orders): State<OrderService>,
    Extension(user): Extension<AuthUser>,
    Query(params): Query<OrderListParams>,
) -> Result<impl IntoResponse, AppError> {
    let page = orders.list_for_user(user.id, &params).await?;
    Ok(Json(json!({ "success": true, "orders": page })))
}

pub async fn get_my_order(
    State(orders): State<OrderService>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let order = orders.get_for_user(user.id, id).await?;
    Ok(Json(json!({
        "success": true,
        "order": OrderDetails::from(&order),
    })))
}
