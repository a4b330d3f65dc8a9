// src/handlers/cart.rs

use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use serde_json::json;
use validator::Validate;

use crate::{
    error::AppError,
    models::user::{AddToCartRequest, CartQuantityRequest, WishlistRequest},
    services::cart::CartService,
    utils::jwt::AuthUser,
};

pub async fn get_cart(
    State(cart): State<CartService>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, AppError> {
    let view = cart.cart(user.id).await?;
    Ok(Json(json!({ "success": true, "cart": view })))
}

pub async fn add_to_cart(
    State(cart): State<CartService>,
    Extension(user): Extension<AuthUser>,
    Json(payload): Json<AddToCartRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    let view = cart.add(user.id, payload.product_id, payload.quantity).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Item added to cart",
        "cart": view,
    })))
}

pub async fn update_cart_item(
    State(cart): State<CartService>,
    Extension(user): Extension<AuthUser>,
    Path(product_id): Path<i64>,
    Json(payload): Json<CartQuantityRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    let view = cart.set_quantity(user.id, product_id, payload.quantity).await?;
    Ok(Json(json!({ "success": true, "cart": view })))
}

pub async fn remove_cart_item(
    State(cart): State<CartService>,
    Extension(user): Extension<AuthUser>,
    Path(product_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let view = cart.remove(user.id, product_id).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Item removed from cart",
        "cart": view,
    })))
}

pub async fn clear_cart(
    State(cart): State<CartService>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, AppError> {
    cart.clear(user.id).await?;
    Ok(Json(json!({ "success": true, "message": "Cart cleared" })))
}

pub async fn get_wishlist(
    State(cart): State<CartService>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, AppError> {
    let items = cart.wishlist(user.id).await?;
    Ok(Json(json!({ "success": true, "wishlist": items })))
}

pub async fn add_to_wishlist(
    State(cart): State<CartService>,
    Extension(user): Extension<AuthUser>,
    Json(payload): Json<WishlistRequest>,
) -> Result<impl IntoResponse, AppError> {
    let items = cart.wish(user.id, payload.product_id).await?;
    Ok(Json(json!({ "success": true, "wishlist": items })))
}

pub async fn remove_from_wishlist(
    State(cart): State<CartService>,
    Extension(user): Extension<AuthUser>,
    Path(product_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let items = cart.unwish(user.id, product_id).await?;
    Ok(Json(json!({ "success": true, "wishlist": items })))
}
