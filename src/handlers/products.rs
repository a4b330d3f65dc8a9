// src/handlers/products.rs

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::{Value, json};
use validator::Validate;

use super::strict_body;
use crate::{
    error::AppError,
    models::product::{
        CreateProductRequest, ListingStatusRequest, ProductListParams, PublicProduct,
        UpdateProductRequest,
    },
    services::catalog::{CatalogService, ProductRemoval},
    utils::jwt::AuthUser,
};

pub(crate) fn removal_message(removal: ProductRemoval) -> Value {
    match removal {
        ProductRemoval::Deactivated => json!({
            "success": true,
            "deleted": false,
            "message": "Product has existing orders and was deactivated instead of deleted",
        }),
        ProductRemoval::Deleted => json!({
            "success": true,
            "deleted": true,
            "message": "Product deleted",
        }),
    }
}

// ---------------------------------------------------------------------------
// Public catalog
// ---------------------------------------------------------------------------

/// Lists active products with filtering, sorting and pagination.
pub async fn list_products(
    State(catalog): State<CatalogService>,
    Query(params): Query<ProductListParams>,
) -> Result<impl IntoResponse, AppError> {
    let page = catalog.list_public(&params).await?;
    Ok(Json(json!({ "success": true, "products": page })))
}

pub async fn list_by_category(
    State(catalog): State<CatalogService>,
    Path(category): Path<String>,
    Query(params): Query<ProductListParams>,
) -> Result<impl IntoResponse, AppError> {
    let page = catalog.list_by_category(&category, &params).await?;
    Ok(Json(json!({ "success": true, "products": page })))
}

pub async fn get_product(
    State(catalog): State<CatalogService>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let product = catalog.get_public(id).await?;
    Ok(Json(json!({
        "success": true,
        "product": PublicProduct::from(&product),
    })))
}

// ---------------------------------------------------------------------------
// Listings (authenticated)
// ---------------------------------------------------------------------------

pub async fn create_listing(
    State(catalog): State<CatalogService>,
    Extension(user): Extension<AuthUser>,
    Json(payload): Json<CreateProductRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    let product = catalog.create_listing(user.id, payload).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Listing created",
            "product": PublicProduct::from(&product),
        })),
    ))
}

pub async fn my_listings(
    State(catalog): State<CatalogService>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, AppError> {
    let listings = catalog.my_listings(user.id).await?;
    Ok(Json(json!({ "success": true, "listings": listings })))
}

pub async fn get_listing(
    State(catalog): State<CatalogService>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let product = catalog.get_listing(&user, id).await?;
    Ok(Json(json!({
        "success": true,
        "product": PublicProduct::from(&product),
    })))
}

pub async fn update_listing(
    State(catalog): State<CatalogService>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let payload: UpdateProductRequest = strict_body(body)?;
    let product = catalog.update_product(&user, id, payload).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Listing updated",
        "product": PublicProduct::from(&product),
    })))
}

pub async fn set_listing_status(
    State(catalog): State<CatalogService>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
    Json(payload): Json<ListingStatusRequest>,
) -> Result<impl IntoResponse, AppError> {
    catalog.set_listing_status(user.id, id, payload.status).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Listing status updated",
        "status": payload.status,
    })))
}

pub async fn delete_listing(
    State(catalog): State<CatalogService>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let removal = catalog.delete_listing(&user, id).await?;
    Ok(Json(removal_message(removal)))
}
