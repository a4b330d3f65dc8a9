// src/models/product.rs

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, types::Json};
use validator::Validate;

use crate::utils::validate::validate_image_url;

/// Represents the 'products' table in the database.
#[derive(Debug, Clone, FromRow)]
pub struct Product {
    pub id: i64,
    pub title: String,
    pub price: Decimal,
    pub category: String,
    /// Sanitized HTML.
    pub description: String,
    pub image: String,
    pub stock: i32,
    pub rating_rate: f64,
    pub rating_count: i32,
    /// `None` once the owning account is gone.
    pub owner_id: Option<i64>,
    pub features: Json<Vec<String>>,
    /// Cleared by a soft delete.
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewProduct {
    pub title: String,
    pub price: Decimal,
    pub category: String,
    pub description: String,
    pub image: String,
    pub stock: i32,
    pub owner_id: i64,
    pub features: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ProductChanges {
    pub title: Option<String>,
    pub price: Option<Decimal>,
    pub category: Option<String>,
    pub description: Option<String>,
    pub image: Option<String>,
    pub stock: Option<i32>,
    pub features: Option<Vec<String>>,
    pub is_active: Option<bool>,
}

impl ProductChanges {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.price.is_none()
            && self.category.is_none()
            && self.description.is_none()
            && self.image.is_none()
            && self.stock.is_none()
            && self.features.is_none()
            && self.is_active.is_none()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProductFilter {
    pub category: Option<String>,
    /// Case-insensitive match over title, description and category.
    pub search: Option<String>,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
    pub active: Option<bool>,
    pub owner_id: Option<i64>,
    /// Matches products whose stock is strictly below this value.
    pub stock_below: Option<i32>,
    pub created_since: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductSort {
    #[default]
    Newest,
    PriceAsc,
    PriceDesc,
    Rating,
    StockAsc,
}

/// Result of a keyed stock adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockAdjustment {
    Applied { stock: i32 },
    /// The operation key was seen before; nothing changed.
    AlreadyApplied,
    /// A decrement would take stock below zero; nothing changed.
    Insufficient { available: i32 },
    Missing,
}

// ---------------------------------------------------------------------------
// Request DTOs
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Validate)]
pub struct CreateProductRequest {
    #[validate(length(min = 1, max = 200, message = "Title is required"))]
    pub title: String,
    pub price: Decimal,
    #[validate(length(min = 1, max = 100, message = "Category is required"))]
    pub category: String,
    #[serde(default)]
    #[validate(length(max = 5000))]
    pub description: String,
    #[validate(custom(function = validate_image_url))]
    pub image: String,
    #[serde(default)]
    #[validate(range(min = 0, message = "Stock cannot be negative"))]
    pub stock: i32,
    #[serde(default)]
    #[validate(length(max = 20))]
    pub features: Vec<String>,
}

/// Owner/admin edit. Rating and owner are not accepted here.
#[derive(Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct UpdateProductRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: Option<String>,
    pub price: Option<Decimal>,
    #[validate(length(min = 1, max = 100))]
    pub category: Option<String>,
    #[validate(length(max = 5000))]
    pub description: Option<String>,
    #[validate(custom(function = validate_image_url))]
    pub image: Option<String>,
    #[validate(range(min = 0, message = "Stock cannot be negative"))]
    pub stock: Option<i32>,
    #[validate(length(max = 20))]
    pub features: Option<Vec<String>>,
    #[serde(rename = "isActive")]
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ListingStatusRequest {
    pub status: super::user::ListingStatus,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductListParams {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub category: Option<String>,
    pub search: Option<String>,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
    pub sort: Option<ProductSort>,
    /// Admin only: `active` or `inactive`.
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LowStockParams {
    pub threshold: Option<i32>,
}

// ---------------------------------------------------------------------------
// Response shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct Rating {
    pub rate: f64,
    pub count: i32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicProduct {
    pub id: i64,
    pub title: String,
    pub price: Decimal,
    pub category: String,
    pub description: String,
    pub image: String,
    pub stock: i32,
    pub rating: Rating,
    pub features: Vec<String>,
    pub owner_id: Option<i64>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Product> for PublicProduct {
    fn from(p: &Product) -> Self {
        Self {
            id: p.id,
            title: p.title.clone(),
            price: p.price,
            category: p.category.clone(),
            description: p.description.clone(),
            image: p.image.clone(),
            stock: p.stock,
            rating: Rating {
                rate: p.rating_rate,
                count: p.rating_count,
            },
            features: p.features.0.clone(),
            owner_id: p.owner_id,
            is_active: p.is_active,
            created_at: p.created_at,
            updated_at: p.updated_at,
        }
    }
}
