// src/services/cart.rs

//! Cart and wishlist. Both may hold references to products that have since
//! been deleted or hidden; reads report those as unavailable.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::{
    error::AppError,
    models::product::{Product, PublicProduct},
    store::{ProductStore, UserStore},
};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    pub product_id: i64,
    pub quantity: i32,
    pub added_at: DateTime<Utc>,
    pub available: bool,
    pub product: Option<PublicProduct>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartView {
    pub items: Vec<CartLine>,
    /// Sum over available lines only.
    pub subtotal: Decimal,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WishlistLine {
    pub product_id: i64,
    pub added_at: DateTime<Utc>,
    pub available: bool,
    pub product: Option<PublicProduct>,
}

#[derive(Clone)]
pub struct CartService {
    users: Arc<dyn UserStore>,
    products: Arc<dyn ProductStore>,
}

impl CartService {
    pub fn new(users: Arc<dyn UserStore>, products: Arc<dyn ProductStore>) -> Self {
        Self { users, products }
    }

    pub async fn cart(&self, user_id: i64) -> Result<CartView, AppError> {
        let mut items = Vec::new();
        let mut subtotal = Decimal::ZERO;
        for item in self.users.cart(user_id).await? {
            let product = self.resolve(item.product_id).await?;
            if let Some(p) = &product {
                subtotal += p.price * Decimal::from(item.quantity);
            }
            items.push(CartLine {
                product_id: item.product_id,
                quantity: item.quantity,
                added_at: item.added_at,
                available: product.is_some(),
                product: product.as_ref().map(PublicProduct::from),
            });
        }
        Ok(CartView { items, subtotal })
    }

    /// Adds to the existing quantity when the product is already there.
    pub async fn add(&self, user_id: i64, product_id: i64, quantity: i32) -> Result<CartView, AppError> {
        if quantity < 1 {
            return Err(AppError::Validation("Quantity must be at least 1".to_string()));
        }
        self.resolve(product_id)
            .await?
            .ok_or(AppError::ProductNotFound(product_id))?;

        self.users.add_to_cart(user_id, product_id, quantity).await?;
        self.cart(user_id).await
    }

    pub async fn set_quantity(
        &self,
        user_id: i64,
        product_id: i64,
        quantity: i32,
    ) -> Result<CartView, AppError> {
        if quantity < 1 {
            return Err(AppError::Validation("Quantity must be at least 1".to_string()));
        }
        if !self.users.set_cart_quantity(user_id, product_id, quantity).await? {
            return Err(AppError::NotFound("Item not found in cart".to_string()));
        }
        self.cart(user_id).await
    }

    pub async fn remove(&self, user_id: i64, product_id: i64) -> Result<CartView, AppError> {
        if !self.users.remove_from_cart(user_id, product_id).await? {
            return Err(AppError::NotFound("Item not found in cart".to_string()));
        }
        self.cart(user_id).await
    }

    pub async fn clear(&self, user_id: i64) -> Result<(), AppError> {
        self.users.clear_cart(user_id).await
    }

    pub async fn wishlist(&self, user_id: i64) -> Result<Vec<WishlistLine>, AppError> {
        let mut lines = Vec::new();
        for item in self.users.wishlist(user_id).await? {
            let product = self.resolve(item.product_id).await?;
            lines.push(WishlistLine {
                product_id: item.product_id,
                added_at: item.added_at,
                available: product.is_some(),
                product: product.as_ref().map(PublicProduct::from),
            });
        }
        Ok(lines)
    }

    /// Idempotent.
    pub async fn wish(&self, user_id: i64, product_id: i64) -> Result<Vec<WishlistLine>, AppError> {
        self.resolve(product_id)
            .await?
            .ok_or(AppError::ProductNotFound(product_id))?;
        self.users.add_to_wishlist(user_id, product_id).await?;
        self.wishlist(user_id).await
    }

    pub async fn unwish(&self, user_id: i64, product_id: i64) -> Result<Vec<WishlistLine>, AppError> {
        if !self.users.remove_from_wishlist(user_id, product_id).await? {
            return Err(AppError::NotFound("Item not found in wishlist".to_string()));
        }
        self.wishlist(user_id).await
    }

    /// An active product, or `None` when the reference dangles.
    async fn resolve(&self, product_id: i64) -> Result<Option<Product>, AppError> {
        Ok(self
            .products
            .find_by_id(product_id)
            .await?
            .filter(|p| p.is_active))
    }
}
