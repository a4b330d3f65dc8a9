// src/store/mod.rs

//! Persistence seams. Workflows only see these traits; `postgres` backs them
//! in production and `memory` in development and tests.

pub mod memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::ExposeSecret;
use sqlx::PgPool;

use crate::{
    error::AppError,
    models::{
        order::{NewOrder, Order, OrderFilter, OrderStatusChange, OrderTotals},
        product::{NewProduct, Product, ProductChanges, ProductFilter, ProductSort, StockAdjustment},
        saga::Saga,
        user::{CartItem, Listing, ListingStatus, NewUser, User, UserChanges, UserFilter, WishlistItem},
    },
    utils::hash::verify_password,
};

pub use memory::MemoryStore;

/// Credential store plus the per-user collections (cart, wishlist, listings).
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Case-insensitive.
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError>;
    async fn find_by_id(&self, id: i64) -> Result<Option<User>, AppError>;
    /// Only matches while `reset_token_expires > now`.
    async fn find_by_reset_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<User>, AppError>;
    /// Hashes `new.password`. Duplicate email yields `Conflict`.
    async fn create(&self, new: NewUser) -> Result<User, AppError>;
    /// Applies the set fields as one write. `None` when the user is absent.
    async fn update(&self, id: i64, changes: UserChanges) -> Result<Option<User>, AppError>;
    /// Like `update`, but only writes while user `id` still holds an
    /// unexpired reset token hashing to `token_hash`. Of two concurrent
    /// callers with the same token, at most one gets `Some`.
    async fn consume_reset_token(
        &self,
        id: i64,
        token_hash: &str,
        now: DateTime<Utc>,
        changes: UserChanges,
    ) -> Result<Option<User>, AppError>;
    async fn list(&self, filter: &UserFilter, skip: i64, limit: i64) -> Result<Vec<User>, AppError>;
    async fn count(&self, filter: &UserFilter) -> Result<i64, AppError>;
    async fn delete(&self, id: i64) -> Result<bool, AppError>;

    async fn compare_password(&self, user: &User, raw: &str) -> Result<bool, AppError> {
        verify_password(raw, &user.password_hash)
    }

    async fn cart(&self, user_id: i64) -> Result<Vec<CartItem>, AppError>;
    /// Adds to the existing quantity when the product is already in the cart.
    async fn add_to_cart(&self, user_id: i64, product_id: i64, quantity: i32) -> Result<CartItem, AppError>;
    async fn set_cart_quantity(&self, user_id: i64, product_id: i64, quantity: i32) -> Result<bool, AppError>;
    async fn remove_from_cart(&self, user_id: i64, product_id: i64) -> Result<bool, AppError>;
    async fn clear_cart(&self, user_id: i64) -> Result<(), AppError>;

    async fn wishlist(&self, user_id: i64) -> Result<Vec<WishlistItem>, AppError>;
    /// Returns false when the product was already wished for.
    async fn add_to_wishlist(&self, user_id: i64, product_id: i64) -> Result<bool, AppError>;
    async fn remove_from_wishlist(&self, user_id: i64, product_id: i64) -> Result<bool, AppError>;

    async fn listings(&self, user_id: i64) -> Result<Vec<Listing>, AppError>;
    async fn add_listing(&self, user_id: i64, product_id: i64) -> Result<(), AppError>;
    async fn set_listing_status(
        &self,
        user_id: i64,
        product_id: i64,
        status: ListingStatus,
    ) -> Result<bool, AppError>;
    async fn remove_listing(&self, user_id: i64, product_id: i64) -> Result<(), AppError>;

    /// Removes `product_id` from every cart. Returns the number of rows touched.
    async fn pull_from_all_carts(&self, product_id: i64) -> Result<u64, AppError>;
    async fn pull_from_all_wishlists(&self, product_id: i64) -> Result<u64, AppError>;
}

#[async_trait]
pub trait ProductStore: Send + Sync {
    async fn find_by_id(&self, id: i64) -> Result<Option<Product>, AppError>;
    async fn find(
        &self,
        filter: &ProductFilter,
        sort: ProductSort,
        skip: i64,
        limit: i64,
    ) -> Result<Vec<Product>, AppError>;
    async fn count(&self, filter: &ProductFilter) -> Result<i64, AppError>;
    async fn create(&self, new: NewProduct) -> Result<Product, AppError>;
    async fn update(&self, id: i64, changes: ProductChanges) -> Result<Option<Product>, AppError>;
    async fn delete(&self, id: i64) -> Result<bool, AppError>;

    /// Conditional, keyed stock change. Replaying `op_key` is a no-op and a
    /// decrement below zero is refused without writing.
    async fn increment_stock(&self, id: i64, delta: i32, op_key: &str) -> Result<StockAdjustment, AppError>;
    async fn stock_op_applied(&self, op_key: &str) -> Result<bool, AppError>;
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Duplicate order number or saga id yields `Conflict`.
    async fn create(&self, new: NewOrder) -> Result<Order, AppError>;
    async fn find_by_id(&self, id: i64) -> Result<Option<Order>, AppError>;
    async fn find_by_saga(&self, saga_id: &str) -> Result<Option<Order>, AppError>;
    /// Newest first.
    async fn list(&self, filter: &OrderFilter, skip: i64, limit: i64) -> Result<Vec<Order>, AppError>;
    async fn totals(&self, filter: &OrderFilter) -> Result<OrderTotals, AppError>;
    async fn count_referencing_product(&self, product_id: i64) -> Result<i64, AppError>;
    async fn update_status(&self, id: i64, change: OrderStatusChange) -> Result<Option<Order>, AppError>;
}

#[async_trait]
pub trait SagaStore: Send + Sync {
    /// Upsert by id.
    async fn save(&self, saga: &Saga) -> Result<(), AppError>;
    async fn load(&self, id: &str) -> Result<Option<Saga>, AppError>;
    /// Non-terminal sagas whose retry time has come.
    async fn due(&self, now: DateTime<Utc>) -> Result<Vec<Saga>, AppError>;
    /// Unfinished order sagas whose line items include `product_id`.
    async fn open_orders_for_product(&self, product_id: i64) -> Result<i64, AppError>;
    /// Deletes terminal sagas last updated before `before`, together with
    /// the stock movement keys they recorded. Returns the sagas removed.
    async fn prune(&self, before: DateTime<Utc>) -> Result<u64, AppError>;
}

/// The four stores, shared by every service.
#[derive(Clone)]
pub struct Stores {
    pub users: Arc<dyn UserStore>,
    pub products: Arc<dyn ProductStore>,
    pub orders: Arc<dyn OrderStore>,
    pub sagas: Arc<dyn SagaStore>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self::from_memory(MemoryStore::default())
    }

    pub fn from_memory(store: MemoryStore) -> Self {
        Self {
            users: Arc::new(store.clone()),
            products: Arc::new(store.clone()),
            orders: Arc::new(store.clone()),
            sagas: Arc::new(store),
        }
    }

    pub fn postgres(pool: PgPool) -> Self {
        Self {
            users: Arc::new(postgres::PgUserStore::new(pool.clone())),
            products: Arc::new(postgres::PgProductStore::new(pool.clone())),
            orders: Arc::new(postgres::PgOrderStore::new(pool.clone())),
            sagas: Arc::new(postgres::PgSagaStore::new(pool)),
        }
    }

    /// Creates the configured admin account unless that email already exists.
    pub async fn seed_admin(&self, email: &str, password: &secrecy::SecretString) -> Result<(), AppError> {
        if self.users.find_by_email(email).await?.is_some() {
            return Ok(());
        }
        if password.expose_secret().len() < 6 {
            return Err(AppError::WeakPassword(
                "ADMIN_PASSWORD must be at least 6 characters".to_string(),
            ));
        }

        tracing::info!("Seeding admin user: {}", email);
        self.users
            .create(NewUser {
                name: "Administrator".to_string(),
                email: email.to_lowercase(),
                password: password.clone(),
                country: String::new(),
                contact: String::new(),
                is_admin: true,
                is_active: true,
                email_verified: true,
                last_login: None,
            })
            .await?;
        tracing::info!("Admin user created successfully.");
        Ok(())
    }
}
