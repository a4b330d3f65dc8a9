// src/store/memory.rs

//! Process-local backend used when no `DATABASE_URL` is configured and by the
//! test suites. Mirrors the Postgres constraints that the workflows rely on:
//! unique emails, unique order numbers, keyed stock movements, `stock >= 0`.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::ExposeSecret;
use sqlx::types::Json;
use tokio::sync::Mutex;

use super::{OrderStore, ProductStore, SagaStore, UserStore};
use crate::{
    error::AppError,
    models::{
        order::{NewOrder, Order, OrderFilter, OrderStatus, OrderStatusChange, OrderTotals, PaymentStatus},
        product::{NewProduct, Product, ProductChanges, ProductFilter, ProductSort, StockAdjustment},
        saga::Saga,
        user::{
            CartItem, Listing, ListingStatus, NewUser, ResetTokenChange, RoleFilter, User, UserChanges,
            UserFilter, WishlistItem,
        },
    },
    utils::hash::hash_password,
};

/// Operations that can be told to fail, for exercising recovery paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    DeleteProduct,
    RemoveListing,
    PullCarts,
    PullWishlists,
    CreateOrder,
}

#[derive(Default)]
struct Tables {
    next_id: i64,
    users: BTreeMap<i64, User>,
    carts: HashMap<i64, Vec<CartItem>>,
    wishlists: HashMap<i64, Vec<WishlistItem>>,
    listings: HashMap<i64, Vec<Listing>>,
    products: BTreeMap<i64, Product>,
    stock_ops: HashSet<String>,
    orders: BTreeMap<i64, Order>,
    sagas: HashMap<String, Saga>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    faults: Arc<Mutex<HashMap<FailPoint, u32>>>,
}

impl MemoryStore {
    /// Makes the next `times` calls hitting `point` fail with an internal error.
    pub async fn fail_next(&self, point: FailPoint, times: u32) {
        self.faults.lock().await.insert(point, times);
    }

    async fn trip(&self, point: FailPoint) -> Result<(), AppError> {
        let mut faults = self.faults.lock().await;
        match faults.get_mut(&point) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(AppError::Internal(format!("injected failure at {:?}", point)))
            }
            _ => Ok(()),
        }
    }
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

fn page<T: Clone>(items: impl Iterator<Item = T>, skip: i64, limit: i64) -> Vec<T> {
    items.skip(skip.max(0) as usize).take(limit.max(0) as usize).collect()
}

fn user_matches(user: &User, filter: &UserFilter) -> bool {
    if let Some(search) = filter.search.as_deref() {
        if !(contains_ci(&user.name, search) || contains_ci(&user.email, search) || contains_ci(&user.contact, search)) {
            return false;
        }
    }
    match filter.role {
        Some(RoleFilter::Admin) if !user.is_admin => return false,
        Some(RoleFilter::User) if user.is_admin => return false,
        _ => {}
    }
    if filter.active.is_some_and(|active| active != user.is_active) {
        return false;
    }
    if filter.created_since.is_some_and(|since| user.created_at < since) {
        return false;
    }
    if let Some(since) = filter.logged_in_since {
        if !user.last_login.is_some_and(|at| at >= since) {
            return false;
        }
    }
    true
}

fn product_matches(product: &Product, filter: &ProductFilter) -> bool {
    if let Some(category) = filter.category.as_deref() {
        if !product.category.eq_ignore_ascii_case(category) {
            return false;
        }
    }
    if let Some(search) = filter.search.as_deref() {
        if !(contains_ci(&product.title, search)
            || contains_ci(&product.description, search)
            || contains_ci(&product.category, search))
        {
            return false;
        }
    }
    if filter.min_price.is_some_and(|min| product.price < min) {
        return false;
    }
    if filter.max_price.is_some_and(|max| product.price > max) {
        return false;
    }
    if filter.active.is_some_and(|active| active != product.is_active) {
        return false;
    }
    if filter.owner_id.is_some() && filter.owner_id != product.owner_id {
        return false;
    }
    if filter.stock_below.is_some_and(|limit| product.stock >= limit) {
        return false;
    }
    if filter.created_since.is_some_and(|since| product.created_at < since) {
        return false;
    }
    true
}

fn order_matches(order: &Order, filter: &OrderFilter) -> bool {
    filter.user_id.is_none_or(|id| id == order.user_id)
        && filter.order_status.is_none_or(|s| s == order.order_status)
        && filter.payment_status.is_none_or(|s| s == order.payment_status)
        && filter.from.is_none_or(|from| order.created_at >= from)
        && filter.to.is_none_or(|to| order.created_at <= to)
}

fn apply_changes(user: &mut User, changes: UserChanges, password_hash: Option<String>) {
    if let Some(v) = changes.name {
        user.name = v;
    }
    if let Some(v) = changes.email {
        user.email = v.to_lowercase();
    }
    if let Some(v) = changes.country {
        user.country = v;
    }
    if let Some(v) = changes.contact {
        user.contact = v;
    }
    if let Some(v) = changes.profile_image {
        user.profile_image = v;
    }
    if let Some(v) = changes.is_admin {
        user.is_admin = v;
    }
    if let Some(v) = changes.is_active {
        user.is_active = v;
    }
    if let Some(v) = password_hash {
        user.password_hash = v;
    }
    if let Some(v) = changes.password_history {
        user.password_history = Json(v);
    }
    if let Some(v) = changes.password_changed_at {
        user.password_changed_at = Some(v);
    }
    match changes.reset_token {
        Some(ResetTokenChange::Set {
            token_hash,
            expires_at,
            requested_at,
            request_count,
        }) => {
            user.reset_token_hash = Some(token_hash);
            user.reset_token_expires = Some(expires_at);
            user.last_reset_request = Some(requested_at);
            user.reset_requests = request_count;
        }
        Some(ResetTokenChange::Clear) => {
            user.reset_token_hash = None;
            user.reset_token_expires = None;
        }
        None => {}
    }
    if let Some(v) = changes.reset_requests {
        user.reset_requests = v;
    }
    if let Some(v) = changes.last_login {
        user.last_login = Some(v);
    }
    user.updated_at = Utc::now();
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<User>, AppError> {
        Ok(self.tables.lock().await.users.get(&id).cloned())
    }

    async fn find_by_reset_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<User>, AppError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .users
            .values()
            .find(|u| {
                u.reset_token_hash.as_deref() == Some(token_hash)
                    && u.reset_token_expires.is_some_and(|exp| exp > now)
            })
            .cloned())
    }

    async fn create(&self, new: NewUser) -> Result<User, AppError> {
        let password_hash = hash_password(new.password.expose_secret())?;
        let mut tables = self.tables.lock().await;
        if tables.users.values().any(|u| u.email.eq_ignore_ascii_case(&new.email)) {
            return Err(AppError::Conflict("Email already registered".to_string()));
        }

        let now = Utc::now();
        let id = tables.next_id();
        let user = User {
            id,
            name: new.name,
            email: new.email.to_lowercase(),
            email_verified: new.email_verified,
            password_hash,
            country: new.country,
            contact: new.contact,
            profile_image: String::new(),
            is_admin: new.is_admin,
            is_active: new.is_active,
            reset_token_hash: None,
            reset_token_expires: None,
            reset_requests: 0,
            last_reset_request: None,
            password_history: Json(Vec::new()),
            password_changed_at: None,
            last_login: new.last_login,
            created_at: now,
            updated_at: now,
        };
        tables.users.insert(id, user.clone());
        Ok(user)
    }

    async fn update(&self, id: i64, changes: UserChanges) -> Result<Option<User>, AppError> {
        let password_hash = match &changes.password {
            Some(raw) => Some(hash_password(raw.expose_secret())?),
            None => None,
        };

        let mut tables = self.tables.lock().await;
        if let Some(email) = changes.email.as_deref() {
            if tables
                .users
                .values()
                .any(|u| u.id != id && u.email.eq_ignore_ascii_case(email))
            {
                return Err(AppError::Conflict("Email already registered".to_string()));
            }
        }

        let Some(user) = tables.users.get_mut(&id) else {
            return Ok(None);
        };
        apply_changes(user, changes, password_hash);
        Ok(Some(user.clone()))
    }

    async fn consume_reset_token(
        &self,
        id: i64,
        token_hash: &str,
        now: DateTime<Utc>,
        changes: UserChanges,
    ) -> Result<Option<User>, AppError> {
        let password_hash = match &changes.password {
            Some(raw) => Some(hash_password(raw.expose_secret())?),
            None => None,
        };

        let mut tables = self.tables.lock().await;
        let Some(user) = tables.users.get_mut(&id).filter(|u| {
            u.reset_token_hash.as_deref() == Some(token_hash)
                && u.reset_token_expires.is_some_and(|exp| exp > now)
        }) else {
            return Ok(None);
        };
        apply_changes(user, changes, password_hash);
        Ok(Some(user.clone()))
    }

    async fn list(&self, filter: &UserFilter, skip: i64, limit: i64) -> Result<Vec<User>, AppError> {
        let tables = self.tables.lock().await;
        Ok(page(
            tables.users.values().rev().filter(|u| user_matches(u, filter)).cloned(),
            skip,
            limit,
        ))
    }

    async fn count(&self, filter: &UserFilter) -> Result<i64, AppError> {
        let tables = self.tables.lock().await;
        Ok(tables.users.values().filter(|u| user_matches(u, filter)).count() as i64)
    }

    async fn delete(&self, id: i64) -> Result<bool, AppError> {
        let mut tables = self.tables.lock().await;
        let removed = tables.users.remove(&id).is_some();
        tables.carts.remove(&id);
        tables.wishlists.remove(&id);
        tables.listings.remove(&id);
        for product in tables.products.values_mut() {
            if product.owner_id == Some(id) {
                product.owner_id = None;
            }
        }
        Ok(removed)
    }

    async fn cart(&self, user_id: i64) -> Result<Vec<CartItem>, AppError> {
        let tables = self.tables.lock().await;
        Ok(tables.carts.get(&user_id).cloned().unwrap_or_default())
    }

    async fn add_to_cart(&self, user_id: i64, product_id: i64, quantity: i32) -> Result<CartItem, AppError> {
        let mut tables = self.tables.lock().await;
        let cart = tables.carts.entry(user_id).or_default();
        if let Some(item) = cart.iter_mut().find(|i| i.product_id == product_id) {
            item.quantity += quantity;
            return Ok(item.clone());
        }
        let item = CartItem {
            product_id,
            quantity,
            added_at: Utc::now(),
        };
        cart.push(item.clone());
        Ok(item)
    }

    async fn set_cart_quantity(&self, user_id: i64, product_id: i64, quantity: i32) -> Result<bool, AppError> {
        let mut tables = self.tables.lock().await;
        let item = tables
            .carts
            .get_mut(&user_id)
            .and_then(|cart| cart.iter_mut().find(|i| i.product_id == product_id));
        Ok(match item {
            Some(item) => {
                item.quantity = quantity;
                true
            }
            None => false,
        })
    }

    async fn remove_from_cart(&self, user_id: i64, product_id: i64) -> Result<bool, AppError> {
        let mut tables = self.tables.lock().await;
        let Some(cart) = tables.carts.get_mut(&user_id) else {
            return Ok(false);
        };
        let before = cart.len();
        cart.retain(|i| i.product_id != product_id);
        Ok(cart.len() != before)
    }

    async fn clear_cart(&self, user_id: i64) -> Result<(), AppError> {
        self.tables.lock().await.carts.remove(&user_id);
        Ok(())
    }

    async fn wishlist(&self, user_id: i64) -> Result<Vec<WishlistItem>, AppError> {
        let tables = self.tables.lock().await;
        Ok(tables.wishlists.get(&user_id).cloned().unwrap_or_default())
    }

    async fn add_to_wishlist(&self, user_id: i64, product_id: i64) -> Result<bool, AppError> {
        let mut tables = self.tables.lock().await;
        let list = tables.wishlists.entry(user_id).or_default();
        if list.iter().any(|i| i.product_id == product_id) {
            return Ok(false);
        }
        list.push(WishlistItem {
            product_id,
            added_at: Utc::now(),
        });
        Ok(true)
    }

    async fn remove_from_wishlist(&self, user_id: i64, product_id: i64) -> Result<bool, AppError> {
        let mut tables = self.tables.lock().await;
        let Some(list) = tables.wishlists.get_mut(&user_id) else {
            return Ok(false);
        };
        let before = list.len();
        list.retain(|i| i.product_id != product_id);
        Ok(list.len() != before)
    }

    async fn listings(&self, user_id: i64) -> Result<Vec<Listing>, AppError> {
        let tables = self.tables.lock().await;
        Ok(tables.listings.get(&user_id).cloned().unwrap_or_default())
    }

    async fn add_listing(&self, user_id: i64, product_id: i64) -> Result<(), AppError> {
        let mut tables = self.tables.lock().await;
        let listings = tables.listings.entry(user_id).or_default();
        if !listings.iter().any(|l| l.product_id == product_id) {
            listings.push(Listing {
                product_id,
                status: ListingStatus::Active,
                created_at: Utc::now(),
            });
        }
        Ok(())
    }

    async fn set_listing_status(
        &self,
        user_id: i64,
        product_id: i64,
        status: ListingStatus,
    ) -> Result<bool, AppError> {
        let mut tables = self.tables.lock().await;
        let listing = tables
            .listings
            .get_mut(&user_id)
            .and_then(|l| l.iter_mut().find(|l| l.product_id == product_id));
        Ok(match listing {
            Some(listing) => {
                listing.status = status;
                true
            }
            None => false,
        })
    }

    async fn remove_listing(&self, user_id: i64, product_id: i64) -> Result<(), AppError> {
        self.trip(FailPoint::RemoveListing).await?;
        let mut tables = self.tables.lock().await;
        if let Some(listings) = tables.listings.get_mut(&user_id) {
            listings.retain(|l| l.product_id != product_id);
        }
        Ok(())
    }

    async fn pull_from_all_carts(&self, product_id: i64) -> Result<u64, AppError> {
        self.trip(FailPoint::PullCarts).await?;
        let mut tables = self.tables.lock().await;
        let mut touched = 0;
        for cart in tables.carts.values_mut() {
            let before = cart.len();
            cart.retain(|i| i.product_id != product_id);
            touched += (before - cart.len()) as u64;
        }
        Ok(touched)
    }

    async fn pull_from_all_wishlists(&self, product_id: i64) -> Result<u64, AppError> {
        self.trip(FailPoint::PullWishlists).await?;
        let mut tables = self.tables.lock().await;
        let mut touched = 0;
        for list in tables.wishlists.values_mut() {
            let before = list.len();
            list.retain(|i| i.product_id != product_id);
            touched += (before - list.len()) as u64;
        }
        Ok(touched)
    }
}

#[async_trait]
impl ProductStore for MemoryStore {
    async fn find_by_id(&self, id: i64) -> Result<Option<Product>, AppError> {
        Ok(self.tables.lock().await.products.get(&id).cloned())
    }

    async fn find(
        &self,
        filter: &ProductFilter,
        sort: ProductSort,
        skip: i64,
        limit: i64,
    ) -> Result<Vec<Product>, AppError> {
        let tables = self.tables.lock().await;
        let mut matched: Vec<Product> = tables
            .products
            .values()
            .filter(|p| product_matches(p, filter))
            .cloned()
            .collect();
        match sort {
            ProductSort::Newest => matched.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id))),
            ProductSort::PriceAsc => matched.sort_by(|a, b| a.price.cmp(&b.price)),
            ProductSort::PriceDesc => matched.sort_by(|a, b| b.price.cmp(&a.price)),
            ProductSort::Rating => matched.sort_by(|a, b| b.rating_rate.total_cmp(&a.rating_rate)),
            ProductSort::StockAsc => matched.sort_by_key(|p| p.stock),
        }
        Ok(page(matched.into_iter(), skip, limit))
    }

    async fn count(&self, filter: &ProductFilter) -> Result<i64, AppError> {
        let tables = self.tables.lock().await;
        Ok(tables.products.values().filter(|p| product_matches(p, filter)).count() as i64)
    }

    async fn create(&self, new: NewProduct) -> Result<Product, AppError> {
        let mut tables = self.tables.lock().await;
        if !tables.users.contains_key(&new.owner_id) {
            return Err(AppError::NotFound("Owner not found".to_string()));
        }
        let now = Utc::now();
        let id = tables.next_id();
        let product = Product {
            id,
            title: new.title,
            price: new.price,
            category: new.category,
            description: new.description,
            image: new.image,
            stock: new.stock,
            rating_rate: 0.0,
            rating_count: 0,
            owner_id: Some(new.owner_id),
            features: Json(new.features),
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        tables.products.insert(id, product.clone());
        Ok(product)
    }

    async fn update(&self, id: i64, changes: ProductChanges) -> Result<Option<Product>, AppError> {
        let mut tables = self.tables.lock().await;
        let Some(product) = tables.products.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(v) = changes.title {
            product.title = v;
        }
        if let Some(v) = changes.price {
            product.price = v;
        }
        if let Some(v) = changes.category {
            product.category = v;
        }
        if let Some(v) = changes.description {
            product.description = v;
        }
        if let Some(v) = changes.image {
            product.image = v;
        }
        if let Some(v) = changes.stock {
            product.stock = v;
        }
        if let Some(v) = changes.features {
            product.features = Json(v);
        }
        if let Some(v) = changes.is_active {
            product.is_active = v;
        }
        product.updated_at = Utc::now();
        Ok(Some(product.clone()))
    }

    async fn delete(&self, id: i64) -> Result<bool, AppError> {
        self.trip(FailPoint::DeleteProduct).await?;
        Ok(self.tables.lock().await.products.remove(&id).is_some())
    }

    async fn increment_stock(&self, id: i64, delta: i32, op_key: &str) -> Result<StockAdjustment, AppError> {
        let mut tables = self.tables.lock().await;
        if tables.stock_ops.contains(op_key) {
            return Ok(StockAdjustment::AlreadyApplied);
        }
        let Some(product) = tables.products.get_mut(&id) else {
            return Ok(StockAdjustment::Missing);
        };
        let next = product.stock + delta;
        if next < 0 {
            return Ok(StockAdjustment::Insufficient {
                available: product.stock,
            });
        }
        product.stock = next;
        product.updated_at = Utc::now();
        tables.stock_ops.insert(op_key.to_string());
        Ok(StockAdjustment::Applied { stock: next })
    }

    async fn stock_op_applied(&self, op_key: &str) -> Result<bool, AppError> {
        Ok(self.tables.lock().await.stock_ops.contains(op_key))
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn create(&self, new: NewOrder) -> Result<Order, AppError> {
        self.trip(FailPoint::CreateOrder).await?;
        let mut tables = self.tables.lock().await;
        if tables.orders.values().any(|o| o.order_number == new.order_number) {
            return Err(AppError::Conflict("Duplicate value violates orders_order_number_key".to_string()));
        }
        if tables.orders.values().any(|o| o.saga_id.as_deref() == Some(new.saga_id.as_str())) {
            return Err(AppError::Conflict("Duplicate value violates orders_saga_id_key".to_string()));
        }
        let id = tables.next_id();
        let order = Order {
            id,
            user_id: new.user_id,
            order_number: new.order_number,
            items: new.items,
            shipping_address: new.shipping_address,
            payment_method: new.payment_method,
            payment_status: PaymentStatus::Pending,
            items_price: new.items_price,
            shipping_price: new.shipping_price,
            tax_price: new.tax_price,
            total_price: new.total_price,
            order_status: OrderStatus::Pending,
            shipping_details: Default::default(),
            notes: new.notes,
            saga_id: Some(new.saga_id),
            created_at: new.created_at,
            updated_at: new.created_at,
        };
        tables.orders.insert(id, order.clone());
        Ok(order)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Order>, AppError> {
        Ok(self.tables.lock().await.orders.get(&id).cloned())
    }

    async fn find_by_saga(&self, saga_id: &str) -> Result<Option<Order>, AppError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .orders
            .values()
            .find(|o| o.saga_id.as_deref() == Some(saga_id))
            .cloned())
    }

    async fn list(&self, filter: &OrderFilter, skip: i64, limit: i64) -> Result<Vec<Order>, AppError> {
        let tables = self.tables.lock().await;
        let mut matched: Vec<Order> = tables
            .orders
            .values()
            .filter(|o| order_matches(o, filter))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(page(matched.into_iter(), skip, limit))
    }

    async fn totals(&self, filter: &OrderFilter) -> Result<OrderTotals, AppError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .orders
            .values()
            .filter(|o| order_matches(o, filter))
            .fold(OrderTotals::default(), |acc, o| OrderTotals {
                count: acc.count + 1,
                revenue: acc.revenue + o.total_price,
            }))
    }

    async fn count_referencing_product(&self, product_id: i64) -> Result<i64, AppError> {
        let tables = self.tables.lock().await;
        Ok(tables.orders.values().filter(|o| o.references(product_id)).count() as i64)
    }

    async fn update_status(&self, id: i64, change: OrderStatusChange) -> Result<Option<Order>, AppError> {
        let mut tables = self.tables.lock().await;
        let Some(order) = tables.orders.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(v) = change.order_status {
            order.order_status = v;
        }
        if let Some(v) = change.payment_status {
            order.payment_status = v;
        }
        if let Some(v) = change.notes {
            order.notes = v;
        }
        if let Some(v) = change.shipping_details {
            order.shipping_details = v;
        }
        order.updated_at = Utc::now();
        Ok(Some(order.clone()))
    }
}

#[async_trait]
impl SagaStore for MemoryStore {
    async fn save(&self, saga: &Saga) -> Result<(), AppError> {
        let mut tables = self.tables.lock().await;
        tables.sagas.insert(saga.id().to_string(), saga.clone());
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Option<Saga>, AppError> {
        Ok(self.tables.lock().await.sagas.get(id).cloned())
    }

    async fn due(&self, now: DateTime<Utc>) -> Result<Vec<Saga>, AppError> {
        let tables = self.tables.lock().await;
        let mut due: Vec<Saga> = tables
            .sagas
            .values()
            .filter(|s| s.is_ready_for_retry(now))
            .cloned()
            .collect();
        due.sort_by_key(|s| s.meta().created_at);
        Ok(due)
    }

    async fn open_orders_for_product(&self, product_id: i64) -> Result<i64, AppError> {
        let tables = self.tables.lock().await;
        let open = tables
            .sagas
            .values()
            .filter(|s| match s {
                Saga::PlaceOrder(saga) => {
                    !saga.is_terminal() && saga.input.items.iter().any(|i| i.product_id == product_id)
                }
                Saga::DeleteProduct(_) => false,
            })
            .count();
        Ok(open as i64)
    }

    async fn prune(&self, before: DateTime<Utc>) -> Result<u64, AppError> {
        let mut tables = self.tables.lock().await;
        let expired: HashSet<String> = tables
            .sagas
            .values()
            .filter(|s| s.is_terminal() && s.meta().updated_at < before)
            .map(|s| s.id().to_string())
            .collect();
        if expired.is_empty() {
            return Ok(0);
        }

        tables.sagas.retain(|id, _| !expired.contains(id));
        // Keys are `<saga id>:<op>:<line>`.
        tables
            .stock_ops
            .retain(|key| !key.split_once(':').is_some_and(|(saga_id, _)| expired.contains(saga_id)));
        Ok(expired.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use secrecy::SecretString;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            name: "Ada".into(),
            email: email.into(),
            password: SecretString::from("secret1".to_string()),
            country: "UK".into(),
            contact: "+441234567890".into(),
            is_admin: false,
            is_active: true,
            email_verified: true,
            last_login: None,
        }
    }

    fn new_product(owner_id: i64, stock: i32) -> NewProduct {
        NewProduct {
            title: "Lamp".into(),
            price: Decimal::new(1999, 2),
            category: "home".into(),
            description: String::new(),
            image: String::new(),
            stock,
            owner_id,
            features: vec![],
        }
    }

    #[tokio::test]
    async fn reset_token_is_consumed_once() {
        let store = MemoryStore::default();
        let user = UserStore::create(&store, new_user("ada@example.com")).await.unwrap();
        let now = Utc::now();
        UserStore::update(
            &store,
            user.id,
            UserChanges {
                reset_token: Some(ResetTokenChange::Set {
                    token_hash: "digest".into(),
                    expires_at: now + chrono::Duration::minutes(5),
                    requested_at: now,
                    request_count: 1,
                }),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let clear = || UserChanges {
            reset_token: Some(ResetTokenChange::Clear),
            reset_requests: Some(0),
            ..Default::default()
        };

        let expired = store
            .consume_reset_token(user.id, "digest", now + chrono::Duration::minutes(6), clear())
            .await
            .unwrap();
        let wrong = store.consume_reset_token(user.id, "other", now, clear()).await.unwrap();
        let first = store.consume_reset_token(user.id, "digest", now, clear()).await.unwrap();
        let second = store.consume_reset_token(user.id, "digest", now, clear()).await.unwrap();

        assert!(expired.is_none());
        assert!(wrong.is_none());
        assert!(first.is_some_and(|u| u.reset_token_hash.is_none()));
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn email_is_unique_case_insensitively() {
        let store = MemoryStore::default();
        let user = UserStore::create(&store, new_user("Ada@Example.com")).await.unwrap();
        assert_eq!(user.email, "ada@example.com");
        assert_ne!(user.password_hash, "secret1");

        let err = UserStore::create(&store, new_user("ADA@example.COM")).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert!(UserStore::find_by_email(&store, "ada@EXAMPLE.com").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn keyed_stock_adjustments_are_idempotent_and_bounded() {
        let store = MemoryStore::default();
        let owner = UserStore::create(&store, new_user("o@example.com")).await.unwrap();
        let product = ProductStore::create(&store, new_product(owner.id, 5)).await.unwrap();

        assert_eq!(
            store.increment_stock(product.id, -3, "s:reserve:0").await.unwrap(),
            StockAdjustment::Applied { stock: 2 }
        );
        assert_eq!(
            store.increment_stock(product.id, -3, "s:reserve:0").await.unwrap(),
            StockAdjustment::AlreadyApplied
        );
        assert_eq!(
            store.increment_stock(product.id, -3, "t:reserve:0").await.unwrap(),
            StockAdjustment::Insufficient { available: 2 }
        );
        assert!(!store.stock_op_applied("t:reserve:0").await.unwrap());
        assert_eq!(
            store.increment_stock(999, -1, "u:reserve:0").await.unwrap(),
            StockAdjustment::Missing
        );
    }

    #[tokio::test]
    async fn injected_failures_fire_then_clear() {
        let store = MemoryStore::default();
        store.fail_next(FailPoint::PullCarts, 1).await;
        assert!(store.pull_from_all_carts(1).await.is_err());
        assert_eq!(store.pull_from_all_carts(1).await.unwrap(), 0);
    }
}
