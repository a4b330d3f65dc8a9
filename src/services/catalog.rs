// src/services/catalog.rs

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use super::{Page, PageWindow, clock::Clock};
use crate::{
    error::AppError,
    models::{
        product::{
            CreateProductRequest, NewProduct, Product, ProductChanges, ProductFilter, ProductListParams,
            ProductSort, PublicProduct, UpdateProductRequest,
        },
        saga::{DeleteProductInput, DeleteProductSaga, DeleteProductState, Saga},
        user::ListingStatus,
    },
    store::{OrderStore, ProductStore, SagaStore, UserStore},
    utils::{html::clean_html, jwt::AuthUser},
};

pub const DEFAULT_LOW_STOCK_THRESHOLD: i32 = 10;
const LOW_STOCK_REPORT_LIMIT: i64 = 100;

/// How a delete request was honoured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductRemoval {
    /// Orders reference the product, so it was only hidden.
    Deactivated,
    Deleted,
}

/// A listing joined with its product. The product may be gone if a cascade
/// stopped part way.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingView {
    pub product_id: i64,
    pub status: ListingStatus,
    pub created_at: DateTime<Utc>,
    pub available: bool,
    pub product: Option<PublicProduct>,
}

#[derive(Clone)]
pub struct CatalogService {
    users: Arc<dyn UserStore>,
    products: Arc<dyn ProductStore>,
    orders: Arc<dyn OrderStore>,
    sagas: Arc<dyn SagaStore>,
    clock: Arc<dyn Clock>,
}

impl CatalogService {
    pub fn new(
        users: Arc<dyn UserStore>,
        products: Arc<dyn ProductStore>,
        orders: Arc<dyn OrderStore>,
        sagas: Arc<dyn SagaStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            users,
            products,
            orders,
            sagas,
            clock,
        }
    }

    // ------------------------------------------------------------------
    // Public catalog
    // ------------------------------------------------------------------

    /// Active products only.
    pub async fn list_public(&self, params: &ProductListParams) -> Result<Page<PublicProduct>, AppError> {
        let mut filter = filter_from(params)?;
        filter.active = Some(true);
        self.page(&filter, params).await
    }

    pub async fn list_by_category(
        &self,
        category: &str,
        params: &ProductListParams,
    ) -> Result<Page<PublicProduct>, AppError> {
        let mut filter = filter_from(params)?;
        filter.active = Some(true);
        filter.category = Some(category.to_string());
        self.page(&filter, params).await
    }

    /// Hidden products look missing to the public.
    pub async fn get_public(&self, id: i64) -> Result<Product, AppError> {
        self.products
            .find_by_id(id)
            .await?
            .filter(|p| p.is_active)
            .ok_or(AppError::ProductNotFound(id))
    }

    /// Admin view: includes hidden products; `status` narrows to one side.
    pub async fn list_all(&self, params: &ProductListParams) -> Result<Page<PublicProduct>, AppError> {
        let mut filter = filter_from(params)?;
        filter.active = match params.status.as_deref() {
            None | Some("") | Some("all") => None,
            Some("active") => Some(true),
            Some("inactive") => Some(false),
            Some(other) => {
                return Err(AppError::Validation(format!("Unknown status filter '{}'", other)));
            }
        };
        self.page(&filter, params).await
    }

    /// Active products with stock strictly below `threshold`, emptiest first.
    pub async fn low_stock(&self, threshold: Option<i32>) -> Result<Vec<PublicProduct>, AppError> {
        let filter = ProductFilter {
            active: Some(true),
            stock_below: Some(threshold.unwrap_or(DEFAULT_LOW_STOCK_THRESHOLD)),
            ..Default::default()
        };
        let products = self
            .products
            .find(&filter, ProductSort::StockAsc, 0, LOW_STOCK_REPORT_LIMIT)
            .await?;
        Ok(products.iter().map(PublicProduct::from).collect())
    }

    async fn page(
        &self,
        filter: &ProductFilter,
        params: &ProductListParams,
    ) -> Result<Page<PublicProduct>, AppError> {
        let window = PageWindow::new(params.page, params.limit);
        let sort = params.sort.unwrap_or_default();
        let products = self
            .products
            .find(filter, sort, window.skip(), window.limit())
            .await?;
        let total = self.products.count(filter).await?;
        Ok(window.wrap(products.iter().map(PublicProduct::from).collect(), total))
    }

    // ------------------------------------------------------------------
    // Listings
    // ------------------------------------------------------------------

    /// Creates a product owned by `owner_id` and records it in their listings.
    pub async fn create_listing(&self, owner_id: i64, req: CreateProductRequest) -> Result<Product, AppError> {
        if req.price < Decimal::ZERO {
            return Err(AppError::Validation("Price cannot be negative".to_string()));
        }
        self.users
            .find_by_id(owner_id)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

        let product = self
            .products
            .create(NewProduct {
                title: req.title.trim().to_string(),
                price: req.price,
                category: req.category.trim().to_string(),
                description: clean_html(&req.description),
                image: req.image,
                stock: req.stock,
                owner_id,
                features: req.features,
            })
            .await?;

        if let Err(e) = self.users.add_listing(owner_id, product.id).await {
            tracing::error!(product_id = product.id, "Failed to record listing: {}", e);
            if let Err(cleanup) = self.products.delete(product.id).await {
                tracing::error!(product_id = product.id, "Failed to remove unlisted product: {}", cleanup);
            }
            return Err(e);
        }

        tracing::info!(product_id = product.id, owner_id, "Listing created");
        Ok(product)
    }

    pub async fn my_listings(&self, user_id: i64) -> Result<Vec<ListingView>, AppError> {
        let listings = self.users.listings(user_id).await?;
        let mut views = Vec::with_capacity(listings.len());
        for listing in listings {
            let product = self.products.find_by_id(listing.product_id).await?;
            views.push(ListingView {
                product_id: listing.product_id,
                status: listing.status,
                created_at: listing.created_at,
                available: product.as_ref().is_some_and(|p| p.is_active),
                product: product.as_ref().map(PublicProduct::from),
            });
        }
        Ok(views)
    }

    /// The owner or an admin may see a listing, hidden or not.
    pub async fn get_listing(&self, actor: &AuthUser, id: i64) -> Result<Product, AppError> {
        self.owned_product(actor, id).await
    }

    pub async fn update_product(
        &self,
        actor: &AuthUser,
        id: i64,
        req: UpdateProductRequest,
    ) -> Result<Product, AppError> {
        self.owned_product(actor, id).await?;

        if req.price.is_some_and(|p| p < Decimal::ZERO) {
            return Err(AppError::Validation("Price cannot be negative".to_string()));
        }

        let changes = ProductChanges {
            title: req.title.map(|t| t.trim().to_string()),
            price: req.price,
            category: req.category.map(|c| c.trim().to_string()),
            description: req.description.as_deref().map(clean_html),
            image: req.image,
            stock: req.stock,
            features: req.features,
            is_active: req.is_active,
        };
        if changes.is_empty() {
            return Err(AppError::Validation("No valid fields to update".to_string()));
        }

        let product = self
            .products
            .update(id, changes)
            .await?
            .ok_or(AppError::ProductNotFound(id))?;
        tracing::info!(product_id = id, actor = actor.id, "Product updated");
        Ok(product)
    }

    pub async fn set_listing_status(
        &self,
        user_id: i64,
        product_id: i64,
        status: ListingStatus,
    ) -> Result<(), AppError> {
        if !self.users.set_listing_status(user_id, product_id, status).await? {
            return Err(AppError::NotFound("Listing not found".to_string()));
        }
        Ok(())
    }

    /// Owner (or admin) delete; same rules as [`Self::delete_product`].
    pub async fn delete_listing(&self, actor: &AuthUser, id: i64) -> Result<ProductRemoval, AppError> {
        self.owned_product(actor, id).await?;
        self.delete_product(id).await
    }

    async fn owned_product(&self, actor: &AuthUser, id: i64) -> Result<Product, AppError> {
        let product = self
            .products
            .find_by_id(id)
            .await?
            .ok_or(AppError::ProductNotFound(id))?;
        if !actor.is_admin && product.owner_id != Some(actor.id) {
            return Err(AppError::Forbidden(
                "You can only manage your own listings".to_string(),
            ));
        }
        Ok(product)
    }

    // ------------------------------------------------------------------
    // Deletion cascade
    // ------------------------------------------------------------------

    /// Soft-deletes a product that orders still reference; otherwise removes
    /// it and pulls every reference to it through a cascade saga.
    pub async fn delete_product(&self, id: i64) -> Result<ProductRemoval, AppError> {
        let product = self
            .products
            .find_by_id(id)
            .await?
            .ok_or(AppError::ProductNotFound(id))?;

        // An order saga still in flight may write its order row after this
        // check, so it counts as a reference too.
        let referencing = self.orders.count_referencing_product(id).await?
            + self.sagas.open_orders_for_product(id).await?;
        if referencing > 0 {
            self.products
                .update(
                    id,
                    ProductChanges {
                        is_active: Some(false),
                        ..Default::default()
                    },
                )
                .await?;
            tracing::info!(product_id = id, orders = referencing, "Product deactivated");
            return Ok(ProductRemoval::Deactivated);
        }

        let mut saga = DeleteProductSaga::new(
            Uuid::new_v4().to_string(),
            DeleteProductInput {
                product_id: id,
                owner_id: product.owner_id,
            },
            self.clock.now(),
        );
        self.save(&saga).await?;

        if let Err(e) = self.run_cascade(&mut saga).await {
            return Err(AppError::PartialCascade {
                saga_id: saga.meta.id.clone(),
                completed: saga.state.completed_steps(),
                detail: e.to_string(),
            });
        }

        tracing::info!(product_id = id, saga_id = %saga.meta.id, "Product deleted");
        Ok(ProductRemoval::Deleted)
    }

    /// Runs the remaining cascade steps in order, saving after each one.
    /// Stops at the first failure, which is recorded on the saga with a
    /// backoff for the coordinator.
    pub async fn run_cascade(&self, saga: &mut DeleteProductSaga) -> Result<(), AppError> {
        while let Some(step) = saga.next_step() {
            let next = match self.cascade_step(saga, step).await {
                Ok(next) => next,
                Err(e) => {
                    tracing::warn!(saga_id = %saga.meta.id, step, "Cascade step failed: {}", e);
                    saga.fail(step, e.to_string(), self.clock.now());
                    if let Err(save_err) = self.save(saga).await {
                        tracing::error!(saga_id = %saga.meta.id, "Failed to record cascade saga: {}", save_err);
                    }
                    return Err(e);
                }
            };
            saga.transition(next, self.clock.now());
            self.save(saga).await?;
        }
        Ok(())
    }

    async fn cascade_step(&self, saga: &DeleteProductSaga, step: u8) -> Result<DeleteProductState, AppError> {
        let product_id = saga.input.product_id;
        match step {
            0 => {
                self.products.delete(product_id).await?;
                Ok(DeleteProductState::ProductRemoved)
            }
            1 => {
                if let Some(owner_id) = saga.input.owner_id {
                    self.users.remove_listing(owner_id, product_id).await?;
                }
                Ok(DeleteProductState::ListingsPulled)
            }
            2 => {
                let touched = self.users.pull_from_all_carts(product_id).await?;
                tracing::debug!(product_id, touched, "Pulled from carts");
                Ok(DeleteProductState::CartsPulled)
            }
            _ => {
                let touched = self.users.pull_from_all_wishlists(product_id).await?;
                tracing::debug!(product_id, touched, "Pulled from wishlists");
                Ok(DeleteProductState::Completed)
            }
        }
    }

    async fn save(&self, saga: &DeleteProductSaga) -> Result<(), AppError> {
        self.sagas.save(&Saga::DeleteProduct(saga.clone())).await
    }
}

fn filter_from(params: &ProductListParams) -> Result<ProductFilter, AppError> {
    if let (Some(min), Some(max)) = (params.min_price, params.max_price) {
        if min > max {
            return Err(AppError::Validation(
                "minPrice cannot be greater than maxPrice".to_string(),
            ));
        }
    }
    Ok(ProductFilter {
        category: params.category.clone().filter(|c| !c.trim().is_empty()),
        search: params.search.clone().filter(|s| !s.trim().is_empty()),
        min_price: params.min_price,
        max_price: params.max_price,
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::{
            order::{NewOrder, OrderItem, PaymentMethod, ShippingAddress},
            saga::{PlaceOrderInput, PlaceOrderSaga, PlaceOrderState},
            user::NewUser,
        },
        services::clock::SystemClock,
        store::{MemoryStore, memory::FailPoint},
    };
    use secrecy::SecretString;

    async fn fixture() -> (MemoryStore, CatalogService, i64) {
        let store = MemoryStore::default();
        let owner = UserStore::create(
            &store,
            NewUser {
                name: "Seller".into(),
                email: "seller@example.com".into(),
                password: SecretString::from("secret1".to_string()),
                country: "US".into(),
                contact: "5550101234".into(),
                is_admin: false,
                is_active: true,
                email_verified: true,
                last_login: None,
            },
        )
        .await
        .unwrap();
        let shared = Arc::new(store.clone());
        let service = CatalogService::new(
            shared.clone(),
            shared.clone(),
            shared.clone(),
            shared,
            Arc::new(SystemClock),
        );
        (store, service, owner.id)
    }

    fn lamp() -> CreateProductRequest {
        CreateProductRequest {
            title: "Desk Lamp".into(),
            price: Decimal::new(2500, 2),
            category: "home".into(),
            description: "<b>Bright</b><script>x()</script>".into(),
            image: "https://img.example.com/lamp.png".into(),
            stock: 4,
            features: vec!["LED".into()],
        }
    }

    #[tokio::test]
    async fn listing_is_sanitized_and_recorded() {
        let (store, service, owner) = fixture().await;
        let product = service.create_listing(owner, lamp()).await.unwrap();
        assert_eq!(product.description, "<b>Bright</b>");

        let listings = store.listings(owner).await.unwrap();
        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].status, ListingStatus::Active);
    }

    #[tokio::test]
    async fn referenced_product_is_only_deactivated() {
        let (store, service, owner) = fixture().await;
        let product = service.create_listing(owner, lamp()).await.unwrap();
        OrderStore::create(
            &store,
            NewOrder {
                user_id: owner,
                order_number: "ORD-20240101-00001".into(),
                items: vec![OrderItem {
                    product_id: product.id,
                    name: product.title.clone(),
                    quantity: 1,
                    price: product.price,
                    image: product.image.clone(),
                }],
                shipping_address: ShippingAddress {
                    full_name: "A".into(),
                    address: "1 Road".into(),
                    city: "Town".into(),
                    postal_code: "12345".into(),
                    country: "US".into(),
                    phone: "5550101234".into(),
                    email: "a@example.com".into(),
                },
                payment_method: PaymentMethod::Cod,
                items_price: product.price,
                shipping_price: Decimal::ZERO,
                tax_price: Decimal::ZERO,
                total_price: product.price,
                notes: String::new(),
                saga_id: "order-saga".into(),
                created_at: Utc::now(),
            },
        )
        .await
        .unwrap();

        assert_eq!(
            service.delete_product(product.id).await.unwrap(),
            ProductRemoval::Deactivated
        );
        let kept = ProductStore::find_by_id(&store, product.id).await.unwrap().unwrap();
        assert!(!kept.is_active);
        assert_eq!(store.listings(owner).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn product_held_by_open_order_saga_is_only_deactivated() {
        let (store, service, owner) = fixture().await;
        let product = service.create_listing(owner, lamp()).await.unwrap();
        let mut saga = PlaceOrderSaga::new(
            "in-flight".into(),
            PlaceOrderInput {
                user_id: owner,
                items: vec![OrderItem {
                    product_id: product.id,
                    name: product.title.clone(),
                    quantity: 1,
                    price: product.price,
                    image: product.image.clone(),
                }],
                shipping_address: ShippingAddress {
                    full_name: "A".into(),
                    address: "1 Road".into(),
                    city: "Town".into(),
                    postal_code: "12345".into(),
                    country: "US".into(),
                    phone: "5550101234".into(),
                    email: "a@example.com".into(),
                },
                payment_method: PaymentMethod::Cod,
                items_price: product.price,
                shipping_price: Decimal::ZERO,
                tax_price: Decimal::ZERO,
                total_price: product.price,
                notes: String::new(),
            },
            Utc::now(),
        );
        saga.transition(PlaceOrderState::StockReserved, Utc::now());
        store.save(&Saga::PlaceOrder(saga.clone())).await.unwrap();

        assert_eq!(
            service.delete_product(product.id).await.unwrap(),
            ProductRemoval::Deactivated
        );
        assert!(ProductStore::find_by_id(&store, product.id).await.unwrap().is_some());

        // Once the saga settles nothing holds the product any more.
        saga.transition(
            PlaceOrderState::Compensated {
                step: PlaceOrderSaga::STEP_CREATE_ORDER,
                reason: "cancelled".into(),
            },
            Utc::now(),
        );
        store.save(&Saga::PlaceOrder(saga)).await.unwrap();
        assert_eq!(
            service.delete_product(product.id).await.unwrap(),
            ProductRemoval::Deleted
        );
    }

    #[tokio::test]
    async fn failed_step_resumes_where_it_stopped() {
        let (store, service, owner) = fixture().await;
        let product = service.create_listing(owner, lamp()).await.unwrap();
        store.add_to_cart(owner, product.id, 1).await.unwrap();
        store.fail_next(FailPoint::PullCarts, 1).await;

        let err = service.delete_product(product.id).await.unwrap_err();
        let AppError::PartialCascade { saga_id, completed, .. } = err else {
            panic!("expected partial cascade, got {:?}", err);
        };
        assert_eq!(completed, ["product_removed", "listings_pulled"]);
        assert_eq!(store.cart(owner).await.unwrap().len(), 1);

        let Some(Saga::DeleteProduct(mut saga)) = store.load(&saga_id).await.unwrap() else {
            panic!("saga not persisted");
        };
        service.run_cascade(&mut saga).await.unwrap();
        assert_eq!(saga.state, DeleteProductState::Completed);
        assert!(store.cart(owner).await.unwrap().is_empty());
    }
}
