// src/services/saga.rs

//! Background recovery for sagas that a request left unfinished.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use super::{catalog::CatalogService, clock::Clock, orders::OrderService};
use crate::{error::AppError, models::saga::Saga, store::SagaStore};

pub const DEFAULT_RETENTION: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// What one recovery pass did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryReport {
    pub attempted: usize,
    pub finished: usize,
    /// Finished sagas dropped for being older than the retention window.
    pub pruned: u64,
}

#[derive(Clone)]
pub struct SagaCoordinator {
    sagas: Arc<dyn SagaStore>,
    orders: OrderService,
    catalog: CatalogService,
    clock: Arc<dyn Clock>,
    retention: Duration,
}

impl SagaCoordinator {
    pub fn new(
        sagas: Arc<dyn SagaStore>,
        orders: OrderService,
        catalog: CatalogService,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            sagas,
            orders,
            catalog,
            clock,
            retention: DEFAULT_RETENTION,
        }
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Drives every due saga one attempt further. A saga that fails again is
    /// rescheduled by its own backoff, so one bad saga never stalls the rest.
    pub async fn run_once(&self) -> Result<RecoveryReport, AppError> {
        let due = self.sagas.due(self.clock.now()).await?;
        let mut report = RecoveryReport::default();

        for saga in due {
            report.attempted += 1;
            let saga_id = saga.id().to_string();
            let kind = saga.kind().as_str();

            let result = match saga {
                Saga::PlaceOrder(saga) => self.orders.resume(saga).await,
                Saga::DeleteProduct(mut saga) => self.catalog.run_cascade(&mut saga).await,
            };

            match result {
                Ok(()) => {
                    report.finished += 1;
                    tracing::info!(%saga_id, kind, "Saga recovered");
                }
                Err(e) => tracing::warn!(%saga_id, kind, "Saga recovery attempt failed: {}", e),
            }
        }

        let cutoff = self.clock.now() - chrono::Duration::from_std(self.retention).unwrap_or_default();
        match self.sagas.prune(cutoff).await {
            Ok(pruned) => report.pruned = pruned,
            Err(e) => tracing::warn!("Pruning finished sagas failed: {}", e),
        }
        Ok(report)
    }

    /// Polls forever on `interval`. The first tick fires immediately, which
    /// doubles as the startup recovery pass.
    pub fn start(self, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match self.run_once().await {
                    Ok(report) if report.attempted > 0 || report.pruned > 0 => {
                        tracing::info!(
                            attempted = report.attempted,
                            finished = report.finished,
                            pruned = report.pruned,
                            "Saga recovery pass"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!("Saga recovery pass failed: {}", e),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::{
            order::{OrderItem, PaymentMethod, ShippingAddress},
            product::{NewProduct, Product},
            saga::{IN_FLIGHT_LEASE, PlaceOrderInput, PlaceOrderSaga, PlaceOrderState},
            user::NewUser,
        },
        services::clock::ManualClock,
        store::{MemoryStore, ProductStore, UserStore},
    };
    use rust_decimal::Decimal;
    use secrecy::SecretString;

    async fn seed_mug(store: &MemoryStore) -> Product {
        let owner = UserStore::create(
            store,
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
        ProductStore::create(
            store,
            NewProduct {
                title: "Mug".into(),
                price: Decimal::new(900, 2),
                category: "kitchen".into(),
                description: String::new(),
                image: "https://img.example.com/mug.png".into(),
                stock: 5,
                owner_id: owner.id,
                features: vec![],
            },
        )
        .await
        .unwrap()
    }

    fn order_saga(id: &str, product: &Product, clock: &ManualClock) -> PlaceOrderSaga {
        PlaceOrderSaga::new(
            id.into(),
            PlaceOrderInput {
                user_id: product.owner_id.unwrap_or_default(),
                items: vec![OrderItem {
                    product_id: product.id,
                    name: "Mug".into(),
                    quantity: 2,
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
                items_price: Decimal::new(1800, 2),
                shipping_price: Decimal::ZERO,
                tax_price: Decimal::ZERO,
                total_price: Decimal::new(1800, 2),
                notes: String::new(),
            },
            clock.now(),
        )
    }

    fn coordinator(store: &MemoryStore, clock: Arc<ManualClock>) -> SagaCoordinator {
        let shared = Arc::new(store.clone());
        let orders = OrderService::new(
            shared.clone(),
            shared.clone(),
            shared.clone(),
            shared.clone(),
            clock.clone(),
        );
        let catalog = CatalogService::new(
            shared.clone(),
            shared.clone(),
            shared.clone(),
            shared.clone(),
            clock.clone(),
        );
        SagaCoordinator::new(shared, orders, catalog, clock)
    }

    #[tokio::test]
    async fn abandoned_order_saga_releases_stock() {
        let store = MemoryStore::default();
        let clock = Arc::new(ManualClock::default());
        let product = seed_mug(&store).await;

        let saga = order_saga("crashed", &product, &clock);
        // Reservation applied, then the process died before the order row.
        store
            .increment_stock(product.id, -2, &saga.reserve_key(0))
            .await
            .unwrap();
        store.save(&Saga::PlaceOrder(saga)).await.unwrap();
        let coordinator = coordinator(&store, clock.clone());

        // Still leased to the request that started it.
        assert_eq!(coordinator.run_once().await.unwrap().attempted, 0);

        clock.advance(chrono::Duration::from_std(IN_FLIGHT_LEASE).unwrap());
        let report = coordinator.run_once().await.unwrap();
        assert_eq!(
            report,
            RecoveryReport {
                attempted: 1,
                finished: 1,
                pruned: 0
            }
        );

        let restored = ProductStore::find_by_id(&store, product.id).await.unwrap().unwrap();
        assert_eq!(restored.stock, 5);
        let Some(Saga::PlaceOrder(saga)) = store.load("crashed").await.unwrap() else {
            panic!("saga missing");
        };
        assert!(matches!(saga.state, PlaceOrderState::Compensated { .. }));
    }

    #[tokio::test]
    async fn finished_sagas_are_pruned_after_retention() {
        let store = MemoryStore::default();
        let clock = Arc::new(ManualClock::default());
        let product = seed_mug(&store).await;
        let coordinator =
            coordinator(&store, clock.clone()).with_retention(Duration::from_secs(30 * 24 * 60 * 60));

        let mut old = order_saga("old", &product, &clock);
        store.increment_stock(product.id, -2, &old.reserve_key(0)).await.unwrap();
        old.transition(PlaceOrderState::Completed { order_id: 1 }, clock.now());
        store.save(&Saga::PlaceOrder(old.clone())).await.unwrap();

        clock.advance(chrono::Duration::days(29));
        let mut recent = order_saga("recent", &product, &clock);
        store.increment_stock(product.id, -1, &recent.reserve_key(0)).await.unwrap();
        recent.transition(PlaceOrderState::Completed { order_id: 2 }, clock.now());
        store.save(&Saga::PlaceOrder(recent.clone())).await.unwrap();

        assert_eq!(coordinator.run_once().await.unwrap().pruned, 0);

        clock.advance(chrono::Duration::days(2));
        let report = coordinator.run_once().await.unwrap();

        assert_eq!(report.attempted, 0);
        assert_eq!(report.pruned, 1);
        assert!(store.load("old").await.unwrap().is_none());
        assert!(!store.stock_op_applied(&old.reserve_key(0)).await.unwrap());
        assert!(store.load("recent").await.unwrap().is_some());
        assert!(store.stock_op_applied(&recent.reserve_key(0)).await.unwrap());
    }
}
