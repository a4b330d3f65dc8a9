// src/state.rs

use std::sync::Arc;

use axum::extract::FromRef;

use crate::{
    config::Config,
    services::{
        accounts::AccountService,
        admin::AdminService,
        cart::CartService,
        catalog::CatalogService,
        clock::Clock,
        notifier::Notifier,
        orders::OrderService,
        password::PasswordResetService,
        registration::RegistrationCache,
        saga::SagaCoordinator,
    },
    store::Stores,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub stores: Stores,
    pub accounts: AccountService,
    pub passwords: PasswordResetService,
    pub catalog: CatalogService,
    pub cart: CartService,
    pub orders: OrderService,
    pub admin: AdminService,
}

impl AppState {
    /// Wires every service over the same stores, clock and notifier.
    pub fn new(
        config: Config,
        stores: Stores,
        registrations: Arc<dyn RegistrationCache>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let config = Arc::new(config);
        let accounts = AccountService::new(
            stores.users.clone(),
            registrations,
            notifier.clone(),
            clock.clone(),
            config.clone(),
        );
        let passwords = PasswordResetService::new(
            stores.users.clone(),
            notifier,
            clock.clone(),
            config.clone(),
        );
        let catalog = CatalogService::new(
            stores.users.clone(),
            stores.products.clone(),
            stores.orders.clone(),
            stores.sagas.clone(),
            clock.clone(),
        );
        let cart = CartService::new(stores.users.clone(), stores.products.clone());
        let orders = OrderService::new(
            stores.users.clone(),
            stores.products.clone(),
            stores.orders.clone(),
            stores.sagas.clone(),
            clock.clone(),
        );
        let admin = AdminService::new(
            stores.users.clone(),
            stores.products.clone(),
            stores.orders.clone(),
            clock,
        );

        Self {
            config,
            stores,
            accounts,
            passwords,
            catalog,
            cart,
            orders,
            admin,
        }
    }

    pub fn saga_coordinator(&self, clock: Arc<dyn Clock>) -> SagaCoordinator {
        SagaCoordinator::new(
            self.stores.sagas.clone(),
            self.orders.clone(),
            self.catalog.clone(),
            clock,
        )
        .with_retention(self.config.saga_retention)
    }
}

impl FromRef<AppState> for Arc<Config> {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}

impl FromRef<AppState> for AccountService {
    fn from_ref(state: &AppState) -> Self {
        state.accounts.clone()
    }
}

impl FromRef<AppState> for PasswordResetService {
    fn from_ref(state: &AppState) -> Self {
        state.passwords.clone()
    }
}

impl FromRef<AppState> for CatalogService {
    fn from_ref(state: &AppState) -> Self {
        state.catalog.clone()
    }
}

impl FromRef<AppState> for CartService {
    fn from_ref(state: &AppState) -> Self {
        state.cart.clone()
    }
}

impl FromRef<AppState> for OrderService {
    fn from_ref(state: &AppState) -> Self {
        state.orders.clone()
    }
}

impl FromRef<AppState> for AdminService {
    fn from_ref(state: &AppState) -> Self {
        state.admin.clone()
    }
}
