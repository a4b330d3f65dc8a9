// src/lib.rs

//! ShopEasy storefront API: accounts, catalog, cart, orders and admin tools.

pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
pub mod store;
pub mod utils;

pub use routes::create_router;
pub use state::AppState;
