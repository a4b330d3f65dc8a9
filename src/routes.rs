// src/routes.rs

use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware,
    routing::{get, patch, post, put},
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    handlers::{admin, auth, cart, orders, password, products},
    state::AppState,
    utils::jwt::{admin_middleware, auth_middleware},
};

/// Assembles the main application router.
///
/// * Public: auth, password reset, catalog.
/// * Authenticated: profile, listings, cart, wishlist, orders.
/// * Admin: everything under `/api/admin` except the admin login itself.
pub fn create_router(state: AppState) -> Router {
    let origins: Vec<HeaderValue> = [state.config.frontend_url.as_str(), "http://127.0.0.1:3000"]
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    let authenticated = middleware::from_fn_with_state(state.clone(), auth_middleware);

    let auth_routes = Router::new()
        .route("/signup", post(auth::signup))
        .route("/verify-otp", post(auth::verify_otp))
        .route("/resend-otp", post(auth::resend_otp))
        .route("/login", post(auth::login))
        // Protected profile routes
        .merge(
            Router::new()
                .route("/profile", get(auth::get_profile).patch(auth::update_profile))
                .layer(authenticated.clone()),
        );

    let password_routes = Router::new()
        .route("/forgot-password", post(password::forgot_password))
        .route("/reset-password", post(password::reset_password))
        .route("/cancel-reset", post(password::cancel_reset))
        .route("/verify-reset-token/{token}", get(password::verify_reset_token))
        .route("/status/{email}", get(password::reset_status));

    let product_routes = Router::new()
        .route("/", get(products::list_products))
        .route("/category/{category}", get(products::list_by_category))
        .route("/{id}", get(products::get_product));

    let listing_routes = Router::new()
        .route("/", get(products::my_listings).post(products::create_listing))
        .route(
            "/{id}",
            get(products::get_listing)
                .put(products::update_listing)
                .delete(products::delete_listing),
        )
        .route("/{id}/status", patch(products::set_listing_status))
        .layer(authenticated.clone());

    let cart_routes = Router::new()
        .route(
            "/",
            get(cart::get_cart).post(cart::add_to_cart).delete(cart::clear_cart),
        )
        .route(
            "/{product_id}",
            put(cart::update_cart_item).delete(cart::remove_cart_item),
        )
        .layer(authenticated.clone());

    let wishlist_routes = Router::new()
        .route("/", get(cart::get_wishlist).post(cart::add_to_wishlist))
        .route("/{product_id}", axum::routing::delete(cart::remove_from_wishlist))
        .layer(authenticated.clone());

    let order_routes = Router::new()
        .route("/", get(orders::my_orders).post(orders::place_order))
        .route("/{id}", get(orders::get_my_order))
        .layer(authenticated.clone());

    let admin_routes = Router::new()
        .route("/stats", get(admin::dashboard_stats))
        .route("/users", get(admin::list_users).post(admin::create_user))
        .route(
            "/users/{id}",
            get(admin::get_user)
                .put(admin::update_user)
                .delete(admin::delete_user),
        )
        .route("/products", get(admin::list_products).post(admin::create_product))
        .route("/products/low-stock", get(admin::low_stock))
        .route(
            "/products/{id}",
            get(admin::get_product)
                .put(admin::update_product)
                .delete(admin::delete_product),
        )
        .route("/orders", get(admin::list_orders).post(admin::create_order))
        .route(
            "/orders/{id}",
            get(admin::get_order).put(admin::update_order_status),
        )
        // Double middleware protection: Auth first, then Admin check
        .layer(middleware::from_fn(admin_middleware))
        .layer(authenticated)
        .route("/login", post(auth::admin_login));

    Router::new()
        .nest("/api/auth", auth_routes)
        .nest("/api/password", password_routes)
        .nest("/api/products", product_routes)
        .nest("/api/listings", listing_routes)
        .nest("/api/cart", cart_routes)
        .nest("/api/wishlist", wishlist_routes)
        .nest("/api/orders", order_routes)
        .nest("/api/admin", admin_routes)
        // Global Middleware (applied from outside in)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}
