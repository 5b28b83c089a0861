//! HTTP API server with observability for the order-fulfillment pipeline.
//!
//! Provides REST endpoints for the cart, checkout and order management,
//! with structured logging (tracing) and Prometheus metrics.

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, patch, post};
use chrono::{Duration, Utc};
use common::Money;
use domain::CartService;
use fulfillment::{CheckoutCoordinator, OrderService, RetryPolicy};
use metrics_exporter_prometheus::PrometheusHandle;
use store::{CatalogWrites, NewDiscount, NewProduct, ProductRecord, Store, Transaction};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state accessible from all handlers.
pub struct AppState<S: Store> {
    pub carts: CartService<S>,
    pub checkout: CheckoutCoordinator<S>,
    pub orders: OrderService<S>,
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: Store + Clone + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route(
            "/cart",
            post(routes::cart::ensure::<S>).delete(routes::cart::clear::<S>),
        )
        .route("/cart/items", get(routes::cart::lines::<S>))
        .route(
            "/cart/items/{product_id}",
            post(routes::cart::add_item::<S>).delete(routes::cart::remove_one_unit::<S>),
        )
        .route(
            "/cart/items/{product_id}/remove",
            delete(routes::cart::remove_line::<S>),
        )
        .route("/cart/total", get(routes::cart::total::<S>))
        .route(
            "/orders",
            post(routes::orders::checkout::<S>).get(routes::orders::list::<S>),
        )
        .route("/orders/{id}", get(routes::orders::get::<S>))
        .route("/orders/{id}/status", patch(routes::orders::update_status::<S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the default application state, with every service sharing `store`.
pub fn create_default_state<S: Store + Clone + 'static>(
    store: S,
    retry: RetryPolicy,
) -> Arc<AppState<S>> {
    Arc::new(AppState {
        carts: CartService::new(store.clone()),
        checkout: CheckoutCoordinator::new(store.clone(), retry),
        orders: OrderService::new(store),
    })
}

/// Populates an empty store with a small catalog for local runs.
///
/// The second product carries a 20% discount valid for the next 30 days.
pub async fn seed_demo_catalog<S: Store>(store: &S) -> store::Result<Vec<ProductRecord>> {
    let mut tx = store.begin().await?;

    let mut products = Vec::new();
    for product in [
        NewProduct::new("Espresso beans 1kg", Money::from_units(24), 40)
            .with_image("https://img.example.com/espresso.jpg"),
        NewProduct::new("Pour-over kettle", Money::from_units(55), 10),
        NewProduct::new("Paper filters (100)", Money::from_cents(650), 200),
    ] {
        products.push(tx.insert_product(product).await?);
    }

    let now = Utc::now();
    tx.insert_discount(NewDiscount {
        product_id: products[1].id,
        percent: 20.0,
        starts_at: now,
        ends_at: now + Duration::days(30),
    })
    .await?;

    tx.commit().await?;
    tracing::info!(products = products.len(), "demo catalog seeded");
    Ok(products)
}
