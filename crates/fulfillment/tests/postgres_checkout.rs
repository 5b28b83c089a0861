//! Checkout and order management against PostgreSQL.
//!
//! These tests use a shared PostgreSQL container. Run with:
//!
//! ```bash
//! cargo test -p fulfillment --test postgres_checkout
//! ```

use std::sync::Arc;
use std::time::Duration;

use common::{Money, OrderStatus, ProductId, UserId, Version};
use domain::{CartService, ErrorKind};
use fulfillment::{CheckoutCoordinator, CheckoutRequest, OrderService, RetryPolicy};
use futures_util::future::join_all;
use serial_test::serial;
use sqlx::PgPool;
use store::{CatalogWrites, NewProduct, PostgresStore, ProductCatalog, Store, Transaction};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            PostgresStore::new(temp_pool.clone())
                .run_migrations()
                .await
                .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

struct PgHarness {
    store: PostgresStore,
    carts: CartService<PostgresStore>,
    checkout: CheckoutCoordinator<PostgresStore>,
    orders: OrderService<PostgresStore>,
}

impl PgHarness {
    async fn new() -> Self {
        let info = get_container_info().await;
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(&info.connection_string)
            .await
            .unwrap();

        sqlx::query(
            "TRUNCATE TABLE order_items, orders, cart_items, carts, product_discounts, inventory, products RESTART IDENTITY",
        )
        .execute(&pool)
        .await
        .unwrap();

        let store = PostgresStore::new(pool);
        Self {
            carts: CartService::new(store.clone()),
            checkout: CheckoutCoordinator::new(
                store.clone(),
                RetryPolicy::new(3, Duration::from_millis(5)),
            ),
            orders: OrderService::new(store.clone()),
            store,
        }
    }

    async fn product(&self, price: Money, stock: i64) -> ProductId {
        let mut tx = self.store.begin().await.unwrap();
        let product = tx
            .insert_product(NewProduct::new("Item", price, stock))
            .await
            .unwrap();
        tx.commit().await.unwrap();
        product.id
    }

    async fn stock(&self, product_id: ProductId) -> (i64, Version) {
        let mut tx = self.store.begin().await.unwrap();
        let product = tx.get_product(product_id).await.unwrap().unwrap();
        (product.stock_quantity, product.version)
    }

    async fn count(&self, table: &str) -> i64 {
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(self.store.pool())
            .await
            .unwrap()
    }
}

fn request() -> CheckoutRequest {
    CheckoutRequest::new("CREDIT_CARD", "pay-ref")
}

#[tokio::test]
#[serial]
async fn checkout_commits_order_and_debits_stock() {
    let h = PgHarness::new().await;
    let user = UserId::new(1);
    let product = h.product(Money::from_units(10), 10).await;
    h.carts.add_item(user, product, 3).await.unwrap();

    let receipt = h.checkout.checkout(user, &request()).await.unwrap();

    assert_eq!(receipt.order.status, OrderStatus::Pending);
    assert_eq!(receipt.order.total_amount, Money::from_units(30));
    assert_eq!(receipt.lines.len(), 1);
    assert_eq!(h.stock(product).await, (7, Version::new(1)));
    assert!(h.carts.lines(user).await.unwrap().is_empty());

    let stored = h
        .orders
        .get_order_with_items(user, receipt.order.id)
        .await
        .unwrap();
    assert_eq!(stored.items, receipt.lines);
}

#[tokio::test]
#[serial]
async fn concurrent_checkouts_sell_the_last_unit_once() {
    let h = PgHarness::new().await;
    let product = h.product(Money::from_units(10), 1).await;

    let users: Vec<UserId> = (1..=4).map(UserId::new).collect();
    for user in &users {
        h.carts.add_item(*user, product, 1).await.unwrap();
    }

    let handles = users.iter().map(|user| {
        let checkout = h.checkout.clone();
        let user = *user;
        tokio::spawn(async move { checkout.checkout(user, &request()).await })
    });
    let results: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let successes = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1);
    for err in results.iter().filter_map(|r| r.as_ref().err()) {
        assert!(
            matches!(err.kind(), ErrorKind::InsufficientStock | ErrorKind::Conflict),
            "unexpected failure: {err}"
        );
    }

    assert_eq!(h.stock(product).await.0, 0);
    assert_eq!(h.count("orders").await, 1);
    assert_eq!(h.count("order_items").await, 1);
}

#[tokio::test]
#[serial]
async fn failing_line_rolls_back_the_whole_checkout() {
    let h = PgHarness::new().await;
    let user = UserId::new(2);
    let first = h.product(Money::from_units(10), 5).await;
    let short = h.product(Money::from_units(20), 1).await;
    let last = h.product(Money::from_units(30), 5).await;

    h.carts.add_item(user, first, 2).await.unwrap();
    h.carts.add_item(user, short, 2).await.unwrap();
    h.carts.add_item(user, last, 1).await.unwrap();

    let err = h.checkout.checkout(user, &request()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientStock);

    assert_eq!(h.stock(first).await, (5, Version::initial()));
    assert_eq!(h.stock(short).await, (1, Version::initial()));
    assert_eq!(h.stock(last).await, (5, Version::initial()));
    assert_eq!(h.count("orders").await, 0);
    assert_eq!(h.count("order_items").await, 0);

    let quantities: Vec<u32> = h
        .carts
        .lines(user)
        .await
        .unwrap()
        .iter()
        .map(|line| line.quantity)
        .collect();
    assert_eq!(quantities, vec![2, 2, 1]);
}

#[tokio::test]
#[serial]
async fn double_submitted_checkout_creates_one_order() {
    let h = PgHarness::new().await;
    let user = UserId::new(3);
    let product = h.product(Money::from_units(10), 10).await;
    h.carts.add_item(user, product, 2).await.unwrap();

    let handles = (0..2).map(|_| {
        let checkout = h.checkout.clone();
        tokio::spawn(async move { checkout.checkout(user, &request()).await })
    });
    let results: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let err = results.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert_eq!(err.kind(), ErrorKind::Validation);

    assert_eq!(h.stock(product).await, (8, Version::new(1)));
    assert_eq!(h.count("orders").await, 1);
}

#[tokio::test]
#[serial]
async fn concurrent_status_updates_reach_one_terminal_status() {
    let h = PgHarness::new().await;
    let user = UserId::new(4);
    let product = h.product(Money::from_units(10), 10).await;
    h.carts.add_item(user, product, 1).await.unwrap();
    let order_id = h.checkout.checkout(user, &request()).await.unwrap().order.id;

    let handles = ["COMPLETED", "CANCELLED"].into_iter().map(|status| {
        let orders = h.orders.clone();
        tokio::spawn(async move { orders.update_status(user, order_id, status).await })
    });
    let results: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let winners: Vec<OrderStatus> = results
        .iter()
        .filter_map(|r| r.as_ref().ok())
        .map(|order| order.status)
        .collect();
    assert_eq!(winners.len(), 1);
    let err = results.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert_eq!(err.kind(), ErrorKind::InvalidTransition);

    let stored = h.orders.get_order(user, order_id).await.unwrap();
    assert_eq!(stored.status, winners[0]);
    assert_eq!(h.stock(product).await.0, 9);
}
