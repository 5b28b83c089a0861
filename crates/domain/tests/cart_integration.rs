//! Cart and inventory behaviour under concurrent callers.

use common::{Money, ProductId, UserId};
use domain::{CartService, ErrorKind, InventoryLedger};
use futures_util::future::join_all;
use store::{CatalogWrites, InMemoryStore, NewProduct, Store, Transaction};

async fn seed(store: &InMemoryStore, price: i64, stock: i64) -> ProductId {
    let mut tx = store.begin().await.unwrap();
    let product = tx
        .insert_product(NewProduct::new("Mug", Money::from_units(price), stock))
        .await
        .unwrap();
    tx.commit().await.unwrap();
    product.id
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_adds_share_one_cart() {
    let store = InMemoryStore::new();
    let product_id = seed(&store, 12, 100).await;
    let service = CartService::new(store);
    let user = UserId::new(11);

    let tasks = (0..20).map(|_| {
        let service = service.clone();
        tokio::spawn(async move { service.add_item(user, product_id, 1).await })
    });
    for result in join_all(tasks).await {
        result.unwrap().unwrap();
    }

    let lines = service.lines(user).await.unwrap();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].quantity, 20);
    assert_eq!(service.total(user).await.unwrap(), Money::from_units(240));

    let cart_id = service.ensure_cart(user).await.unwrap();
    assert_eq!(lines[0].cart_id, cart_id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_restocks_all_land() {
    let store = InMemoryStore::new();
    let product_id = seed(&store, 5, 0).await;
    let ledger = InventoryLedger::new(3);

    let tasks = (0..10).map(|_| {
        let store = store.clone();
        tokio::spawn(async move { ledger.restock(&store, product_id, 2).await })
    });
    for result in join_all(tasks).await {
        result.unwrap().unwrap();
    }

    let row = store.inventory(product_id).await.unwrap();
    assert_eq!(row.stock_quantity, 20);
    assert_eq!(row.version.as_i64(), 10);
}

#[tokio::test]
async fn cart_operations_survive_a_failed_add() {
    let store = InMemoryStore::new();
    let in_stock = seed(&store, 10, 3).await;
    let sold_out = seed(&store, 10, 0).await;
    let service = CartService::new(store);
    let user = UserId::new(3);

    service.add_item(user, in_stock, 2).await.unwrap();
    let err = service.add_item(user, sold_out, 1).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let lines = service.lines(user).await.unwrap();
    assert_eq!(lines.len(), 1);
    assert_eq!(service.total(user).await.unwrap(), Money::from_units(20));
}
