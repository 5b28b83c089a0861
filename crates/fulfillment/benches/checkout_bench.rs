use std::time::Duration;

use common::{Money, UserId};
use criterion::{Criterion, criterion_group, criterion_main};
use domain::CartService;
use fulfillment::{CheckoutCoordinator, CheckoutRequest, RetryPolicy};
use store::{CatalogWrites, InMemoryStore, NewProduct, Store, Transaction};

fn bench_checkout(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryStore::new();
    let products = rt.block_on(async {
        let mut tx = store.begin().await.unwrap();
        let mut ids = Vec::new();
        for i in 0..5 {
            let product = tx
                .insert_product(NewProduct::new(
                    format!("Bench {i}"),
                    Money::from_cents(500 + i),
                    i64::MAX / 2,
                ))
                .await
                .unwrap();
            ids.push(product.id);
        }
        tx.commit().await.unwrap();
        ids
    });

    let carts = CartService::new(store.clone());
    let coordinator = CheckoutCoordinator::new(store, RetryPolicy::new(3, Duration::ZERO));
    let request = CheckoutRequest::new("PIX", "bench");
    let user = UserId::new(1);

    c.bench_function("checkout/fill_cart_and_checkout_5_lines", |b| {
        b.iter(|| {
            rt.block_on(async {
                for product_id in &products {
                    carts.add_item(user, *product_id, 2).await.unwrap();
                }
                coordinator.checkout(user, &request).await.unwrap();
            });
        });
    });
}

fn bench_empty_cart_rejection(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let coordinator = CheckoutCoordinator::new(InMemoryStore::new(), RetryPolicy::no_retry());
    let request = CheckoutRequest::new("PIX", "bench");

    c.bench_function("checkout/reject_empty_cart", |b| {
        b.iter(|| {
            rt.block_on(async {
                let _ = coordinator.checkout(UserId::new(2), &request).await;
            });
        });
    });
}

criterion_group!(benches, bench_checkout, bench_empty_cart_rejection);
criterion_main!(benches);
