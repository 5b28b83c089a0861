use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CartId, OrderId, OrderStatus, ProductId, UserId, Version};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{
    Result, StoreError,
    records::{
        CartLineRecord, CartRecord, DiscountRecord, InventoryRecord, NewDiscount, NewOrder,
        NewProduct, OrderLineRecord, OrderRecord, ProductRecord,
    },
    store::{CartRows, CatalogWrites, InventoryRows, OrderRows, ProductCatalog, Store, Transaction},
};

#[derive(Debug, Clone)]
struct ProductRow {
    title: String,
    image_url: Option<String>,
    base_price: common::Money,
}

#[derive(Debug, Clone, Default)]
struct Tables {
    products: BTreeMap<ProductId, ProductRow>,
    inventory: BTreeMap<ProductId, InventoryRecord>,
    discounts: Vec<DiscountRecord>,
    carts: HashMap<UserId, CartRecord>,
    cart_lines: HashMap<CartId, BTreeMap<ProductId, CartLineRecord>>,
    orders: HashMap<OrderId, OrderRecord>,
    order_lines: HashMap<OrderId, BTreeMap<ProductId, OrderLineRecord>>,
    next_product_id: i64,
    next_discount_id: i64,
}

/// In-memory store implementation for testing and local runs.
///
/// A transaction holds the store-wide lock for its whole lifetime and works
/// on a private copy of the tables, which replaces the shared tables on
/// commit. Transactions are therefore fully serialised.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<Mutex<Tables>>,
    injected_conflicts: Arc<Mutex<HashMap<ProductId, u32>>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` version-gated inventory writes for `product_id`
    /// report zero rows affected, as if a concurrent writer had won the race.
    pub async fn inject_conflicts(&self, product_id: ProductId, count: u32) {
        self.injected_conflicts
            .lock()
            .await
            .insert(product_id, count);
    }

    /// Returns how many injected conflicts are still pending for a product.
    pub async fn pending_conflicts(&self, product_id: ProductId) -> u32 {
        self.injected_conflicts
            .lock()
            .await
            .get(&product_id)
            .copied()
            .unwrap_or(0)
    }

    /// Returns the committed inventory row for a product.
    pub async fn inventory(&self, product_id: ProductId) -> Option<InventoryRecord> {
        self.tables.lock().await.inventory.get(&product_id).copied()
    }

    /// Returns the total number of committed orders.
    pub async fn order_count(&self) -> usize {
        self.tables.lock().await.orders.len()
    }

    /// Returns the total number of committed order lines.
    pub async fn order_line_count(&self) -> usize {
        self.tables
            .lock()
            .await
            .order_lines
            .values()
            .map(BTreeMap::len)
            .sum()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    type Tx = InMemoryTransaction;

    async fn begin(&self) -> Result<InMemoryTransaction> {
        let guard = self.tables.clone().lock_owned().await;
        let working = guard.clone();
        Ok(InMemoryTransaction {
            guard,
            working,
            injected_conflicts: self.injected_conflicts.clone(),
        })
    }
}

/// A transaction over an [`InMemoryStore`].
pub struct InMemoryTransaction {
    guard: OwnedMutexGuard<Tables>,
    working: Tables,
    injected_conflicts: Arc<Mutex<HashMap<ProductId, u32>>>,
}

impl InMemoryTransaction {
    async fn take_injected_conflict(&self, product_id: ProductId) -> bool {
        let mut conflicts = self.injected_conflicts.lock().await;
        match conflicts.get_mut(&product_id) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    fn product_record(&self, product_id: ProductId) -> Option<ProductRecord> {
        let row = self.working.products.get(&product_id)?;
        let inventory = self.working.inventory.get(&product_id)?;
        Some(ProductRecord {
            id: product_id,
            title: row.title.clone(),
            image_url: row.image_url.clone(),
            base_price: row.base_price,
            stock_quantity: inventory.stock_quantity,
            version: inventory.version,
        })
    }
}

#[async_trait]
impl Transaction for InMemoryTransaction {
    async fn commit(mut self) -> Result<()> {
        *self.guard = self.working;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl ProductCatalog for InMemoryTransaction {
    async fn get_product(&mut self, product_id: ProductId) -> Result<Option<ProductRecord>> {
        Ok(self.product_record(product_id))
    }

    async fn active_discounts(
        &mut self,
        product_id: ProductId,
        now: DateTime<Utc>,
    ) -> Result<Vec<DiscountRecord>> {
        Ok(self
            .working
            .discounts
            .iter()
            .filter(|d| d.product_id == product_id && d.is_active_at(now))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CatalogWrites for InMemoryTransaction {
    async fn insert_product(&mut self, product: NewProduct) -> Result<ProductRecord> {
        if product.initial_stock < 0 {
            return Err(StoreError::Constraint(
                "inventory.stock_quantity must not be negative".to_string(),
            ));
        }

        self.working.next_product_id += 1;
        let product_id = ProductId::new(self.working.next_product_id);
        self.working.products.insert(
            product_id,
            ProductRow {
                title: product.title,
                image_url: product.image_url,
                base_price: product.base_price,
            },
        );
        self.working.inventory.insert(
            product_id,
            InventoryRecord {
                product_id,
                stock_quantity: product.initial_stock,
                version: Version::initial(),
            },
        );

        self.product_record(product_id).ok_or_else(|| {
            StoreError::Constraint(format!("product {product_id} vanished after insert"))
        })
    }

    async fn insert_discount(&mut self, discount: NewDiscount) -> Result<DiscountRecord> {
        if !self.working.products.contains_key(&discount.product_id) {
            return Err(StoreError::Constraint(format!(
                "product_discounts.product_id references unknown product {}",
                discount.product_id
            )));
        }

        self.working.next_discount_id += 1;
        let record = DiscountRecord {
            id: self.working.next_discount_id,
            product_id: discount.product_id,
            percent: discount.percent,
            starts_at: discount.starts_at,
            ends_at: discount.ends_at,
        };
        self.working.discounts.push(record.clone());
        Ok(record)
    }
}

#[async_trait]
impl InventoryRows for InMemoryTransaction {
    async fn lock_inventory(&mut self, product_id: ProductId) -> Result<Option<InventoryRecord>> {
        // The whole store is already locked by this transaction.
        Ok(self.working.inventory.get(&product_id).copied())
    }

    async fn write_inventory(
        &mut self,
        product_id: ProductId,
        new_stock: i64,
        expected_version: Version,
    ) -> Result<u64> {
        if self.take_injected_conflict(product_id).await {
            return Ok(0);
        }

        if new_stock < 0 {
            return Err(StoreError::Constraint(
                "inventory.stock_quantity must not be negative".to_string(),
            ));
        }

        match self.working.inventory.get_mut(&product_id) {
            Some(row) if row.version == expected_version => {
                row.stock_quantity = new_stock;
                row.version = row.version.next();
                Ok(1)
            }
            _ => Ok(0),
        }
    }
}

#[async_trait]
impl CartRows for InMemoryTransaction {
    async fn ensure_cart(&mut self, user_id: UserId) -> Result<CartRecord> {
        let cart = self.working.carts.entry(user_id).or_insert_with(|| {
            let now = Utc::now();
            CartRecord {
                id: CartId::new(),
                user_id,
                created_at: now,
                updated_at: now,
            }
        });
        Ok(cart.clone())
    }

    async fn find_cart(&mut self, user_id: UserId) -> Result<Option<CartRecord>> {
        Ok(self.working.carts.get(&user_id).cloned())
    }

    // The store-wide guard already excludes other transactions.
    async fn lock_cart(&mut self, user_id: UserId) -> Result<Option<CartRecord>> {
        self.find_cart(user_id).await
    }

    async fn cart_lines(&mut self, cart_id: CartId) -> Result<Vec<CartLineRecord>> {
        Ok(self
            .working
            .cart_lines
            .get(&cart_id)
            .map(|lines| lines.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn upsert_cart_line(&mut self, line: CartLineRecord) -> Result<CartLineRecord> {
        if line.quantity == 0 {
            return Err(StoreError::Constraint(
                "cart_items.quantity must be at least 1".to_string(),
            ));
        }

        let lines = self.working.cart_lines.entry(line.cart_id).or_default();
        match lines.get_mut(&line.product_id) {
            Some(existing) => {
                let current = existing.quantity;
                existing.quantity = current.checked_add(line.quantity).ok_or_else(|| {
                    StoreError::Constraint(format!(
                        "cart_items.quantity overflows adding {} to {current}",
                        line.quantity
                    ))
                })?;
                Ok(existing.clone())
            }
            None => {
                lines.insert(line.product_id, line.clone());
                Ok(line)
            }
        }
    }

    async fn decrement_cart_line(
        &mut self,
        cart_id: CartId,
        product_id: ProductId,
    ) -> Result<Option<CartLineRecord>> {
        let line = self
            .working
            .cart_lines
            .get_mut(&cart_id)
            .and_then(|lines| lines.get_mut(&product_id));

        match line {
            Some(line) if line.quantity > 1 => {
                line.quantity -= 1;
                Ok(Some(line.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn delete_cart_line(&mut self, cart_id: CartId, product_id: ProductId) -> Result<u64> {
        let removed = self
            .working
            .cart_lines
            .get_mut(&cart_id)
            .and_then(|lines| lines.remove(&product_id));
        Ok(u64::from(removed.is_some()))
    }

    async fn delete_cart_lines(&mut self, cart_id: CartId) -> Result<u64> {
        let removed = self
            .working
            .cart_lines
            .remove(&cart_id)
            .map(|lines| lines.len())
            .unwrap_or(0);
        Ok(removed as u64)
    }
}

#[async_trait]
impl OrderRows for InMemoryTransaction {
    async fn insert_order(&mut self, order: NewOrder) -> Result<OrderRecord> {
        if self.working.orders.contains_key(&order.id) {
            return Err(StoreError::Constraint(format!(
                "duplicate order id {}",
                order.id
            )));
        }

        let now = Utc::now();
        let record = OrderRecord {
            id: order.id,
            user_id: order.user_id,
            total_amount: order.total_amount,
            status: OrderStatus::Pending,
            payment_method: order.payment_method,
            payment_reference: order.payment_reference,
            created_at: now,
            updated_at: now,
        };
        self.working.orders.insert(record.id, record.clone());
        Ok(record)
    }

    async fn insert_order_line(&mut self, line: OrderLineRecord) -> Result<()> {
        if !self.working.orders.contains_key(&line.order_id) {
            return Err(StoreError::Constraint(format!(
                "order_items.order_id references unknown order {}",
                line.order_id
            )));
        }

        let lines = self.working.order_lines.entry(line.order_id).or_default();
        if lines.contains_key(&line.product_id) {
            return Err(StoreError::Constraint(format!(
                "duplicate order line for product {}",
                line.product_id
            )));
        }
        lines.insert(line.product_id, line);
        Ok(())
    }

    async fn get_order(&mut self, order_id: OrderId) -> Result<Option<OrderRecord>> {
        Ok(self.working.orders.get(&order_id).cloned())
    }

    async fn lock_order(&mut self, order_id: OrderId) -> Result<Option<OrderRecord>> {
        self.get_order(order_id).await
    }

    async fn orders_for_user(&mut self, user_id: UserId) -> Result<Vec<OrderRecord>> {
        let mut orders: Vec<_> = self
            .working
            .orders
            .values()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn order_lines(&mut self, order_id: OrderId) -> Result<Vec<OrderLineRecord>> {
        Ok(self
            .working
            .order_lines
            .get(&order_id)
            .map(|lines| lines.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn update_order_status(
        &mut self,
        order_id: OrderId,
        status: OrderStatus,
    ) -> Result<Option<OrderRecord>> {
        Ok(self.working.orders.get_mut(&order_id).map(|order| {
            order.status = status;
            order.updated_at = Utc::now();
            order.clone()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{Money, PaymentMethod};

    async fn seed_product(store: &InMemoryStore, stock: i64) -> ProductId {
        let mut tx = store.begin().await.unwrap();
        let product = tx
            .insert_product(NewProduct::new("Widget", Money::from_units(10), stock))
            .await
            .unwrap();
        tx.commit().await.unwrap();
        product.id
    }

    #[tokio::test]
    async fn test_commit_publishes_writes() {
        let store = InMemoryStore::new();
        let product_id = seed_product(&store, 5).await;

        let mut tx = store.begin().await.unwrap();
        let rows = tx
            .write_inventory(product_id, 4, Version::initial())
            .await
            .unwrap();
        assert_eq!(rows, 1);
        tx.commit().await.unwrap();

        let inventory = store.inventory(product_id).await.unwrap();
        assert_eq!(inventory.stock_quantity, 4);
        assert_eq!(inventory.version, Version::new(1));
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let store = InMemoryStore::new();
        let product_id = seed_product(&store, 5).await;

        let mut tx = store.begin().await.unwrap();
        tx.write_inventory(product_id, 0, Version::initial())
            .await
            .unwrap();
        tx.rollback().await.unwrap();

        let inventory = store.inventory(product_id).await.unwrap();
        assert_eq!(inventory.stock_quantity, 5);
        assert_eq!(inventory.version, Version::initial());
    }

    #[tokio::test]
    async fn test_dropped_transaction_discards_writes() {
        let store = InMemoryStore::new();
        let product_id = seed_product(&store, 5).await;

        {
            let mut tx = store.begin().await.unwrap();
            tx.write_inventory(product_id, 1, Version::initial())
                .await
                .unwrap();
        }

        assert_eq!(store.inventory(product_id).await.unwrap().stock_quantity, 5);
    }

    #[tokio::test]
    async fn test_stale_version_affects_no_rows() {
        let store = InMemoryStore::new();
        let product_id = seed_product(&store, 5).await;

        let mut tx = store.begin().await.unwrap();
        let rows = tx
            .write_inventory(product_id, 3, Version::new(7))
            .await
            .unwrap();
        assert_eq!(rows, 0);
    }

    #[tokio::test]
    async fn test_injected_conflicts_are_consumed() {
        let store = InMemoryStore::new();
        let product_id = seed_product(&store, 5).await;
        store.inject_conflicts(product_id, 1).await;

        let mut tx = store.begin().await.unwrap();
        assert_eq!(
            tx.write_inventory(product_id, 4, Version::initial())
                .await
                .unwrap(),
            0
        );
        assert_eq!(
            tx.write_inventory(product_id, 4, Version::initial())
                .await
                .unwrap(),
            1
        );
        assert_eq!(store.pending_conflicts(product_id).await, 0);
    }

    #[tokio::test]
    async fn test_negative_stock_is_rejected() {
        let store = InMemoryStore::new();
        let product_id = seed_product(&store, 1).await;

        let mut tx = store.begin().await.unwrap();
        let result = tx.write_inventory(product_id, -1, Version::initial()).await;
        assert!(matches!(result, Err(StoreError::Constraint(_))));
    }

    #[tokio::test]
    async fn test_ensure_cart_returns_same_cart() {
        let store = InMemoryStore::new();
        let user = UserId::new(7);

        let mut tx = store.begin().await.unwrap();
        let first = tx.ensure_cart(user).await.unwrap();
        let second = tx.ensure_cart(user).await.unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_upsert_keeps_frozen_price() {
        let store = InMemoryStore::new();
        let product_id = seed_product(&store, 5).await;

        let mut tx = store.begin().await.unwrap();
        let cart = tx.ensure_cart(UserId::new(1)).await.unwrap();
        let line = |price: i64| CartLineRecord {
            cart_id: cart.id,
            product_id,
            quantity: 1,
            unit_price: Money::from_cents(price),
            product_title: "Widget".to_string(),
            product_image: None,
            added_at: Utc::now(),
        };

        tx.upsert_cart_line(line(1000)).await.unwrap();
        let stored = tx.upsert_cart_line(line(500)).await.unwrap();
        assert_eq!(stored.quantity, 2);
        assert_eq!(stored.unit_price, Money::from_cents(1000));
    }

    #[tokio::test]
    async fn test_decrement_stops_at_one() {
        let store = InMemoryStore::new();
        let product_id = seed_product(&store, 5).await;

        let mut tx = store.begin().await.unwrap();
        let cart = tx.ensure_cart(UserId::new(1)).await.unwrap();
        tx.upsert_cart_line(CartLineRecord {
            cart_id: cart.id,
            product_id,
            quantity: 2,
            unit_price: Money::from_cents(100),
            product_title: "Widget".to_string(),
            product_image: None,
            added_at: Utc::now(),
        })
        .await
        .unwrap();

        let updated = tx.decrement_cart_line(cart.id, product_id).await.unwrap();
        assert_eq!(updated.map(|l| l.quantity), Some(1));
        assert!(
            tx.decrement_cart_line(cart.id, product_id)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_orders_for_user_filters_by_owner() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        for user in [1, 1, 2] {
            tx.insert_order(NewOrder {
                id: OrderId::new(),
                user_id: UserId::new(user),
                total_amount: Money::from_units(1),
                payment_method: PaymentMethod::Pix,
                payment_reference: "ref".to_string(),
            })
            .await
            .unwrap();
        }
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.orders_for_user(UserId::new(1)).await.unwrap().len(), 2);
        assert_eq!(tx.orders_for_user(UserId::new(3)).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_cart_line_quantity_overflow_is_rejected() {
        let store = InMemoryStore::new();
        let product_id = seed_product(&store, 5).await;

        let mut tx = store.begin().await.unwrap();
        let cart = tx.ensure_cart(UserId::new(1)).await.unwrap();
        let line = CartLineRecord {
            cart_id: cart.id,
            product_id,
            quantity: u32::MAX,
            unit_price: Money::from_units(1),
            product_title: "Widget".to_string(),
            product_image: None,
            added_at: Utc::now(),
        };
        tx.upsert_cart_line(line.clone()).await.unwrap();

        let err = tx
            .upsert_cart_line(CartLineRecord { quantity: 2, ..line })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Constraint(_)));

        let lines = tx.cart_lines(cart.id).await.unwrap();
        assert_eq!(lines[0].quantity, u32::MAX);
    }
}
