use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CartId, OrderId, OrderStatus, ProductId, UserId, Version};

use crate::Result;
use crate::records::{
    CartLineRecord, CartRecord, DiscountRecord, InventoryRecord, NewDiscount, NewOrder,
    NewProduct, OrderLineRecord, OrderRecord, ProductRecord,
};

/// Core trait for store implementations.
///
/// A store only hands out transactions. All implementations must be
/// thread-safe (Send + Sync) so one store can serve many concurrent requests.
#[async_trait]
pub trait Store: Send + Sync {
    /// The transaction type produced by [`Store::begin`].
    type Tx: Transaction;

    /// Opens a new transaction.
    async fn begin(&self) -> Result<Self::Tx>;
}

/// A unit of work spanning any number of reads and writes.
///
/// Nothing written through a transaction is visible to other transactions
/// until [`Transaction::commit`] succeeds. Dropping a transaction without
/// committing discards all of its writes.
#[async_trait]
pub trait Transaction: ProductCatalog + CatalogWrites + InventoryRows + CartRows + OrderRows {
    /// Makes every write of this transaction visible at once.
    async fn commit(self) -> Result<()>;

    /// Discards every write of this transaction.
    async fn rollback(self) -> Result<()>;
}

/// Read access to products and their discounts.
#[async_trait]
pub trait ProductCatalog: Send {
    /// Loads a product together with its current stock and version.
    async fn get_product(&mut self, product_id: ProductId) -> Result<Option<ProductRecord>>;

    /// Lists discounts for the product whose window contains `now`.
    async fn active_discounts(
        &mut self,
        product_id: ProductId,
        now: DateTime<Utc>,
    ) -> Result<Vec<DiscountRecord>>;
}

/// Seeding the catalog. Product management proper lives elsewhere.
#[async_trait]
pub trait CatalogWrites: Send {
    /// Inserts a product and its inventory row (version 0).
    async fn insert_product(&mut self, product: NewProduct) -> Result<ProductRecord>;

    /// Inserts a discount for an existing product.
    async fn insert_discount(&mut self, discount: NewDiscount) -> Result<DiscountRecord>;
}

/// Per-product stock counters.
#[async_trait]
pub trait InventoryRows: Send {
    /// Reads the inventory row, locking it until the transaction ends.
    async fn lock_inventory(&mut self, product_id: ProductId) -> Result<Option<InventoryRecord>>;

    /// Writes `new_stock` and bumps the version, but only if the row is still
    /// at `expected_version`.
    ///
    /// Returns the number of rows affected: 1 on success, 0 if the version
    /// moved on (or the row is gone).
    async fn write_inventory(
        &mut self,
        product_id: ProductId,
        new_stock: i64,
        expected_version: Version,
    ) -> Result<u64>;
}

/// Carts and their lines.
#[async_trait]
pub trait CartRows: Send {
    /// Returns the user's cart, creating it if absent.
    ///
    /// Concurrent first-time calls for the same user must resolve to a
    /// single cart.
    async fn ensure_cart(&mut self, user_id: UserId) -> Result<CartRecord>;

    /// Returns the user's cart without creating one.
    async fn find_cart(&mut self, user_id: UserId) -> Result<Option<CartRecord>>;

    /// Like [`CartRows::find_cart`], but locks the cart row until the
    /// transaction ends. A concurrent holder of the lock is waited for, and
    /// its committed changes to the cart's lines are visible afterwards.
    async fn lock_cart(&mut self, user_id: UserId) -> Result<Option<CartRecord>>;

    /// Lists the lines of a cart ordered by product id.
    async fn cart_lines(&mut self, cart_id: CartId) -> Result<Vec<CartLineRecord>>;

    /// Inserts `line`, or adds `line.quantity` to the existing line for the
    /// same product. An existing line keeps its price and snapshot.
    async fn upsert_cart_line(&mut self, line: CartLineRecord) -> Result<CartLineRecord>;

    /// Decrements the line by one if its quantity is above one.
    ///
    /// Returns the updated line, or `None` if nothing was decremented.
    async fn decrement_cart_line(
        &mut self,
        cart_id: CartId,
        product_id: ProductId,
    ) -> Result<Option<CartLineRecord>>;

    /// Deletes one line. Returns rows affected.
    async fn delete_cart_line(&mut self, cart_id: CartId, product_id: ProductId) -> Result<u64>;

    /// Deletes every line of a cart. Returns rows affected.
    async fn delete_cart_lines(&mut self, cart_id: CartId) -> Result<u64>;
}

/// Orders and order lines.
#[async_trait]
pub trait OrderRows: Send {
    /// Inserts an order with status `Pending`.
    async fn insert_order(&mut self, order: NewOrder) -> Result<OrderRecord>;

    /// Appends one line to an order.
    async fn insert_order_line(&mut self, line: OrderLineRecord) -> Result<()>;

    /// Loads an order by id.
    async fn get_order(&mut self, order_id: OrderId) -> Result<Option<OrderRecord>>;

    /// Loads an order by id, locking it until the transaction ends.
    async fn lock_order(&mut self, order_id: OrderId) -> Result<Option<OrderRecord>>;

    /// Lists a user's orders, newest first.
    async fn orders_for_user(&mut self, user_id: UserId) -> Result<Vec<OrderRecord>>;

    /// Lists the lines of an order ordered by product id.
    async fn order_lines(&mut self, order_id: OrderId) -> Result<Vec<OrderLineRecord>>;

    /// Sets the order status. Returns the updated order, or `None` if absent.
    async fn update_order_status(
        &mut self,
        order_id: OrderId,
        status: OrderStatus,
    ) -> Result<Option<OrderRecord>>;
}
