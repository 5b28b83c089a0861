//! Row shapes read from and written to the store.

use chrono::{DateTime, Utc};
use common::{CartId, Money, OrderId, OrderStatus, PaymentMethod, ProductId, UserId, Version};

/// A catalog product joined with its inventory row.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductRecord {
    pub id: ProductId,
    pub title: String,
    /// Primary image, if the product has one.
    pub image_url: Option<String>,
    pub base_price: Money,
    pub stock_quantity: i64,
    pub version: Version,
}

/// Stock counter for a single product.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InventoryRecord {
    pub product_id: ProductId,
    /// Never negative.
    pub stock_quantity: i64,
    pub version: Version,
}

/// A percentage discount valid within `[starts_at, ends_at]`.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscountRecord {
    pub id: i64,
    pub product_id: ProductId,
    pub percent: f64,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

impl DiscountRecord {
    /// Returns true if `now` falls inside the discount window (inclusive).
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.starts_at <= now && now <= self.ends_at
    }
}

/// Input for seeding a product and its inventory row.
#[derive(Debug, Clone)]
pub struct NewProduct {
    pub title: String,
    pub image_url: Option<String>,
    pub base_price: Money,
    pub initial_stock: i64,
}

impl NewProduct {
    /// Creates a product without an image.
    pub fn new(title: impl Into<String>, base_price: Money, initial_stock: i64) -> Self {
        Self {
            title: title.into(),
            image_url: None,
            base_price,
            initial_stock,
        }
    }

    /// Sets the primary image URL.
    pub fn with_image(mut self, image_url: impl Into<String>) -> Self {
        self.image_url = Some(image_url.into());
        self
    }
}

/// Input for creating a product discount.
#[derive(Debug, Clone)]
pub struct NewDiscount {
    pub product_id: ProductId,
    pub percent: f64,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

/// A user's cart. At most one exists per user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartRecord {
    pub id: CartId,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One product in a cart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartLineRecord {
    pub cart_id: CartId,
    pub product_id: ProductId,
    /// Always at least 1; a line that would reach 0 is deleted instead.
    pub quantity: u32,
    /// Price frozen when the line was first created.
    pub unit_price: Money,
    /// Display snapshot taken at add time. May be stale; the catalog is
    /// authoritative.
    pub product_title: String,
    pub product_image: Option<String>,
    pub added_at: DateTime<Utc>,
}

impl CartLineRecord {
    /// Returns `quantity * unit_price`, or `None` if it overflows.
    pub fn subtotal(&self) -> Option<Money> {
        self.unit_price.checked_mul(self.quantity)
    }
}

/// Input for inserting an order row.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub id: OrderId,
    pub user_id: UserId,
    pub total_amount: Money,
    pub payment_method: PaymentMethod,
    pub payment_reference: String,
}

/// A persisted order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRecord {
    pub id: OrderId,
    pub user_id: UserId,
    /// Immutable after creation.
    pub total_amount: Money,
    pub status: OrderStatus,
    pub payment_method: PaymentMethod,
    pub payment_reference: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Permanent record of one sold product. Never updated once written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderLineRecord {
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_price: Money,
}

impl OrderLineRecord {
    /// Returns `quantity * unit_price`, or `None` if it overflows.
    pub fn subtotal(&self) -> Option<Money> {
        self.unit_price.checked_mul(self.quantity)
    }
}
