//! The pre-checkout basket.
//!
//! [`CartLedger`] holds the cart rules as operations over an open transaction
//! so that checkout can read and clear a cart inside its own unit of work.
//! [`CartService`] wraps each operation in a transaction of its own for
//! standalone use.

use chrono::Utc;
use common::{CartId, Money, ProductId, UserId};
use store::{CartLineRecord, CartRows, ProductCatalog, Store, Transaction};

use crate::error::{DomainError, Result};
use crate::pricing::PriceResolver;

/// Largest quantity a single cart line may hold.
pub const MAX_LINE_QUANTITY: u32 = 10_000;

/// Cart operations over an open transaction.
pub struct CartLedger;

impl CartLedger {
    /// Returns the user's cart id, creating the cart if absent.
    pub async fn ensure_cart<T: CartRows>(tx: &mut T, user_id: UserId) -> Result<CartId> {
        Ok(tx.ensure_cart(user_id).await?.id)
    }

    /// Adds `quantity` units of a product, freezing its price on first add.
    ///
    /// An existing line keeps the price it was created with; only its
    /// quantity grows.
    pub async fn add_item<T: ProductCatalog + CartRows>(
        tx: &mut T,
        user_id: UserId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<CartLineRecord> {
        if quantity == 0 {
            return Err(DomainError::validation(
                "quantity",
                "quantity must be at least 1",
            ));
        }
        if quantity > MAX_LINE_QUANTITY {
            return Err(DomainError::validation(
                "quantity",
                format!("quantity must be at most {MAX_LINE_QUANTITY}"),
            ));
        }

        let product = tx
            .get_product(product_id)
            .await?
            .ok_or_else(|| DomainError::not_found("product", product_id))?;

        // Soft check only; checkout debits stock authoritatively.
        if product.stock_quantity <= 0 {
            return Err(DomainError::validation("product", "product out of stock"));
        }

        let now = Utc::now();
        let unit_price = PriceResolver::resolve(tx, &product, now).await?;
        let cart = tx.ensure_cart(user_id).await?;

        let existing = tx
            .cart_lines(cart.id)
            .await?
            .into_iter()
            .find(|line| line.product_id == product_id);
        let (held, line_price) = existing
            .map_or((0, unit_price), |line| (line.quantity, line.unit_price));
        let combined = held + quantity;
        if combined > MAX_LINE_QUANTITY {
            return Err(DomainError::validation(
                "quantity",
                format!("line would hold {combined} units, at most {MAX_LINE_QUANTITY} allowed"),
            ));
        }
        if line_price.checked_mul(combined).is_none() {
            return Err(DomainError::validation("quantity", "line total out of range"));
        }

        let line = tx
            .upsert_cart_line(CartLineRecord {
                cart_id: cart.id,
                product_id,
                quantity,
                unit_price,
                product_title: product.title,
                product_image: product.image_url,
                added_at: now,
            })
            .await?;
        Ok(line)
    }

    /// Takes one unit off a line, deleting the line when its last unit goes.
    ///
    /// Returns the remaining line, or `None` if the line was deleted.
    pub async fn remove_one_unit<T: CartRows>(
        tx: &mut T,
        user_id: UserId,
        product_id: ProductId,
    ) -> Result<Option<CartLineRecord>> {
        let cart_id = Self::existing_cart(tx, user_id, product_id).await?;

        if let Some(line) = tx.decrement_cart_line(cart_id, product_id).await? {
            return Ok(Some(line));
        }

        if tx.delete_cart_line(cart_id, product_id).await? == 0 {
            return Err(DomainError::not_found("cart item", product_id));
        }
        Ok(None)
    }

    /// Deletes a line whatever its quantity.
    pub async fn remove_line<T: CartRows>(
        tx: &mut T,
        user_id: UserId,
        product_id: ProductId,
    ) -> Result<()> {
        let cart_id = Self::existing_cart(tx, user_id, product_id).await?;

        if tx.delete_cart_line(cart_id, product_id).await? == 0 {
            return Err(DomainError::not_found("cart item", product_id));
        }
        Ok(())
    }

    /// Lists the user's cart lines by ascending product id. An absent cart is
    /// an empty cart.
    pub async fn lines<T: CartRows>(tx: &mut T, user_id: UserId) -> Result<Vec<CartLineRecord>> {
        match tx.find_cart(user_id).await? {
            Some(cart) => Ok(tx.cart_lines(cart.id).await?),
            None => Ok(Vec::new()),
        }
    }

    /// Like [`CartLedger::lines`], but holds the cart's row lock until the
    /// transaction ends, so no other transaction can check out or change
    /// the same cart meanwhile.
    pub async fn lock_lines<T: CartRows>(
        tx: &mut T,
        user_id: UserId,
    ) -> Result<Vec<CartLineRecord>> {
        match tx.lock_cart(user_id).await? {
            Some(cart) => Ok(tx.cart_lines(cart.id).await?),
            None => Ok(Vec::new()),
        }
    }

    /// Sums `quantity * unit_price` over the user's cart lines.
    pub async fn total<T: CartRows>(tx: &mut T, user_id: UserId) -> Result<Money> {
        let lines = Self::lines(tx, user_id).await?;
        Self::sum_lines(&lines)
    }

    /// Sums line subtotals, failing with a validation error on overflow.
    pub fn sum_lines(lines: &[CartLineRecord]) -> Result<Money> {
        lines
            .iter()
            .try_fold(Money::zero(), |acc, line| {
                line.subtotal().and_then(|subtotal| acc.checked_add(subtotal))
            })
            .ok_or_else(|| DomainError::validation("cart", "cart total out of range"))
    }

    /// Deletes every line of the user's cart. Clearing an empty or absent
    /// cart succeeds.
    ///
    /// Returns the number of lines removed.
    pub async fn clear<T: CartRows>(tx: &mut T, user_id: UserId) -> Result<u64> {
        match tx.find_cart(user_id).await? {
            Some(cart) => Ok(tx.delete_cart_lines(cart.id).await?),
            None => Ok(0),
        }
    }

    async fn existing_cart<T: CartRows>(
        tx: &mut T,
        user_id: UserId,
        product_id: ProductId,
    ) -> Result<CartId> {
        tx.find_cart(user_id)
            .await?
            .map(|cart| cart.id)
            .ok_or_else(|| DomainError::not_found("cart item", product_id))
    }
}

/// Service for managing carts.
///
/// Every method runs in its own transaction, which is committed on success
/// and discarded on error.
#[derive(Clone)]
pub struct CartService<S: Store> {
    store: S,
}

impl<S: Store> CartService<S> {
    /// Creates a new cart service over the given store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    #[tracing::instrument(skip(self))]
    pub async fn ensure_cart(&self, user_id: UserId) -> Result<CartId> {
        let mut tx = self.store.begin().await?;
        let cart_id = CartLedger::ensure_cart(&mut tx, user_id).await?;
        tx.commit().await?;
        Ok(cart_id)
    }

    #[tracing::instrument(skip(self))]
    pub async fn add_item(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<CartLineRecord> {
        let mut tx = self.store.begin().await?;
        let line = CartLedger::add_item(&mut tx, user_id, product_id, quantity).await?;
        tx.commit().await?;

        metrics::counter!("cart_items_added_total").increment(u64::from(quantity));
        tracing::info!(
            %user_id,
            %product_id,
            quantity = line.quantity,
            unit_price = %line.unit_price,
            "item added to cart"
        );
        Ok(line)
    }

    #[tracing::instrument(skip(self))]
    pub async fn remove_one_unit(
        &self,
        user_id: UserId,
        product_id: ProductId,
    ) -> Result<Option<CartLineRecord>> {
        let mut tx = self.store.begin().await?;
        let line = CartLedger::remove_one_unit(&mut tx, user_id, product_id).await?;
        tx.commit().await?;
        Ok(line)
    }

    #[tracing::instrument(skip(self))]
    pub async fn remove_line(&self, user_id: UserId, product_id: ProductId) -> Result<()> {
        let mut tx = self.store.begin().await?;
        CartLedger::remove_line(&mut tx, user_id, product_id).await?;
        tx.commit().await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub async fn lines(&self, user_id: UserId) -> Result<Vec<CartLineRecord>> {
        let mut tx = self.store.begin().await?;
        let lines = CartLedger::lines(&mut tx, user_id).await?;
        tx.commit().await?;
        Ok(lines)
    }

    #[tracing::instrument(skip(self))]
    pub async fn total(&self, user_id: UserId) -> Result<Money> {
        let mut tx = self.store.begin().await?;
        let total = CartLedger::total(&mut tx, user_id).await?;
        tx.commit().await?;
        Ok(total)
    }

    #[tracing::instrument(skip(self))]
    pub async fn clear(&self, user_id: UserId) -> Result<u64> {
        let mut tx = self.store.begin().await?;
        let removed = CartLedger::clear(&mut tx, user_id).await?;
        tx.commit().await?;
        Ok(removed)
    }
}
