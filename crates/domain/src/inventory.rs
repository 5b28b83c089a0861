//! Per-product stock counters with optimistic concurrency.

use common::{ProductId, Version};
use store::{InventoryRows, Store, Transaction};

use crate::error::{DomainError, Result};

/// Outcome of a successful stock adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockAdjustment {
    pub product_id: ProductId,
    pub previous_stock: i64,
    pub new_stock: i64,
    pub new_version: Version,
}

/// Compare-and-swap adjustments on inventory rows.
///
/// The ledger never retries on its own inside a transaction: a `Conflict`
/// poisons the enclosing unit of work, and the caller decides whether to
/// start over.
#[derive(Debug, Clone, Copy)]
pub struct InventoryLedger {
    max_restock_attempts: u32,
}

impl Default for InventoryLedger {
    fn default() -> Self {
        Self {
            max_restock_attempts: 3,
        }
    }
}

impl InventoryLedger {
    /// Creates a ledger whose restocks give up after `max_restock_attempts`
    /// conflicting attempts (at least one attempt is always made).
    pub fn new(max_restock_attempts: u32) -> Self {
        Self {
            max_restock_attempts: max_restock_attempts.max(1),
        }
    }

    /// Adds `delta` to the product's stock within `tx`.
    ///
    /// The row is read under lock, checked against `expected_version` if one
    /// is given, and written back conditioned on the version that was read.
    /// Fails with `InsufficientStock` before any write if the result would be
    /// negative, and with `Conflict` if the version moved.
    #[tracing::instrument(skip(tx))]
    pub async fn adjust_stock<T: InventoryRows>(
        tx: &mut T,
        product_id: ProductId,
        delta: i64,
        expected_version: Option<Version>,
    ) -> Result<StockAdjustment> {
        if delta == 0 {
            return Err(DomainError::validation(
                "quantity",
                "stock adjustment must not be zero",
            ));
        }

        let row = tx
            .lock_inventory(product_id)
            .await?
            .ok_or_else(|| DomainError::not_found("product", product_id))?;

        if let Some(expected) = expected_version
            && expected != row.version
        {
            return Err(DomainError::Conflict {
                product_id,
                expected,
            });
        }

        let new_stock = row.stock_quantity + delta;
        if new_stock < 0 {
            return Err(DomainError::InsufficientStock {
                product_id,
                available: row.stock_quantity,
                requested: -delta,
            });
        }

        let affected = tx
            .write_inventory(product_id, new_stock, row.version)
            .await?;
        if affected == 0 {
            tracing::debug!(%product_id, version = %row.version, "inventory version moved");
            return Err(DomainError::Conflict {
                product_id,
                expected: row.version,
            });
        }

        let direction = if delta < 0 { "debit" } else { "credit" };
        metrics::counter!("stock_adjustments_total", "direction" => direction).increment(1);

        Ok(StockAdjustment {
            product_id,
            previous_stock: row.stock_quantity,
            new_stock,
            new_version: row.version.next(),
        })
    }

    /// Adds `quantity` units to a product's stock in its own transaction,
    /// retrying on version conflicts.
    #[tracing::instrument(skip(self, store))]
    pub async fn restock<S: Store>(
        &self,
        store: &S,
        product_id: ProductId,
        quantity: i64,
    ) -> Result<StockAdjustment> {
        if quantity <= 0 {
            return Err(DomainError::validation(
                "quantity",
                "restock quantity must be positive",
            ));
        }

        let mut attempt = 1;
        loop {
            let mut tx = store.begin().await?;
            match Self::adjust_stock(&mut tx, product_id, quantity, None).await {
                Ok(adjustment) => {
                    tx.commit().await?;
                    tracing::info!(
                        %product_id,
                        new_stock = adjustment.new_stock,
                        attempt,
                        "restocked"
                    );
                    return Ok(adjustment);
                }
                Err(e) if e.kind().is_retryable() && attempt < self.max_restock_attempts => {
                    tx.rollback().await?;
                    tracing::warn!(%product_id, attempt, "restock conflict, retrying");
                    attempt += 1;
                }
                Err(e) => {
                    tx.rollback().await?;
                    return Err(e);
                }
            }
        }
    }
}
