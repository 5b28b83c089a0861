//! Checkout coordinator turning a cart into an order in one transaction.

use std::time::Instant;

use common::{OrderId, PaymentMethod, UserId};
use domain::{CartLedger, DomainError, ErrorKind, InventoryLedger, StockAdjustment};
use store::{NewOrder, OrderLineRecord, OrderRecord, OrderRows, Store, Transaction};

use crate::error::{FulfillmentError, Result};
use crate::retry::RetryPolicy;
use crate::state::CheckoutState;

/// What the client submits to check out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutRequest {
    /// Must name one of the recognised payment methods.
    pub payment_method: String,
    /// Opaque reference from the payment provider, accepted as authorised.
    pub payment_reference: String,
}

impl CheckoutRequest {
    pub fn new(payment_method: impl Into<String>, payment_reference: impl Into<String>) -> Self {
        Self {
            payment_method: payment_method.into(),
            payment_reference: payment_reference.into(),
        }
    }
}

/// Result of a committed checkout.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutReceipt {
    pub order: OrderRecord,
    /// Order lines by ascending product id.
    pub lines: Vec<OrderLineRecord>,
    /// Stock level of each ordered product right after its debit.
    pub stock_levels: Vec<StockAdjustment>,
    /// Attempts used, including the one that committed.
    pub attempts: u32,
}

/// Orchestrates checkout.
///
/// Each attempt opens one transaction and either commits every effect
/// (order, order lines, stock debits, cleared cart) or none of them.
/// Attempts that lose an optimistic-concurrency race are retried as a whole
/// according to the [`RetryPolicy`].
#[derive(Clone)]
pub struct CheckoutCoordinator<S: Store> {
    store: S,
    retry: RetryPolicy,
}

impl<S: Store> CheckoutCoordinator<S> {
    /// Creates a new checkout coordinator.
    pub fn new(store: S, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Returns the retry policy in use.
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Checks out the user's cart, retrying whole attempts on conflict.
    #[tracing::instrument(skip(self, request), fields(payment_method = %request.payment_method))]
    pub async fn checkout(&self, user_id: UserId, request: &CheckoutRequest) -> Result<CheckoutReceipt> {
        let started = Instant::now();
        let mut attempt = 1;

        loop {
            match self.attempt(user_id, request).await {
                Ok(mut receipt) => {
                    receipt.attempts = attempt;
                    let duration = started.elapsed().as_secs_f64();
                    metrics::histogram!("checkout_duration_seconds").record(duration);
                    metrics::counter!("checkout_completed_total").increment(1);
                    tracing::info!(
                        %user_id,
                        order_id = %receipt.order.id,
                        total = %receipt.order.total_amount,
                        lines = receipt.lines.len(),
                        attempt,
                        duration,
                        "checkout completed"
                    );
                    return Ok(receipt);
                }
                Err(e) if e.kind() == ErrorKind::Conflict => {
                    metrics::counter!("checkout_conflicts_total").increment(1);

                    if !self.retry.allows_another(attempt) {
                        metrics::counter!("checkout_failed_total", "kind" => ErrorKind::Conflict.as_str())
                            .increment(1);
                        tracing::warn!(%user_id, attempts = attempt, error = %e, "checkout retries exhausted");
                        return Err(FulfillmentError::RetriesExhausted {
                            attempts: attempt,
                            last: Box::new(e),
                        });
                    }

                    let backoff = self.retry.backoff_for(attempt);
                    tracing::warn!(
                        %user_id,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "checkout conflict, retrying"
                    );
                    if !backoff.is_zero() {
                        tokio::time::sleep(backoff).await;
                    }
                    attempt += 1;
                }
                Err(e) => {
                    metrics::counter!("checkout_failed_total", "kind" => e.kind().as_str())
                        .increment(1);
                    if e.kind() == ErrorKind::Internal {
                        tracing::error!(%user_id, error = %e, "checkout failed");
                    } else {
                        tracing::info!(%user_id, kind = %e.kind(), error = %e, "checkout rejected");
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Runs a single checkout attempt without retrying.
    ///
    /// On any failure the transaction is rolled back and the error returned
    /// unchanged; nothing the attempt did is observable afterwards.
    pub async fn attempt(&self, user_id: UserId, request: &CheckoutRequest) -> Result<CheckoutReceipt> {
        metrics::counter!("checkout_attempts_total").increment(1);

        let mut state = CheckoutState::Started;
        let mut tx = self.store.begin().await?;

        match Self::run(&mut tx, user_id, request, &mut state).await {
            Ok(receipt) => {
                tx.commit().await?;
                advance(&mut state, CheckoutState::Committed);
                Ok(receipt)
            }
            Err(e) => {
                let failed_at = state;
                advance(&mut state, CheckoutState::Aborted);
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::error!(error = %rollback_err, "checkout rollback failed");
                }
                tracing::debug!(%user_id, %failed_at, error = %e, "checkout attempt aborted");
                Err(e)
            }
        }
    }

    async fn run(
        tx: &mut S::Tx,
        user_id: UserId,
        request: &CheckoutRequest,
        state: &mut CheckoutState,
    ) -> Result<CheckoutReceipt> {
        // Validate. The cart stays locked until commit, so a concurrent
        // checkout of the same cart finds it empty.
        let mut cart_lines = CartLedger::lock_lines(tx, user_id).await?;
        if cart_lines.is_empty() {
            return Err(DomainError::validation("cart", "cart is empty").into());
        }
        let payment_method: PaymentMethod = request
            .payment_method
            .parse()
            .map_err(|e: common::ParseEnumError| DomainError::validation("payment_method", e.to_string()))?;

        // Frozen line prices only; nothing is repriced.
        let total = CartLedger::sum_lines(&cart_lines)?;
        advance(state, CheckoutState::Validated);

        let order = tx
            .insert_order(NewOrder {
                id: OrderId::new(),
                user_id,
                total_amount: total,
                payment_method,
                payment_reference: request.payment_reference.clone(),
            })
            .await?;

        // Fixed lock order across concurrent checkouts.
        cart_lines.sort_by_key(|line| line.product_id);

        let mut lines = Vec::with_capacity(cart_lines.len());
        let mut stock_levels = Vec::with_capacity(cart_lines.len());
        for (i, cart_line) in cart_lines.iter().enumerate() {
            let adjustment = InventoryLedger::adjust_stock(
                tx,
                cart_line.product_id,
                -i64::from(cart_line.quantity),
                None,
            )
            .await?;

            let line = OrderLineRecord {
                order_id: order.id,
                product_id: cart_line.product_id,
                quantity: cart_line.quantity,
                unit_price: cart_line.unit_price,
            };
            tx.insert_order_line(line.clone()).await?;

            lines.push(line);
            stock_levels.push(adjustment);
            advance(state, CheckoutState::StockReserved(i + 1));
        }
        advance(state, CheckoutState::OrderPersisted);

        CartLedger::clear(tx, user_id).await?;
        advance(state, CheckoutState::CartCleared);

        Ok(CheckoutReceipt {
            order,
            lines,
            stock_levels,
            attempts: 1,
        })
    }
}

fn advance(state: &mut CheckoutState, next: CheckoutState) {
    debug_assert!(
        state.can_transition_to(next),
        "illegal checkout transition {state} -> {next}"
    );
    tracing::trace!(from = %state, to = %next, "checkout state");
    *state = next;
}
