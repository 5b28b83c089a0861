//! Order reads and status updates.

use common::{OrderId, OrderStatus, UserId};
use domain::DomainError;
use store::{OrderLineRecord, OrderRecord, OrderRows, Store, Transaction};

use crate::error::{FulfillmentError, Result};

/// An order together with its lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderWithItems {
    pub order: OrderRecord,
    pub items: Vec<OrderLineRecord>,
}

/// Service for reading and updating orders on behalf of a user.
///
/// Every operation checks that the order belongs to the calling user.
#[derive(Clone)]
pub struct OrderService<S: Store> {
    store: S,
}

impl<S: Store> OrderService<S> {
    /// Creates a new order service.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Loads one of the user's orders.
    #[tracing::instrument(skip(self))]
    pub async fn get_order(&self, user_id: UserId, order_id: OrderId) -> Result<OrderRecord> {
        let mut tx = self.store.begin().await?;
        let order = owned_order(&mut tx, user_id, order_id).await?;
        tx.commit().await?;
        Ok(order)
    }

    /// Loads one of the user's orders with its lines.
    #[tracing::instrument(skip(self))]
    pub async fn get_order_with_items(
        &self,
        user_id: UserId,
        order_id: OrderId,
    ) -> Result<OrderWithItems> {
        let mut tx = self.store.begin().await?;
        let order = owned_order(&mut tx, user_id, order_id).await?;
        let items = tx.order_lines(order_id).await?;
        tx.commit().await?;
        Ok(OrderWithItems { order, items })
    }

    /// Lists the user's orders, newest first.
    #[tracing::instrument(skip(self))]
    pub async fn orders_for_user(&self, user_id: UserId) -> Result<Vec<OrderRecord>> {
        let mut tx = self.store.begin().await?;
        let orders = tx.orders_for_user(user_id).await?;
        tx.commit().await?;
        Ok(orders)
    }

    /// Lists the user's orders with their lines, newest first.
    #[tracing::instrument(skip(self))]
    pub async fn orders_with_items(&self, user_id: UserId) -> Result<Vec<OrderWithItems>> {
        let mut tx = self.store.begin().await?;
        let orders = tx.orders_for_user(user_id).await?;

        let mut result = Vec::with_capacity(orders.len());
        for order in orders {
            let items = tx.order_lines(order.id).await?;
            result.push(OrderWithItems { order, items });
        }
        tx.commit().await?;
        Ok(result)
    }

    /// Moves one of the user's orders to `status`.
    ///
    /// `status` must name a recognised status. Setting the current status
    /// again succeeds without writing.
    #[tracing::instrument(skip(self))]
    pub async fn update_status(
        &self,
        user_id: UserId,
        order_id: OrderId,
        status: &str,
    ) -> Result<OrderRecord> {
        let next: OrderStatus = status
            .parse()
            .map_err(|e: common::ParseEnumError| DomainError::validation("status", e.to_string()))?;

        let mut tx = self.store.begin().await?;
        // Locked so that concurrent updates check against the committed status.
        let order = tx
            .lock_order(order_id)
            .await?
            .ok_or(FulfillmentError::OrderNotFound(order_id))?;
        check_owner(&order, user_id)?;

        if order.status == next {
            tx.commit().await?;
            return Ok(order);
        }

        if !order.status.can_transition_to(next) {
            return Err(FulfillmentError::InvalidTransition {
                from: order.status,
                to: next,
            });
        }

        let updated = tx
            .update_order_status(order_id, next)
            .await?
            .ok_or(FulfillmentError::OrderNotFound(order_id))?;
        tx.commit().await?;

        tracing::info!(%order_id, from = %order.status, to = %next, "order status updated");
        Ok(updated)
    }
}

async fn owned_order<T: OrderRows>(
    tx: &mut T,
    user_id: UserId,
    order_id: OrderId,
) -> Result<OrderRecord> {
    let order = tx
        .get_order(order_id)
        .await?
        .ok_or(FulfillmentError::OrderNotFound(order_id))?;
    check_owner(&order, user_id)?;
    Ok(order)
}

fn check_owner(order: &OrderRecord, user_id: UserId) -> Result<()> {
    if order.user_id != user_id {
        let order_id = order.id;
        tracing::warn!(%user_id, %order_id, "access to foreign order denied");
        return Err(FulfillmentError::Forbidden { user_id, order_id });
    }
    Ok(())
}
