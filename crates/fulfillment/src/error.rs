//! Fulfillment error types.

use common::{OrderId, OrderStatus, UserId};
use domain::{DomainError, ErrorKind};
use store::StoreError;
use thiserror::Error;

/// Errors that can occur during checkout and order management.
#[derive(Debug, Error)]
pub enum FulfillmentError {
    /// A domain rule rejected the operation.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// An error occurred in the store.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Order not found.
    #[error("order not found: {0}")]
    OrderNotFound(OrderId),

    /// The order belongs to someone else.
    #[error("user {user_id} does not own order {order_id}")]
    Forbidden { user_id: UserId, order_id: OrderId },

    /// The requested status change is not allowed from the current status.
    #[error("order cannot move from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    /// Every allowed checkout attempt lost a concurrent-modification race.
    #[error("checkout conflicted on all {attempts} attempts, please resubmit")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<FulfillmentError>,
    },
}

impl FulfillmentError {
    /// Returns the kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            FulfillmentError::Domain(e) => e.kind(),
            FulfillmentError::Store(_) => ErrorKind::Internal,
            FulfillmentError::OrderNotFound(_) => ErrorKind::NotFound,
            FulfillmentError::Forbidden { .. } => ErrorKind::Forbidden,
            FulfillmentError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            FulfillmentError::RetriesExhausted { .. } => ErrorKind::Conflict,
        }
    }
}

/// Convenience type alias for fulfillment results.
pub type Result<T> = std::result::Result<T, FulfillmentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_kind_passes_through() {
        let err = FulfillmentError::from(DomainError::validation("cart", "cart is empty"));
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.to_string(), "cart: cart is empty");
    }

    #[test]
    fn test_exhausted_retries_are_conflicts() {
        let err = FulfillmentError::RetriesExhausted {
            attempts: 3,
            last: Box::new(FulfillmentError::Store(StoreError::Constraint("x".into()))),
        };
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn test_store_errors_are_internal() {
        let err = FulfillmentError::from(StoreError::Constraint("orders_pkey".into()));
        assert_eq!(err.kind(), ErrorKind::Internal);
    }
}
