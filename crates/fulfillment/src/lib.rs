//! Order fulfillment for the order-fulfillment pipeline.
//!
//! Checkout turns a user's cart into an order in a single transaction:
//! 1. Validate the cart and payment method
//! 2. Write the order, then debit stock and write an order line per cart line
//!    in ascending product order
//! 3. Clear the cart and commit
//!
//! Any failure rolls the whole attempt back. Attempts that lose an
//! optimistic-concurrency race are retried as a whole, a bounded number of
//! times.

pub mod coordinator;
pub mod error;
pub mod orders;
pub mod retry;
pub mod state;

pub use coordinator::{CheckoutCoordinator, CheckoutReceipt, CheckoutRequest};
pub use error::{FulfillmentError, Result};
pub use orders::{OrderService, OrderWithItems};
pub use retry::RetryPolicy;
pub use state::CheckoutState;
