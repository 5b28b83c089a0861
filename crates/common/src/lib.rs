//! Shared vocabulary for the order-fulfillment pipeline.
//!
//! Every other crate in the workspace speaks in these types: typed
//! identifiers, row versions for optimistic concurrency, money in integer
//! cents, and the enumerations persisted on orders.

pub mod ids;
pub mod money;
pub mod status;
pub mod version;

pub use ids::{CartId, OrderId, ProductId, UserId};
pub use money::Money;
pub use status::{OrderStatus, ParseEnumError, PaymentMethod};
pub use version::Version;
