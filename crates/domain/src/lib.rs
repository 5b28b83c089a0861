//! Domain layer for the order-fulfillment pipeline.
//!
//! This crate provides the rules that sit between the store and checkout:
//! - InventoryLedger for version-gated stock adjustments
//! - PriceResolver for discount-aware unit prices
//! - CartLedger / CartService for the pre-checkout basket
//! - DomainError and the ErrorKind taxonomy shared by the layers above

pub mod cart;
pub mod error;
pub mod inventory;
pub mod pricing;

pub use cart::{CartLedger, CartService, MAX_LINE_QUANTITY};
pub use error::{DomainError, ErrorKind, Result};
pub use inventory::{InventoryLedger, StockAdjustment};
pub use pricing::PriceResolver;
