//! Transactional storage for the order-fulfillment pipeline.
//!
//! A [`Store`] hands out [`Transaction`]s; every read and write the pipeline
//! performs goes through one. Two implementations are provided:
//! [`InMemoryStore`] for tests and local runs, and [`PostgresStore`] backed
//! by sqlx.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod records;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::{InMemoryStore, InMemoryTransaction};
pub use postgres::{PostgresStore, PostgresTransaction};
pub use records::{
    CartLineRecord, CartRecord, DiscountRecord, InventoryRecord, NewDiscount, NewOrder,
    NewProduct, OrderLineRecord, OrderRecord, ProductRecord,
};
pub use store::{
    CartRows, CatalogWrites, InventoryRows, OrderRows, ProductCatalog, Store, Transaction,
};
