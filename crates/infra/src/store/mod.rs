//! Transactional stock ledger boundary.
//!
//! This module defines the store abstraction behind which all quantity
//! accounting happens, without making storage assumptions: an in-memory
//! implementation for tests/dev and a Postgres implementation for
//! production share the same per-bucket serialization contract.

pub mod in_memory;
pub mod postgres;
pub mod query;
pub mod r#trait;

pub use in_memory::{InMemoryStockLedger, LedgerConfig};
pub use postgres::PostgresStockLedger;
pub use query::{MovementFilter, MovementQuery, MovementQueryResult, Pagination, TimeRange};
pub use r#trait::{StockLedger, StoreError};
