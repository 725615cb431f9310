//! Stock ledger domain module.
//!
//! This crate contains the business rules for quantity accounting: stock
//! buckets, immutable movements, moving weighted-average costing and status
//! classification — implemented purely as deterministic domain logic (no IO,
//! no HTTP, no storage).

pub mod costing;
pub mod movement;
pub mod status;
pub mod stock;

pub use costing::{CostBasis, next_average_cost};
pub use movement::{
    Movement, MovementDirection, MovementId, MovementKind, MovementReference, ReferenceKind,
    replay_quantity,
};
pub use status::{StockStatus, classify};
pub use stock::{ApplyMovement, StockKey, StockRecord, StockRecordId};
