//! Domain error model.

use thiserror::Error;

use crate::decimal::Quantity;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// invariants, stock shortfalls, state-machine misuse). Infrastructure
/// concerns belong elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input, non-positive delta).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A requested resource was not found (domain-level).
    #[error("not found")]
    NotFound,

    /// Requested outbound/hold quantity exceeds what the bucket has available.
    ///
    /// Never partially applied. Recoverable by the caller (reduce quantity,
    /// back-order, split across buckets).
    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock {
        requested: Quantity,
        available: Quantity,
    },

    /// A write observed stale state (e.g. `quantity_before` no longer matches
    /// the bucket). Transient; the caller re-reads and retries.
    #[error("concurrent modification: {0}")]
    ConcurrentModification(String),

    /// An operation was attempted against a state machine in the wrong source
    /// state (e.g. confirming a released reservation). Caller logic error,
    /// not retried automatically.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A defensive internal check failed (e.g. quantity negative after a
    /// supposedly-valid computation). Indicates a bug; must reach operators.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }

    pub fn insufficient_stock(requested: Quantity, available: Quantity) -> Self {
        Self::InsufficientStock {
            requested,
            available,
        }
    }

    pub fn concurrent_modification(msg: impl Into<String>) -> Self {
        Self::ConcurrentModification(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    /// Whether a caller can recover by retrying the operation verbatim.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::ConcurrentModification(_))
    }
}
