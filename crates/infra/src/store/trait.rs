use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use stockforge_core::{DomainError, Quantity, TenantId};
use stockforge_ledger::{ApplyMovement, Movement, StockKey, StockRecord};
use stockforge_reservations::{
    ConfirmReservation, ReleaseReservation, Reservation, ReservationId, ReserveStock,
};

use super::query::TimeRange;

/// Store operation error.
///
/// Domain failures (insufficient stock, invalid state, concurrency) pass
/// through unchanged so callers can match on them; everything the storage
/// layer itself breaks on is `Storage`.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Cross-tenant access attempted (security violation, not a user error).
    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    /// Pool/connection/row-decoding failures.
    #[error("storage failure: {0}")]
    Storage(String),
}

impl StoreError {
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// The domain failure behind this error, if that is what it is.
    pub fn as_domain(&self) -> Option<&DomainError> {
        match self {
            StoreError::Domain(e) => Some(e),
            _ => None,
        }
    }
}

/// Transactional stock ledger: quantity accounting + reservations + the
/// append-only movement log, serialized per bucket.
///
/// ## Contract
///
/// - Every mutation runs in a per-bucket critical section (row-level lock or
///   equivalent): two writers against the same bucket serialize, writers
///   against different buckets proceed independently.
/// - A bucket update and the movement recording it commit together or not at
///   all; movements are never updated or deleted afterwards.
/// - Reads (`current_stock`, `list_movements`) reflect committed state only.
/// - Implementations may retry lock acquisition a bounded number of times
///   before surfacing `DomainError::ConcurrentModification`; nothing else is
///   retried internally.
pub trait StockLedger: Send + Sync {
    /// Apply one quantity change; creates the bucket on first inbound
    /// movement into a new key.
    fn apply_movement(&self, cmd: ApplyMovement) -> Result<Movement, StoreError>;

    /// Configure the low-stock thresholds for a bucket.
    fn set_stock_levels(
        &self,
        tenant_id: TenantId,
        key: &StockKey,
        min_stock_level: Quantity,
        reorder_point: Option<Quantity>,
        occurred_at: DateTime<Utc>,
    ) -> Result<StockRecord, StoreError>;

    /// Committed state of one bucket, if it exists.
    fn current_stock(
        &self,
        tenant_id: TenantId,
        key: &StockKey,
    ) -> Result<Option<StockRecord>, StoreError>;

    /// Committed movements of one bucket in commit order, optionally bounded
    /// in time. Finite and restartable: every call re-executes from source.
    fn list_movements(
        &self,
        tenant_id: TenantId,
        key: &StockKey,
        range: TimeRange,
    ) -> Result<Vec<Movement>, StoreError>;

    /// All movements caused by one upstream document (sale, purchase, ...).
    fn movements_by_reference(
        &self,
        tenant_id: TenantId,
        reference_id: Uuid,
    ) -> Result<Vec<Movement>, StoreError>;

    /// Take a hold on available quantity; no partial holds.
    fn reserve(&self, cmd: ReserveStock) -> Result<Reservation, StoreError>;

    /// Consume an active hold into a committed sale movement. Rejects holds
    /// past their expiry (they are expired in the same transaction).
    fn confirm_reservation(&self, cmd: ConfirmReservation) -> Result<Movement, StoreError>;

    /// Cancel an active hold. Idempotent on already-released/expired holds;
    /// returns the reservation as stored afterwards.
    fn release_reservation(&self, cmd: ReleaseReservation) -> Result<Reservation, StoreError>;

    fn get_reservation(
        &self,
        tenant_id: TenantId,
        reservation_id: ReservationId,
    ) -> Result<Option<Reservation>, StoreError>;

    /// Expire overdue active holds (all tenants), releasing their quantity.
    /// Returns the reservations transitioned by this pass, at most `limit`.
    fn sweep_expired(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Reservation>, StoreError>;
}

impl<S> StockLedger for Arc<S>
where
    S: StockLedger + ?Sized,
{
    fn apply_movement(&self, cmd: ApplyMovement) -> Result<Movement, StoreError> {
        (**self).apply_movement(cmd)
    }

    fn set_stock_levels(
        &self,
        tenant_id: TenantId,
        key: &StockKey,
        min_stock_level: Quantity,
        reorder_point: Option<Quantity>,
        occurred_at: DateTime<Utc>,
    ) -> Result<StockRecord, StoreError> {
        (**self).set_stock_levels(tenant_id, key, min_stock_level, reorder_point, occurred_at)
    }

    fn current_stock(
        &self,
        tenant_id: TenantId,
        key: &StockKey,
    ) -> Result<Option<StockRecord>, StoreError> {
        (**self).current_stock(tenant_id, key)
    }

    fn list_movements(
        &self,
        tenant_id: TenantId,
        key: &StockKey,
        range: TimeRange,
    ) -> Result<Vec<Movement>, StoreError> {
        (**self).list_movements(tenant_id, key, range)
    }

    fn movements_by_reference(
        &self,
        tenant_id: TenantId,
        reference_id: Uuid,
    ) -> Result<Vec<Movement>, StoreError> {
        (**self).movements_by_reference(tenant_id, reference_id)
    }

    fn reserve(&self, cmd: ReserveStock) -> Result<Reservation, StoreError> {
        (**self).reserve(cmd)
    }

    fn confirm_reservation(&self, cmd: ConfirmReservation) -> Result<Movement, StoreError> {
        (**self).confirm_reservation(cmd)
    }

    fn release_reservation(&self, cmd: ReleaseReservation) -> Result<Reservation, StoreError> {
        (**self).release_reservation(cmd)
    }

    fn get_reservation(
        &self,
        tenant_id: TenantId,
        reservation_id: ReservationId,
    ) -> Result<Option<Reservation>, StoreError> {
        (**self).get_reservation(tenant_id, reservation_id)
    }

    fn sweep_expired(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Reservation>, StoreError> {
        (**self).sweep_expired(now, limit)
    }
}
