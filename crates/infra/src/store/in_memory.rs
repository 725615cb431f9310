use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, TryLockError};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use stockforge_core::{DomainError, Quantity, TenantId};
use stockforge_ledger::{ApplyMovement, Movement, StockKey, StockRecord, StockRecordId};
use stockforge_reservations::{
    ConfirmReservation, ReleaseReservation, Reservation, ReservationId, ReserveStock,
};

use super::query::TimeRange;
use super::r#trait::{StockLedger, StoreError};

/// How stubbornly a writer waits for a bucket's critical section before the
/// store surfaces `ConcurrentModification`.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Bounded lock-acquisition attempts per operation.
    pub lock_attempts: u32,
    /// Delay between attempts.
    pub lock_retry_delay: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            lock_attempts: 50,
            lock_retry_delay: Duration::from_millis(2),
        }
    }
}

impl LedgerConfig {
    pub fn with_lock_attempts(mut self, attempts: u32) -> Self {
        self.lock_attempts = attempts;
        self
    }

    pub fn with_lock_retry_delay(mut self, delay: Duration) -> Self {
        self.lock_retry_delay = delay;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BucketKey {
    tenant_id: TenantId,
    key: StockKey,
}

/// One bucket and its append-style children. Everything in here is read and
/// written only while holding the bucket's mutex, so a mutation of the
/// record, its log and its reservations is atomic from a caller's view.
#[derive(Debug)]
struct Bucket {
    record: StockRecord,
    movements: Vec<Movement>,
    reservations: HashMap<ReservationId, Reservation>,
}

/// In-memory stock ledger.
///
/// Intended for tests/dev. The bucket mutex is the per-key critical section;
/// unrelated buckets proceed independently.
#[derive(Debug, Default)]
pub struct InMemoryStockLedger {
    config: LedgerConfig,
    buckets: RwLock<HashMap<BucketKey, Arc<Mutex<Bucket>>>>,
    /// Reservation id → owning bucket, for O(1) confirm/release routing.
    reservation_index: RwLock<HashMap<ReservationId, BucketKey>>,
}

impl InMemoryStockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: LedgerConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    fn existing_bucket(
        &self,
        tenant_id: TenantId,
        key: &StockKey,
    ) -> Result<Option<Arc<Mutex<Bucket>>>, StoreError> {
        let buckets = self
            .buckets
            .read()
            .map_err(|_| StoreError::storage("bucket map lock poisoned"))?;
        Ok(buckets
            .get(&BucketKey {
                tenant_id,
                key: key.clone(),
            })
            .cloned())
    }

    fn bucket_or_create(
        &self,
        tenant_id: TenantId,
        key: &StockKey,
        now: DateTime<Utc>,
    ) -> Result<Arc<Mutex<Bucket>>, StoreError> {
        if let Some(slot) = self.existing_bucket(tenant_id, key)? {
            return Ok(slot);
        }

        let mut buckets = self
            .buckets
            .write()
            .map_err(|_| StoreError::storage("bucket map lock poisoned"))?;
        let slot = buckets
            .entry(BucketKey {
                tenant_id,
                key: key.clone(),
            })
            .or_insert_with(|| {
                debug!(%tenant_id, "creating stock bucket");
                Arc::new(Mutex::new(Bucket {
                    record: StockRecord::new(StockRecordId::new(), tenant_id, key.clone(), now),
                    movements: Vec::new(),
                    reservations: HashMap::new(),
                }))
            })
            .clone();
        Ok(slot)
    }

    /// Bounded lock acquisition; the per-bucket critical section.
    fn lock_bucket<'a>(
        &self,
        slot: &'a Arc<Mutex<Bucket>>,
    ) -> Result<MutexGuard<'a, Bucket>, StoreError> {
        for _ in 0..self.config.lock_attempts {
            match slot.try_lock() {
                Ok(guard) => return Ok(guard),
                Err(TryLockError::WouldBlock) => thread::sleep(self.config.lock_retry_delay),
                Err(TryLockError::Poisoned(_)) => {
                    return Err(StoreError::storage("bucket lock poisoned"));
                }
            }
        }
        Err(DomainError::concurrent_modification(
            "timed out waiting for the bucket's critical section",
        )
        .into())
    }

    /// Append guard: a movement whose `quantity_before` does not match the
    /// head of the log was computed from a stale read.
    fn check_continuity(bucket: &Bucket, movement: &Movement) -> Result<(), StoreError> {
        let head = bucket
            .movements
            .last()
            .map(|m| m.quantity_after)
            .unwrap_or(Quantity::ZERO);
        if movement.quantity_before != head {
            return Err(DomainError::concurrent_modification(format!(
                "stale quantity_before {}: bucket is at {}",
                movement.quantity_before, head
            ))
            .into());
        }
        Ok(())
    }

    fn lookup_reservation(
        &self,
        reservation_id: ReservationId,
    ) -> Result<Option<BucketKey>, StoreError> {
        let index = self
            .reservation_index
            .read()
            .map_err(|_| StoreError::storage("reservation index lock poisoned"))?;
        Ok(index.get(&reservation_id).cloned())
    }
}

impl StockLedger for InMemoryStockLedger {
    fn apply_movement(&self, cmd: ApplyMovement) -> Result<Movement, StoreError> {
        let slot = if cmd.kind.is_inbound() {
            self.bucket_or_create(cmd.tenant_id, &cmd.key, cmd.occurred_at)?
        } else {
            match self.existing_bucket(cmd.tenant_id, &cmd.key)? {
                Some(slot) => slot,
                // Issuing from a bucket that has never received stock.
                None => {
                    return Err(
                        DomainError::insufficient_stock(cmd.quantity, Quantity::ZERO).into(),
                    );
                }
            }
        };

        let mut bucket = self.lock_bucket(&slot)?;
        let mut staged = bucket.record.clone();
        let movement = staged.apply_movement(&cmd)?;
        Self::check_continuity(&bucket, &movement)?;

        bucket.record = staged;
        bucket.movements.push(movement.clone());
        Ok(movement)
    }

    fn set_stock_levels(
        &self,
        tenant_id: TenantId,
        key: &StockKey,
        min_stock_level: Quantity,
        reorder_point: Option<Quantity>,
        occurred_at: DateTime<Utc>,
    ) -> Result<StockRecord, StoreError> {
        let slot = self.bucket_or_create(tenant_id, key, occurred_at)?;
        let mut bucket = self.lock_bucket(&slot)?;
        bucket
            .record
            .set_levels(min_stock_level, reorder_point, occurred_at);
        Ok(bucket.record.clone())
    }

    fn current_stock(
        &self,
        tenant_id: TenantId,
        key: &StockKey,
    ) -> Result<Option<StockRecord>, StoreError> {
        match self.existing_bucket(tenant_id, key)? {
            Some(slot) => {
                let bucket = self.lock_bucket(&slot)?;
                Ok(Some(bucket.record.clone()))
            }
            None => Ok(None),
        }
    }

    fn list_movements(
        &self,
        tenant_id: TenantId,
        key: &StockKey,
        range: TimeRange,
    ) -> Result<Vec<Movement>, StoreError> {
        match self.existing_bucket(tenant_id, key)? {
            Some(slot) => {
                let bucket = self.lock_bucket(&slot)?;
                Ok(bucket
                    .movements
                    .iter()
                    .filter(|m| range.contains(m.created_at))
                    .cloned()
                    .collect())
            }
            None => Ok(Vec::new()),
        }
    }

    fn movements_by_reference(
        &self,
        tenant_id: TenantId,
        reference_id: Uuid,
    ) -> Result<Vec<Movement>, StoreError> {
        let slots: Vec<Arc<Mutex<Bucket>>> = {
            let buckets = self
                .buckets
                .read()
                .map_err(|_| StoreError::storage("bucket map lock poisoned"))?;
            buckets
                .iter()
                .filter(|(k, _)| k.tenant_id == tenant_id)
                .map(|(_, slot)| slot.clone())
                .collect()
        };

        let mut movements = Vec::new();
        for slot in slots {
            let bucket = self.lock_bucket(&slot)?;
            movements.extend(
                bucket
                    .movements
                    .iter()
                    .filter(|m| m.reference.id == reference_id)
                    .cloned(),
            );
        }
        movements.sort_by_key(|m| (m.created_at, m.id.0));
        Ok(movements)
    }

    fn reserve(&self, cmd: ReserveStock) -> Result<Reservation, StoreError> {
        let expires_at = cmd.expires_at()?;
        let slot = match self.existing_bucket(cmd.tenant_id, &cmd.key)? {
            Some(slot) => slot,
            None => {
                return Err(DomainError::insufficient_stock(cmd.quantity, Quantity::ZERO).into());
            }
        };

        let mut bucket = self.lock_bucket(&slot)?;
        let mut staged = bucket.record.clone();
        staged.hold(cmd.quantity, cmd.occurred_at)?;

        let reservation = Reservation::new(
            ReservationId::new(),
            cmd.tenant_id,
            staged.id,
            cmd.quantity,
            cmd.reference,
            expires_at,
            cmd.occurred_at,
        )?;

        bucket.record = staged;
        bucket
            .reservations
            .insert(reservation.id, reservation.clone());

        self.reservation_index
            .write()
            .map_err(|_| StoreError::storage("reservation index lock poisoned"))?
            .insert(
                reservation.id,
                BucketKey {
                    tenant_id: cmd.tenant_id,
                    key: cmd.key.clone(),
                },
            );

        Ok(reservation)
    }

    fn confirm_reservation(&self, cmd: ConfirmReservation) -> Result<Movement, StoreError> {
        let bucket_key = self
            .lookup_reservation(cmd.reservation_id)?
            .ok_or(DomainError::NotFound)?;
        if bucket_key.tenant_id != cmd.tenant_id {
            return Err(StoreError::TenantIsolation(format!(
                "reservation {} belongs to another tenant",
                cmd.reservation_id
            )));
        }

        let slot = self
            .existing_bucket(bucket_key.tenant_id, &bucket_key.key)?
            .ok_or_else(|| StoreError::storage("reservation index points at a missing bucket"))?;
        let mut bucket = self.lock_bucket(&slot)?;
        let bucket = &mut *bucket;

        let reservation = bucket
            .reservations
            .get_mut(&cmd.reservation_id)
            .ok_or_else(|| StoreError::storage("reservation index points at a missing hold"))?;

        // An overdue hold the sweeper has not visited yet: expire it here,
        // release the quantity, and reject the confirmation.
        if reservation.status.is_active() && reservation.is_expired(cmd.occurred_at) {
            let mut staged_res = reservation.clone();
            let mut staged_rec = bucket.record.clone();
            if staged_res.try_expire(cmd.occurred_at) {
                staged_rec.release_hold(staged_res.quantity, cmd.occurred_at)?;
                bucket.record = staged_rec;
                *reservation = staged_res;
            }
            return Err(DomainError::invalid_state(format!(
                "reservation {} expired at {}",
                cmd.reservation_id, reservation.expires_at
            ))
            .into());
        }

        let mut staged_res = reservation.clone();
        staged_res.try_confirm(cmd.occurred_at)?;

        let mut staged_rec = bucket.record.clone();
        let movement = staged_rec.consume_hold(
            staged_res.quantity,
            staged_res.reference,
            cmd.actor_id,
            cmd.occurred_at,
        )?;
        Self::check_continuity(bucket, &movement)?;

        bucket.record = staged_rec;
        bucket.movements.push(movement.clone());
        let reservation = bucket
            .reservations
            .get_mut(&cmd.reservation_id)
            .ok_or_else(|| StoreError::storage("reservation index points at a missing hold"))?;
        *reservation = staged_res;
        Ok(movement)
    }

    fn release_reservation(&self, cmd: ReleaseReservation) -> Result<Reservation, StoreError> {
        let bucket_key = self
            .lookup_reservation(cmd.reservation_id)?
            .ok_or(DomainError::NotFound)?;
        if bucket_key.tenant_id != cmd.tenant_id {
            return Err(StoreError::TenantIsolation(format!(
                "reservation {} belongs to another tenant",
                cmd.reservation_id
            )));
        }

        let slot = self
            .existing_bucket(bucket_key.tenant_id, &bucket_key.key)?
            .ok_or_else(|| StoreError::storage("reservation index points at a missing bucket"))?;
        let mut bucket = self.lock_bucket(&slot)?;
        let bucket = &mut *bucket;

        let reservation = bucket
            .reservations
            .get_mut(&cmd.reservation_id)
            .ok_or_else(|| StoreError::storage("reservation index points at a missing hold"))?;

        let mut staged_res = reservation.clone();
        if staged_res.try_release(cmd.occurred_at)? {
            let mut staged_rec = bucket.record.clone();
            staged_rec.release_hold(staged_res.quantity, cmd.occurred_at)?;
            bucket.record = staged_rec;
            *reservation = staged_res.clone();
        }
        Ok(staged_res)
    }

    fn get_reservation(
        &self,
        tenant_id: TenantId,
        reservation_id: ReservationId,
    ) -> Result<Option<Reservation>, StoreError> {
        let Some(bucket_key) = self.lookup_reservation(reservation_id)? else {
            return Ok(None);
        };
        if bucket_key.tenant_id != tenant_id {
            return Ok(None);
        }

        match self.existing_bucket(bucket_key.tenant_id, &bucket_key.key)? {
            Some(slot) => {
                let bucket = self.lock_bucket(&slot)?;
                Ok(bucket.reservations.get(&reservation_id).cloned())
            }
            None => Ok(None),
        }
    }

    fn sweep_expired(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Reservation>, StoreError> {
        let slots: Vec<Arc<Mutex<Bucket>>> = {
            let buckets = self
                .buckets
                .read()
                .map_err(|_| StoreError::storage("bucket map lock poisoned"))?;
            buckets.values().cloned().collect()
        };

        let mut expired = Vec::new();
        for slot in slots {
            if expired.len() >= limit {
                break;
            }
            let mut bucket = self.lock_bucket(&slot)?;
            let bucket = &mut *bucket;

            for reservation in bucket.reservations.values_mut() {
                if expired.len() >= limit {
                    break;
                }
                let mut staged_res = reservation.clone();
                if !staged_res.try_expire(now) {
                    continue;
                }
                let mut staged_rec = bucket.record.clone();
                staged_rec.release_hold(staged_res.quantity, now)?;
                bucket.record = staged_rec;
                *reservation = staged_res.clone();
                expired.push(staged_res);
            }
        }
        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    use stockforge_core::{ActorId, Money, ProductId};
    use stockforge_ledger::{MovementKind, MovementReference, ReferenceKind};

    fn in_cmd(tenant_id: TenantId, key: &StockKey, quantity: u64, cost: &str) -> ApplyMovement {
        ApplyMovement {
            tenant_id,
            key: key.clone(),
            kind: MovementKind::Purchase,
            quantity: Quantity::from(quantity),
            unit_cost: Some(Money::parse(cost).unwrap()),
            reference: MovementReference::new(ReferenceKind::Purchase, Uuid::now_v7()),
            actor_id: ActorId::new(),
            occurred_at: Utc::now(),
        }
    }

    fn out_cmd(tenant_id: TenantId, key: &StockKey, quantity: u64) -> ApplyMovement {
        ApplyMovement {
            tenant_id,
            key: key.clone(),
            kind: MovementKind::Sale,
            quantity: Quantity::from(quantity),
            unit_cost: None,
            reference: MovementReference::new(ReferenceKind::Sale, Uuid::now_v7()),
            actor_id: ActorId::new(),
            occurred_at: Utc::now(),
        }
    }

    fn reserve_cmd(tenant_id: TenantId, key: &StockKey, quantity: u64, ttl: StdDuration) -> ReserveStock {
        ReserveStock {
            tenant_id,
            key: key.clone(),
            quantity: Quantity::from(quantity),
            reference: MovementReference::new(ReferenceKind::Sale, Uuid::now_v7()),
            ttl,
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn first_inbound_movement_creates_the_bucket() {
        let ledger = InMemoryStockLedger::new();
        let tenant = TenantId::new();
        let key = StockKey::product(ProductId::new());

        assert!(ledger.current_stock(tenant, &key).unwrap().is_none());
        ledger.apply_movement(in_cmd(tenant, &key, 10, "4.00")).unwrap();

        let record = ledger.current_stock(tenant, &key).unwrap().unwrap();
        assert_eq!(record.quantity, Quantity::from(10));
        assert_eq!(record.available_quantity, Quantity::from(10));
    }

    #[test]
    fn outbound_from_an_unknown_bucket_is_insufficient_stock() {
        let ledger = InMemoryStockLedger::new();
        let err = ledger
            .apply_movement(out_cmd(TenantId::new(), &StockKey::product(ProductId::new()), 1))
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Domain(DomainError::InsufficientStock { .. })
        ));
    }

    #[test]
    fn buckets_are_tenant_scoped() {
        let ledger = InMemoryStockLedger::new();
        let key = StockKey::product(ProductId::new());
        let tenant_a = TenantId::new();
        let tenant_b = TenantId::new();

        ledger.apply_movement(in_cmd(tenant_a, &key, 10, "4.00")).unwrap();
        assert!(ledger.current_stock(tenant_b, &key).unwrap().is_none());
    }

    #[test]
    fn the_movement_log_is_ordered_and_restartable() {
        let ledger = InMemoryStockLedger::new();
        let tenant = TenantId::new();
        let key = StockKey::product(ProductId::new());

        ledger.apply_movement(in_cmd(tenant, &key, 10, "4.00")).unwrap();
        ledger.apply_movement(out_cmd(tenant, &key, 4)).unwrap();
        ledger.apply_movement(in_cmd(tenant, &key, 2, "5.00")).unwrap();

        let first = ledger.list_movements(tenant, &key, TimeRange::all()).unwrap();
        let second = ledger.list_movements(tenant, &key, TimeRange::all()).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
        assert_eq!(
            stockforge_ledger::replay_quantity(&first).unwrap(),
            Quantity::from(8)
        );
    }

    #[test]
    fn movements_are_indexed_by_causing_reference() {
        let ledger = InMemoryStockLedger::new();
        let tenant = TenantId::new();
        let key = StockKey::product(ProductId::new());
        let sale_id = Uuid::now_v7();

        ledger.apply_movement(in_cmd(tenant, &key, 10, "4.00")).unwrap();
        let mut cmd = out_cmd(tenant, &key, 4);
        cmd.reference = MovementReference::new(ReferenceKind::Sale, sale_id);
        ledger.apply_movement(cmd).unwrap();

        let matches = ledger.movements_by_reference(tenant, sale_id).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].reference.id, sale_id);
    }

    #[test]
    fn reserve_confirm_commits_an_outbound_movement() {
        let ledger = InMemoryStockLedger::new();
        let tenant = TenantId::new();
        let key = StockKey::product(ProductId::new());
        ledger.apply_movement(in_cmd(tenant, &key, 5, "2.00")).unwrap();

        let reservation = ledger
            .reserve(reserve_cmd(tenant, &key, 3, StdDuration::from_secs(300)))
            .unwrap();
        let record = ledger.current_stock(tenant, &key).unwrap().unwrap();
        assert_eq!(record.available_quantity, Quantity::from(2));
        assert_eq!(record.reserved_quantity, Quantity::from(3));

        let movement = ledger
            .confirm_reservation(ConfirmReservation {
                tenant_id: tenant,
                reservation_id: reservation.id,
                actor_id: ActorId::new(),
                occurred_at: Utc::now(),
            })
            .unwrap();
        assert_eq!(movement.kind, MovementKind::Sale);
        assert_eq!(movement.quantity, Quantity::from(3));

        let record = ledger.current_stock(tenant, &key).unwrap().unwrap();
        assert_eq!(record.quantity, Quantity::from(2));
        assert_eq!(record.reserved_quantity, Quantity::ZERO);

        let stored = ledger.get_reservation(tenant, reservation.id).unwrap().unwrap();
        assert!(stored.status.is_terminal());
    }

    #[test]
    fn release_is_idempotent_at_the_store_level() {
        let ledger = InMemoryStockLedger::new();
        let tenant = TenantId::new();
        let key = StockKey::product(ProductId::new());
        ledger.apply_movement(in_cmd(tenant, &key, 5, "2.00")).unwrap();

        let reservation = ledger
            .reserve(reserve_cmd(tenant, &key, 3, StdDuration::from_secs(300)))
            .unwrap();

        let release = ReleaseReservation {
            tenant_id: tenant,
            reservation_id: reservation.id,
            occurred_at: Utc::now(),
        };
        ledger.release_reservation(release.clone()).unwrap();
        // Second release: no-op, not an error, quantities untouched.
        ledger.release_reservation(release).unwrap();

        let record = ledger.current_stock(tenant, &key).unwrap().unwrap();
        assert_eq!(record.available_quantity, Quantity::from(5));
        assert_eq!(record.reserved_quantity, Quantity::ZERO);
    }

    #[test]
    fn cross_tenant_confirm_is_an_isolation_violation() {
        let ledger = InMemoryStockLedger::new();
        let tenant = TenantId::new();
        let key = StockKey::product(ProductId::new());
        ledger.apply_movement(in_cmd(tenant, &key, 5, "2.00")).unwrap();
        let reservation = ledger
            .reserve(reserve_cmd(tenant, &key, 3, StdDuration::from_secs(300)))
            .unwrap();

        let err = ledger
            .confirm_reservation(ConfirmReservation {
                tenant_id: TenantId::new(),
                reservation_id: reservation.id,
                actor_id: ActorId::new(),
                occurred_at: Utc::now(),
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::TenantIsolation(_)));
    }

    #[test]
    fn sweep_expires_overdue_holds_and_restores_availability() {
        let ledger = InMemoryStockLedger::new();
        let tenant = TenantId::new();
        let key = StockKey::product(ProductId::new());
        ledger.apply_movement(in_cmd(tenant, &key, 5, "2.00")).unwrap();

        let reservation = ledger
            .reserve(reserve_cmd(tenant, &key, 3, StdDuration::from_millis(10)))
            .unwrap();

        let later = Utc::now() + chrono::Duration::seconds(1);
        let expired = ledger.sweep_expired(later, 100).unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, reservation.id);

        let record = ledger.current_stock(tenant, &key).unwrap().unwrap();
        assert_eq!(record.available_quantity, Quantity::from(5));
        assert_eq!(record.reserved_quantity, Quantity::ZERO);

        // The sweep already won; a late confirm must lose.
        let err = ledger
            .confirm_reservation(ConfirmReservation {
                tenant_id: tenant,
                reservation_id: reservation.id,
                actor_id: ActorId::new(),
                occurred_at: later,
            })
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Domain(DomainError::InvalidState(_))
        ));
    }

    #[test]
    fn confirm_rejects_and_expires_an_overdue_hold_before_the_sweeper() {
        let ledger = InMemoryStockLedger::new();
        let tenant = TenantId::new();
        let key = StockKey::product(ProductId::new());
        ledger.apply_movement(in_cmd(tenant, &key, 5, "2.00")).unwrap();

        let reservation = ledger
            .reserve(reserve_cmd(tenant, &key, 3, StdDuration::from_millis(10)))
            .unwrap();

        let later = Utc::now() + chrono::Duration::seconds(1);
        let err = ledger
            .confirm_reservation(ConfirmReservation {
                tenant_id: tenant,
                reservation_id: reservation.id,
                actor_id: ActorId::new(),
                occurred_at: later,
            })
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Domain(DomainError::InvalidState(_))
        ));

        // The failed confirm expired the hold and returned the quantity.
        let stored = ledger.get_reservation(tenant, reservation.id).unwrap().unwrap();
        assert_eq!(
            stored.status,
            stockforge_reservations::ReservationStatus::Expired
        );
        let record = ledger.current_stock(tenant, &key).unwrap().unwrap();
        assert_eq!(record.available_quantity, Quantity::from(5));
    }
}
