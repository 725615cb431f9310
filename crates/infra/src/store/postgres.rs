//! Postgres-backed stock ledger implementation.
//!
//! Persists buckets, movements and reservations in PostgreSQL with the
//! per-bucket critical section implemented as a `SELECT ... FOR UPDATE` row
//! lock: two writers against the same bucket serialize on the row, writers
//! against different buckets proceed independently. Every operation runs in
//! one transaction, so the bucket update and the movement/reservation rows it
//! produces commit together or not at all.
//!
//! ## Expected schema
//!
//! Schema migration tooling lives outside this engine; the store expects:
//!
//! ```sql
//! CREATE TABLE stock_records (
//!     id                 UUID PRIMARY KEY,
//!     tenant_id          UUID NOT NULL,
//!     product_id         UUID NOT NULL,
//!     variant_id         UUID,
//!     warehouse_id       UUID,
//!     batch_number       TEXT,
//!     quantity           NUMERIC(18,3) NOT NULL,
//!     available_quantity NUMERIC(18,3) NOT NULL,
//!     reserved_quantity  NUMERIC(18,3) NOT NULL,
//!     min_stock_level    NUMERIC(18,3) NOT NULL,
//!     reorder_point      NUMERIC(18,3),
//!     average_cost       NUMERIC(18,4) NOT NULL,
//!     last_cost          NUMERIC(18,4) NOT NULL,
//!     total_value        NUMERIC(18,4) NOT NULL,
//!     status             TEXT NOT NULL,
//!     last_movement_id   UUID,
//!     created_at         TIMESTAMPTZ NOT NULL,
//!     updated_at         TIMESTAMPTZ NOT NULL,
//!     UNIQUE NULLS NOT DISTINCT (tenant_id, product_id, variant_id, warehouse_id, batch_number)
//! );
//!
//! CREATE TABLE stock_movements (
//!     id               UUID PRIMARY KEY,
//!     seq              BIGINT GENERATED ALWAYS AS IDENTITY,
//!     tenant_id        UUID NOT NULL,
//!     stock_record_id  UUID NOT NULL REFERENCES stock_records (id),
//!     kind             TEXT NOT NULL,
//!     quantity         NUMERIC(18,3) NOT NULL,
//!     quantity_before  NUMERIC(18,3) NOT NULL,
//!     quantity_after   NUMERIC(18,3) NOT NULL,
//!     unit_cost        NUMERIC(18,4) NOT NULL,
//!     total_cost       NUMERIC(18,4) NOT NULL,
//!     reference_kind   TEXT NOT NULL,
//!     reference_id     UUID NOT NULL,
//!     actor_id         UUID NOT NULL,
//!     created_at       TIMESTAMPTZ NOT NULL
//! );
//!
//! CREATE TABLE stock_reservations (
//!     id               UUID PRIMARY KEY,
//!     tenant_id        UUID NOT NULL,
//!     stock_record_id  UUID NOT NULL REFERENCES stock_records (id),
//!     quantity         NUMERIC(18,3) NOT NULL,
//!     status           TEXT NOT NULL,
//!     reference_kind   TEXT NOT NULL,
//!     reference_id     UUID NOT NULL,
//!     expires_at       TIMESTAMPTZ NOT NULL,
//!     created_at       TIMESTAMPTZ NOT NULL,
//!     updated_at       TIMESTAMPTZ NOT NULL
//! );
//! ```
//!
//! Movements have no UPDATE/DELETE statements anywhere in this module; the
//! log is append-only by construction. `seq` orders movements by commit.
//!
//! ## Error mapping
//!
//! | SQLx error | Code | StoreError | Scenario |
//! |------------|------|------------|----------|
//! | Database (unique violation) | `23505` | `Domain(ConcurrentModification)` | Two writers raced bucket creation |
//! | Database (other) | any | `Storage` | Constraint/connection failures |
//! | PoolClosed / RowNotFound / other | n/a | `Storage` | Pool shut down, network errors |
//!
//! ## Thread safety
//!
//! `PostgresStockLedger` is `Send + Sync` and shares a SQLx pool. The sync
//! [`StockLedger`] trait is bridged onto the async implementation via the
//! ambient tokio runtime handle, mirroring how callers embed the store in
//! blocking call sites.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use stockforge_core::{
    DomainError, Money, ProductId, Quantity, TenantId, VariantId, WarehouseId,
};
use stockforge_ledger::{
    ApplyMovement, Movement, MovementId, MovementReference, StockKey, StockRecord, StockRecordId,
    StockStatus,
};
use stockforge_reservations::{
    ConfirmReservation, ReleaseReservation, Reservation, ReservationId, ReservationStatus,
    ReserveStock,
};

use super::query::{
    MovementFilter, MovementQuery, MovementQueryResult, Pagination, TimeRange,
};
use super::r#trait::{StockLedger, StoreError};

/// Postgres-backed transactional stock ledger.
#[derive(Debug, Clone)]
pub struct PostgresStockLedger {
    pool: Arc<PgPool>,
}

impl PostgresStockLedger {
    /// Create a new store with the given connection pool.
    ///
    /// The pool is the single injected connection context; the store never
    /// reads ambient configuration.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Apply one quantity change inside a transaction holding the bucket's
    /// row lock. Creates the bucket on first inbound movement.
    #[instrument(skip(self, cmd), fields(tenant_id = %cmd.tenant_id, kind = cmd.kind.as_str()), err)]
    pub async fn apply_movement(&self, cmd: ApplyMovement) -> Result<Movement, StoreError> {
        let mut tx = self.begin().await?;

        let existing = select_record_for_update(&mut tx, cmd.tenant_id, &cmd.key).await?;
        let mut record = match existing {
            Some(record) => record,
            None if cmd.kind.is_inbound() => {
                let record = StockRecord::new(
                    StockRecordId::new(),
                    cmd.tenant_id,
                    cmd.key.clone(),
                    cmd.occurred_at,
                );
                // A concurrent creation of the same bucket trips the unique
                // constraint and surfaces as ConcurrentModification; the
                // caller re-reads and retries.
                insert_record(&mut tx, &record).await?;
                record
            }
            None => {
                rollback(tx).await?;
                return Err(
                    DomainError::insufficient_stock(cmd.quantity, Quantity::ZERO).into(),
                );
            }
        };

        let quantity_read = record.quantity;
        let movement = match record.apply_movement(&cmd) {
            Ok(movement) => movement,
            Err(e) => {
                rollback(tx).await?;
                return Err(e.into());
            }
        };

        update_record(&mut tx, &record, quantity_read).await?;
        insert_movement(&mut tx, &movement).await?;
        commit(tx).await?;
        Ok(movement)
    }

    /// Configure the low-stock thresholds for a bucket, creating it if the
    /// key has never been seen.
    #[instrument(skip(self, key), fields(tenant_id = %tenant_id), err)]
    pub async fn set_stock_levels(
        &self,
        tenant_id: TenantId,
        key: &StockKey,
        min_stock_level: Quantity,
        reorder_point: Option<Quantity>,
        occurred_at: DateTime<Utc>,
    ) -> Result<StockRecord, StoreError> {
        let mut tx = self.begin().await?;

        let mut record = match select_record_for_update(&mut tx, tenant_id, key).await? {
            Some(record) => record,
            None => {
                let record =
                    StockRecord::new(StockRecordId::new(), tenant_id, key.clone(), occurred_at);
                insert_record(&mut tx, &record).await?;
                record
            }
        };

        let quantity_read = record.quantity;
        record.set_levels(min_stock_level, reorder_point, occurred_at);
        update_record(&mut tx, &record, quantity_read).await?;
        commit(tx).await?;
        Ok(record)
    }

    /// Committed state of one bucket (no lock taken).
    #[instrument(skip(self, key), fields(tenant_id = %tenant_id), err)]
    pub async fn current_stock(
        &self,
        tenant_id: TenantId,
        key: &StockKey,
    ) -> Result<Option<StockRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM stock_records WHERE {KEY_PREDICATE}"
        ))
        .bind(tenant_id.as_uuid())
        .bind(key.product_id.as_uuid())
        .bind(key.variant_id.map(|v| *v.as_uuid()))
        .bind(key.warehouse_id.map(|w| *w.as_uuid()))
        .bind(key.batch_number.as_deref())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("current_stock", e))?;

        row.map(|row| decode_record(&row)).transpose()
    }

    /// Committed movements of one bucket in commit order.
    #[instrument(skip(self, key, range), fields(tenant_id = %tenant_id), err)]
    pub async fn list_movements(
        &self,
        tenant_id: TenantId,
        key: &StockKey,
        range: TimeRange,
    ) -> Result<Vec<Movement>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {MOVEMENT_COLUMNS}
            FROM stock_movements m
            JOIN stock_records r ON r.id = m.stock_record_id
            WHERE r.tenant_id = $1
                AND r.product_id = $2
                AND r.variant_id IS NOT DISTINCT FROM $3
                AND r.warehouse_id IS NOT DISTINCT FROM $4
                AND r.batch_number IS NOT DISTINCT FROM $5
                AND ($6::timestamptz IS NULL OR m.created_at >= $6)
                AND ($7::timestamptz IS NULL OR m.created_at < $7)
            ORDER BY m.seq ASC
            "#
        ))
        .bind(tenant_id.as_uuid())
        .bind(key.product_id.as_uuid())
        .bind(key.variant_id.map(|v| *v.as_uuid()))
        .bind(key.warehouse_id.map(|w| *w.as_uuid()))
        .bind(key.batch_number.as_deref())
        .bind(range.from)
        .bind(range.until)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_movements", e))?;

        rows.iter().map(decode_movement).collect()
    }

    /// All movements caused by one upstream document.
    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    pub async fn movements_by_reference(
        &self,
        tenant_id: TenantId,
        reference_id: Uuid,
    ) -> Result<Vec<Movement>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {MOVEMENT_COLUMNS}
            FROM stock_movements m
            WHERE m.tenant_id = $1 AND m.reference_id = $2
            ORDER BY m.seq ASC
            "#
        ))
        .bind(tenant_id.as_uuid())
        .bind(reference_id)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("movements_by_reference", e))?;

        rows.iter().map(decode_movement).collect()
    }

    /// Take a hold on available quantity.
    #[instrument(skip(self, cmd), fields(tenant_id = %cmd.tenant_id), err)]
    pub async fn reserve(&self, cmd: ReserveStock) -> Result<Reservation, StoreError> {
        let expires_at = cmd.expires_at()?;
        let mut tx = self.begin().await?;

        let mut record = match select_record_for_update(&mut tx, cmd.tenant_id, &cmd.key).await? {
            Some(record) => record,
            None => {
                rollback(tx).await?;
                return Err(
                    DomainError::insufficient_stock(cmd.quantity, Quantity::ZERO).into(),
                );
            }
        };

        let quantity_read = record.quantity;
        if let Err(e) = record.hold(cmd.quantity, cmd.occurred_at) {
            rollback(tx).await?;
            return Err(e.into());
        }

        let reservation = Reservation::new(
            ReservationId::new(),
            cmd.tenant_id,
            record.id,
            cmd.quantity,
            cmd.reference,
            expires_at,
            cmd.occurred_at,
        )?;

        update_record(&mut tx, &record, quantity_read).await?;
        insert_reservation(&mut tx, &reservation).await?;
        commit(tx).await?;
        Ok(reservation)
    }

    /// Consume an active hold into a committed sale movement.
    ///
    /// An overdue hold is expired in this same transaction (quantity
    /// released) and the confirmation is rejected with `InvalidState`.
    #[instrument(skip(self, cmd), fields(tenant_id = %cmd.tenant_id, reservation_id = %cmd.reservation_id), err)]
    pub async fn confirm_reservation(
        &self,
        cmd: ConfirmReservation,
    ) -> Result<Movement, StoreError> {
        let mut tx = self.begin().await?;

        let reservation =
            match select_reservation_for_update(&mut tx, cmd.tenant_id, cmd.reservation_id).await? {
                Some(reservation) => reservation,
                None => {
                    rollback(tx).await?;
                    return Err(DomainError::NotFound.into());
                }
            };

        let mut record =
            select_record_by_id_for_update(&mut tx, cmd.tenant_id, reservation.stock_record_id)
                .await?
                .ok_or_else(|| {
                    StoreError::storage("reservation references a missing stock record")
                })?;

        if reservation.status.is_active() && reservation.is_expired(cmd.occurred_at) {
            let mut staged = reservation.clone();
            if staged.try_expire(cmd.occurred_at) {
                let quantity_read = record.quantity;
                if let Err(e) = record.release_hold(staged.quantity, cmd.occurred_at) {
                    rollback(tx).await?;
                    return Err(e.into());
                }
                update_record(&mut tx, &record, quantity_read).await?;
                cas_reservation_status(&mut tx, &staged, ReservationStatus::Active).await?;
            }
            commit(tx).await?;
            return Err(DomainError::invalid_state(format!(
                "reservation {} expired at {}",
                reservation.id, reservation.expires_at
            ))
            .into());
        }

        let mut staged = reservation.clone();
        if let Err(e) = staged.try_confirm(cmd.occurred_at) {
            rollback(tx).await?;
            return Err(e.into());
        }

        let quantity_read = record.quantity;
        let movement = match record.consume_hold(
            staged.quantity,
            staged.reference,
            cmd.actor_id,
            cmd.occurred_at,
        ) {
            Ok(movement) => movement,
            Err(e) => {
                rollback(tx).await?;
                return Err(e.into());
            }
        };

        update_record(&mut tx, &record, quantity_read).await?;
        insert_movement(&mut tx, &movement).await?;
        cas_reservation_status(&mut tx, &staged, ReservationStatus::Active).await?;
        commit(tx).await?;
        Ok(movement)
    }

    /// Cancel an active hold; no-op on already released/expired holds.
    #[instrument(skip(self, cmd), fields(tenant_id = %cmd.tenant_id, reservation_id = %cmd.reservation_id), err)]
    pub async fn release_reservation(
        &self,
        cmd: ReleaseReservation,
    ) -> Result<Reservation, StoreError> {
        let mut tx = self.begin().await?;

        let reservation =
            match select_reservation_for_update(&mut tx, cmd.tenant_id, cmd.reservation_id).await? {
                Some(reservation) => reservation,
                None => {
                    rollback(tx).await?;
                    return Err(DomainError::NotFound.into());
                }
            };

        let mut staged = reservation.clone();
        match staged.try_release(cmd.occurred_at) {
            Ok(true) => {
                let mut record = select_record_by_id_for_update(
                    &mut tx,
                    cmd.tenant_id,
                    reservation.stock_record_id,
                )
                .await?
                .ok_or_else(|| {
                    StoreError::storage("reservation references a missing stock record")
                })?;

                let quantity_read = record.quantity;
                if let Err(e) = record.release_hold(staged.quantity, cmd.occurred_at) {
                    rollback(tx).await?;
                    return Err(e.into());
                }
                update_record(&mut tx, &record, quantity_read).await?;
                cas_reservation_status(&mut tx, &staged, ReservationStatus::Active).await?;
                commit(tx).await?;
                Ok(staged)
            }
            Ok(false) => {
                rollback(tx).await?;
                Ok(staged)
            }
            Err(e) => {
                rollback(tx).await?;
                Err(e.into())
            }
        }
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    pub async fn get_reservation(
        &self,
        tenant_id: TenantId,
        reservation_id: ReservationId,
    ) -> Result<Option<Reservation>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM stock_reservations WHERE tenant_id = $1 AND id = $2"
        ))
        .bind(tenant_id.as_uuid())
        .bind(reservation_id.0)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_reservation", e))?;

        row.map(|row| decode_reservation(&row)).transpose()
    }

    /// Expire overdue active holds across all tenants.
    ///
    /// `FOR UPDATE SKIP LOCKED` lets concurrent sweepers (or a sweep racing a
    /// confirm/release holding the row) pass each other without blocking;
    /// whoever wins the row transitions it, the loser simply never sees it.
    #[instrument(skip(self), err)]
    pub async fn sweep_expired(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Reservation>, StoreError> {
        let mut tx = self.begin().await?;

        let rows = sqlx::query(&format!(
            r#"
            SELECT {RESERVATION_COLUMNS}
            FROM stock_reservations
            WHERE status = 'active' AND expires_at < $1
            ORDER BY expires_at ASC
            LIMIT $2
            FOR UPDATE SKIP LOCKED
            "#
        ))
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("sweep_expired", e))?;

        let mut swept = Vec::with_capacity(rows.len());
        for row in &rows {
            let reservation = decode_reservation(row)?;
            let mut staged = reservation.clone();
            if !staged.try_expire(now) {
                continue;
            }

            let mut record = select_record_by_id_for_update(
                &mut tx,
                staged.tenant_id,
                staged.stock_record_id,
            )
            .await?
            .ok_or_else(|| {
                StoreError::storage("reservation references a missing stock record")
            })?;

            let quantity_read = record.quantity;
            if let Err(e) = record.release_hold(staged.quantity, now) {
                rollback(tx).await?;
                return Err(e.into());
            }
            update_record(&mut tx, &record, quantity_read).await?;
            cas_reservation_status(&mut tx, &staged, ReservationStatus::Active).await?;
            swept.push(staged);
        }

        commit(tx).await?;
        Ok(swept)
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, StoreError> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))
    }
}

async fn commit(tx: Transaction<'_, Postgres>) -> Result<(), StoreError> {
    tx.commit()
        .await
        .map_err(|e| map_sqlx_error("commit_transaction", e))
}

async fn rollback(tx: Transaction<'_, Postgres>) -> Result<(), StoreError> {
    tx.rollback()
        .await
        .map_err(|e| map_sqlx_error("rollback_transaction", e))
}

const KEY_PREDICATE: &str = "tenant_id = $1 \
    AND product_id = $2 \
    AND variant_id IS NOT DISTINCT FROM $3 \
    AND warehouse_id IS NOT DISTINCT FROM $4 \
    AND batch_number IS NOT DISTINCT FROM $5";

const RECORD_COLUMNS: &str = "id, tenant_id, product_id, variant_id, warehouse_id, batch_number, \
    quantity, available_quantity, reserved_quantity, min_stock_level, reorder_point, \
    average_cost, last_cost, total_value, status, last_movement_id, created_at, updated_at";

const MOVEMENT_COLUMNS: &str = "m.id, m.tenant_id, m.stock_record_id, m.kind, m.quantity, \
    m.quantity_before, m.quantity_after, m.unit_cost, m.total_cost, m.reference_kind, \
    m.reference_id, m.actor_id, m.created_at";

const RESERVATION_COLUMNS: &str = "id, tenant_id, stock_record_id, quantity, status, \
    reference_kind, reference_id, expires_at, created_at, updated_at";

async fn select_record_for_update(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: TenantId,
    key: &StockKey,
) -> Result<Option<StockRecord>, StoreError> {
    let row = sqlx::query(&format!(
        "SELECT {RECORD_COLUMNS} FROM stock_records WHERE {KEY_PREDICATE} FOR UPDATE"
    ))
    .bind(tenant_id.as_uuid())
    .bind(key.product_id.as_uuid())
    .bind(key.variant_id.map(|v| *v.as_uuid()))
    .bind(key.warehouse_id.map(|w| *w.as_uuid()))
    .bind(key.batch_number.as_deref())
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("select_record_for_update", e))?;

    row.map(|row| decode_record(&row)).transpose()
}

async fn select_record_by_id_for_update(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: TenantId,
    record_id: StockRecordId,
) -> Result<Option<StockRecord>, StoreError> {
    let row = sqlx::query(&format!(
        "SELECT {RECORD_COLUMNS} FROM stock_records WHERE tenant_id = $1 AND id = $2 FOR UPDATE"
    ))
    .bind(tenant_id.as_uuid())
    .bind(record_id.0)
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("select_record_by_id_for_update", e))?;

    row.map(|row| decode_record(&row)).transpose()
}

async fn insert_record(
    tx: &mut Transaction<'_, Postgres>,
    record: &StockRecord,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO stock_records (
            id, tenant_id, product_id, variant_id, warehouse_id, batch_number,
            quantity, available_quantity, reserved_quantity, min_stock_level,
            reorder_point, average_cost, last_cost, total_value, status,
            last_movement_id, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
        "#,
    )
    .bind(record.id.0)
    .bind(record.tenant_id.as_uuid())
    .bind(record.key.product_id.as_uuid())
    .bind(record.key.variant_id.map(|v| *v.as_uuid()))
    .bind(record.key.warehouse_id.map(|w| *w.as_uuid()))
    .bind(record.key.batch_number.as_deref())
    .bind(record.quantity.as_decimal())
    .bind(record.available_quantity.as_decimal())
    .bind(record.reserved_quantity.as_decimal())
    .bind(record.min_stock_level.as_decimal())
    .bind(record.reorder_point.map(|q| q.as_decimal()))
    .bind(record.average_cost.as_decimal())
    .bind(record.last_cost.as_decimal())
    .bind(record.total_value.as_decimal())
    .bind(record.status.as_str())
    .bind(record.last_movement_id.map(|m| m.0))
    .bind(record.created_at)
    .bind(record.updated_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_record", e))?;
    Ok(())
}

/// Persist the new bucket state, guarded against stale reads.
///
/// The `quantity = $expected` predicate is the append guard: under the row
/// lock it always matches, but a code path that computed from a stale read
/// fails here with `ConcurrentModification` instead of corrupting the chain.
async fn update_record(
    tx: &mut Transaction<'_, Postgres>,
    record: &StockRecord,
    quantity_read: Quantity,
) -> Result<(), StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE stock_records SET
            quantity = $1,
            available_quantity = $2,
            reserved_quantity = $3,
            min_stock_level = $4,
            reorder_point = $5,
            average_cost = $6,
            last_cost = $7,
            total_value = $8,
            status = $9,
            last_movement_id = $10,
            updated_at = $11
        WHERE id = $12 AND tenant_id = $13 AND quantity = $14
        "#,
    )
    .bind(record.quantity.as_decimal())
    .bind(record.available_quantity.as_decimal())
    .bind(record.reserved_quantity.as_decimal())
    .bind(record.min_stock_level.as_decimal())
    .bind(record.reorder_point.map(|q| q.as_decimal()))
    .bind(record.average_cost.as_decimal())
    .bind(record.last_cost.as_decimal())
    .bind(record.total_value.as_decimal())
    .bind(record.status.as_str())
    .bind(record.last_movement_id.map(|m| m.0))
    .bind(record.updated_at)
    .bind(record.id.0)
    .bind(record.tenant_id.as_uuid())
    .bind(quantity_read.as_decimal())
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("update_record", e))?;

    if result.rows_affected() != 1 {
        return Err(DomainError::concurrent_modification(format!(
            "stock record {} changed since it was read",
            record.id
        ))
        .into());
    }
    Ok(())
}

async fn insert_movement(
    tx: &mut Transaction<'_, Postgres>,
    movement: &Movement,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO stock_movements (
            id, tenant_id, stock_record_id, kind, quantity, quantity_before,
            quantity_after, unit_cost, total_cost, reference_kind, reference_id,
            actor_id, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        "#,
    )
    .bind(movement.id.0)
    .bind(movement.tenant_id.as_uuid())
    .bind(movement.stock_record_id.0)
    .bind(movement.kind.as_str())
    .bind(movement.quantity.as_decimal())
    .bind(movement.quantity_before.as_decimal())
    .bind(movement.quantity_after.as_decimal())
    .bind(movement.unit_cost.as_decimal())
    .bind(movement.total_cost.as_decimal())
    .bind(movement.reference.kind.as_str())
    .bind(movement.reference.id)
    .bind(*movement.actor_id.as_uuid())
    .bind(movement.created_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_movement", e))?;
    Ok(())
}

async fn select_reservation_for_update(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: TenantId,
    reservation_id: ReservationId,
) -> Result<Option<Reservation>, StoreError> {
    let row = sqlx::query(&format!(
        "SELECT {RESERVATION_COLUMNS} FROM stock_reservations \
         WHERE tenant_id = $1 AND id = $2 FOR UPDATE"
    ))
    .bind(tenant_id.as_uuid())
    .bind(reservation_id.0)
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("select_reservation_for_update", e))?;

    row.map(|row| decode_reservation(&row)).transpose()
}

async fn insert_reservation(
    tx: &mut Transaction<'_, Postgres>,
    reservation: &Reservation,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO stock_reservations (
            id, tenant_id, stock_record_id, quantity, status, reference_kind,
            reference_id, expires_at, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(reservation.id.0)
    .bind(reservation.tenant_id.as_uuid())
    .bind(reservation.stock_record_id.0)
    .bind(reservation.quantity.as_decimal())
    .bind(reservation.status.as_str())
    .bind(reservation.reference.kind.as_str())
    .bind(reservation.reference.id)
    .bind(reservation.expires_at)
    .bind(reservation.created_at)
    .bind(reservation.updated_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_reservation", e))?;
    Ok(())
}

/// Compare-and-swap a reservation's status.
///
/// The `status = $expected` predicate linearizes terminal transitions: the
/// first writer wins, any concurrent transition makes this a zero-row update.
async fn cas_reservation_status(
    tx: &mut Transaction<'_, Postgres>,
    reservation: &Reservation,
    expected: ReservationStatus,
) -> Result<(), StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE stock_reservations
        SET status = $1, updated_at = $2
        WHERE id = $3 AND tenant_id = $4 AND status = $5
        "#,
    )
    .bind(reservation.status.as_str())
    .bind(reservation.updated_at)
    .bind(reservation.id.0)
    .bind(reservation.tenant_id.as_uuid())
    .bind(expected.as_str())
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("cas_reservation_status", e))?;

    if result.rows_affected() != 1 {
        return Err(DomainError::concurrent_modification(format!(
            "reservation {} transitioned concurrently",
            reservation.id
        ))
        .into());
    }
    Ok(())
}

/// Map SQLx errors to store errors.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            if db_err.code().as_deref() == Some("23505") {
                // Unique violation: two writers raced bucket creation.
                DomainError::concurrent_modification(msg).into()
            } else {
                StoreError::Storage(msg)
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Storage(format!("connection pool closed in {operation}"))
        }
        other => StoreError::Storage(format!("sqlx error in {operation}: {other}")),
    }
}

/// A stored value that fails domain validation indicates a corrupt row — an
/// invariant violation, not a user error.
fn corrupt(what: &str, err: impl std::fmt::Display) -> StoreError {
    DomainError::invariant(format!("corrupt {what} row: {err}")).into()
}

// SQLx row types

#[derive(Debug)]
struct StockRecordRow {
    id: Uuid,
    tenant_id: Uuid,
    product_id: Uuid,
    variant_id: Option<Uuid>,
    warehouse_id: Option<Uuid>,
    batch_number: Option<String>,
    quantity: rust_decimal::Decimal,
    available_quantity: rust_decimal::Decimal,
    reserved_quantity: rust_decimal::Decimal,
    min_stock_level: rust_decimal::Decimal,
    reorder_point: Option<rust_decimal::Decimal>,
    average_cost: rust_decimal::Decimal,
    last_cost: rust_decimal::Decimal,
    total_value: rust_decimal::Decimal,
    status: String,
    last_movement_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, sqlx::postgres::PgRow> for StockRecordRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(StockRecordRow {
            id: row.try_get("id")?,
            tenant_id: row.try_get("tenant_id")?,
            product_id: row.try_get("product_id")?,
            variant_id: row.try_get("variant_id")?,
            warehouse_id: row.try_get("warehouse_id")?,
            batch_number: row.try_get("batch_number")?,
            quantity: row.try_get("quantity")?,
            available_quantity: row.try_get("available_quantity")?,
            reserved_quantity: row.try_get("reserved_quantity")?,
            min_stock_level: row.try_get("min_stock_level")?,
            reorder_point: row.try_get("reorder_point")?,
            average_cost: row.try_get("average_cost")?,
            last_cost: row.try_get("last_cost")?,
            total_value: row.try_get("total_value")?,
            status: row.try_get("status")?,
            last_movement_id: row.try_get("last_movement_id")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

fn decode_record(row: &sqlx::postgres::PgRow) -> Result<StockRecord, StoreError> {
    let row = StockRecordRow::from_row(row)
        .map_err(|e| StoreError::storage(format!("failed to read stock record row: {e}")))?;

    let mut key = StockKey::product(ProductId::from_uuid(row.product_id));
    key.variant_id = row.variant_id.map(VariantId::from_uuid);
    key.warehouse_id = row.warehouse_id.map(WarehouseId::from_uuid);
    key.batch_number = row.batch_number;

    Ok(StockRecord {
        id: StockRecordId::from_uuid(row.id),
        tenant_id: TenantId::from_uuid(row.tenant_id),
        key,
        quantity: Quantity::new(row.quantity).map_err(|e| corrupt("stock record", e))?,
        available_quantity: Quantity::new(row.available_quantity)
            .map_err(|e| corrupt("stock record", e))?,
        reserved_quantity: Quantity::new(row.reserved_quantity)
            .map_err(|e| corrupt("stock record", e))?,
        min_stock_level: Quantity::new(row.min_stock_level)
            .map_err(|e| corrupt("stock record", e))?,
        reorder_point: row
            .reorder_point
            .map(Quantity::new)
            .transpose()
            .map_err(|e| corrupt("stock record", e))?,
        average_cost: Money::new(row.average_cost).map_err(|e| corrupt("stock record", e))?,
        last_cost: Money::new(row.last_cost).map_err(|e| corrupt("stock record", e))?,
        total_value: Money::new(row.total_value).map_err(|e| corrupt("stock record", e))?,
        status: row
            .status
            .parse::<StockStatus>()
            .map_err(|e| corrupt("stock record", e))?,
        last_movement_id: row.last_movement_id.map(MovementId::from_uuid),
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

#[derive(Debug)]
struct MovementRow {
    id: Uuid,
    tenant_id: Uuid,
    stock_record_id: Uuid,
    kind: String,
    quantity: rust_decimal::Decimal,
    quantity_before: rust_decimal::Decimal,
    quantity_after: rust_decimal::Decimal,
    unit_cost: rust_decimal::Decimal,
    total_cost: rust_decimal::Decimal,
    reference_kind: String,
    reference_id: Uuid,
    actor_id: Uuid,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, sqlx::postgres::PgRow> for MovementRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(MovementRow {
            id: row.try_get("id")?,
            tenant_id: row.try_get("tenant_id")?,
            stock_record_id: row.try_get("stock_record_id")?,
            kind: row.try_get("kind")?,
            quantity: row.try_get("quantity")?,
            quantity_before: row.try_get("quantity_before")?,
            quantity_after: row.try_get("quantity_after")?,
            unit_cost: row.try_get("unit_cost")?,
            total_cost: row.try_get("total_cost")?,
            reference_kind: row.try_get("reference_kind")?,
            reference_id: row.try_get("reference_id")?,
            actor_id: row.try_get("actor_id")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

fn decode_movement(row: &sqlx::postgres::PgRow) -> Result<Movement, StoreError> {
    let row = MovementRow::from_row(row)
        .map_err(|e| StoreError::storage(format!("failed to read movement row: {e}")))?;

    Ok(Movement {
        id: MovementId::from_uuid(row.id),
        tenant_id: TenantId::from_uuid(row.tenant_id),
        stock_record_id: StockRecordId::from_uuid(row.stock_record_id),
        kind: row.kind.parse().map_err(|e| corrupt("movement", e))?,
        quantity: Quantity::new(row.quantity).map_err(|e| corrupt("movement", e))?,
        quantity_before: Quantity::new(row.quantity_before)
            .map_err(|e| corrupt("movement", e))?,
        quantity_after: Quantity::new(row.quantity_after).map_err(|e| corrupt("movement", e))?,
        unit_cost: Money::new(row.unit_cost).map_err(|e| corrupt("movement", e))?,
        total_cost: Money::new(row.total_cost).map_err(|e| corrupt("movement", e))?,
        reference: MovementReference::new(
            row.reference_kind
                .parse()
                .map_err(|e| corrupt("movement", e))?,
            row.reference_id,
        ),
        actor_id: stockforge_core::ActorId::from_uuid(row.actor_id),
        created_at: row.created_at,
    })
}

#[derive(Debug)]
struct ReservationRow {
    id: Uuid,
    tenant_id: Uuid,
    stock_record_id: Uuid,
    quantity: rust_decimal::Decimal,
    status: String,
    reference_kind: String,
    reference_id: Uuid,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, sqlx::postgres::PgRow> for ReservationRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(ReservationRow {
            id: row.try_get("id")?,
            tenant_id: row.try_get("tenant_id")?,
            stock_record_id: row.try_get("stock_record_id")?,
            quantity: row.try_get("quantity")?,
            status: row.try_get("status")?,
            reference_kind: row.try_get("reference_kind")?,
            reference_id: row.try_get("reference_id")?,
            expires_at: row.try_get("expires_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

fn decode_reservation(row: &sqlx::postgres::PgRow) -> Result<Reservation, StoreError> {
    let row = ReservationRow::from_row(row)
        .map_err(|e| StoreError::storage(format!("failed to read reservation row: {e}")))?;

    Ok(Reservation {
        id: ReservationId::from_uuid(row.id),
        tenant_id: TenantId::from_uuid(row.tenant_id),
        stock_record_id: StockRecordId::from_uuid(row.stock_record_id),
        quantity: Quantity::new(row.quantity).map_err(|e| corrupt("reservation", e))?,
        status: row.status.parse().map_err(|e| corrupt("reservation", e))?,
        reference: MovementReference::new(
            row.reference_kind
                .parse()
                .map_err(|e| corrupt("reservation", e))?,
            row.reference_id,
        ),
        expires_at: row.expires_at,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

// Bridge the sync store contract onto the async implementation.
//
// The trait is synchronous so domain callers stay storage-agnostic; Postgres
// operations require async. Calls must happen inside a tokio runtime context
// (this store normally lives behind async services anyway).

fn runtime_handle() -> Result<tokio::runtime::Handle, StoreError> {
    tokio::runtime::Handle::try_current().map_err(|_| {
        StoreError::storage(
            "PostgresStockLedger requires an async runtime (tokio); \
             call from within a tokio runtime context",
        )
    })
}

impl StockLedger for PostgresStockLedger {
    fn apply_movement(&self, cmd: ApplyMovement) -> Result<Movement, StoreError> {
        runtime_handle()?.block_on(self.apply_movement(cmd))
    }

    fn set_stock_levels(
        &self,
        tenant_id: TenantId,
        key: &StockKey,
        min_stock_level: Quantity,
        reorder_point: Option<Quantity>,
        occurred_at: DateTime<Utc>,
    ) -> Result<StockRecord, StoreError> {
        runtime_handle()?.block_on(self.set_stock_levels(
            tenant_id,
            key,
            min_stock_level,
            reorder_point,
            occurred_at,
        ))
    }

    fn current_stock(
        &self,
        tenant_id: TenantId,
        key: &StockKey,
    ) -> Result<Option<StockRecord>, StoreError> {
        runtime_handle()?.block_on(self.current_stock(tenant_id, key))
    }

    fn list_movements(
        &self,
        tenant_id: TenantId,
        key: &StockKey,
        range: TimeRange,
    ) -> Result<Vec<Movement>, StoreError> {
        runtime_handle()?.block_on(self.list_movements(tenant_id, key, range))
    }

    fn movements_by_reference(
        &self,
        tenant_id: TenantId,
        reference_id: Uuid,
    ) -> Result<Vec<Movement>, StoreError> {
        runtime_handle()?.block_on(self.movements_by_reference(tenant_id, reference_id))
    }

    fn reserve(&self, cmd: ReserveStock) -> Result<Reservation, StoreError> {
        runtime_handle()?.block_on(self.reserve(cmd))
    }

    fn confirm_reservation(&self, cmd: ConfirmReservation) -> Result<Movement, StoreError> {
        runtime_handle()?.block_on(self.confirm_reservation(cmd))
    }

    fn release_reservation(&self, cmd: ReleaseReservation) -> Result<Reservation, StoreError> {
        runtime_handle()?.block_on(self.release_reservation(cmd))
    }

    fn get_reservation(
        &self,
        tenant_id: TenantId,
        reservation_id: ReservationId,
    ) -> Result<Option<Reservation>, StoreError> {
        runtime_handle()?.block_on(self.get_reservation(tenant_id, reservation_id))
    }

    fn sweep_expired(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Reservation>, StoreError> {
        runtime_handle()?.block_on(self.sweep_expired(now, limit))
    }
}

#[async_trait::async_trait]
impl MovementQuery for PostgresStockLedger {
    async fn query_movements(
        &self,
        tenant_id: TenantId,
        filter: MovementFilter,
        pagination: Pagination,
    ) -> Result<MovementQueryResult, StoreError> {
        let product_id: Option<Uuid> = filter.key.as_ref().map(|k| *k.product_id.as_uuid());
        let variant_id: Option<Uuid> = filter
            .key
            .as_ref()
            .and_then(|k| k.variant_id.map(|v| *v.as_uuid()));
        let warehouse_id: Option<Uuid> = filter
            .key
            .as_ref()
            .and_then(|k| k.warehouse_id.map(|w| *w.as_uuid()));
        let batch_number: Option<&str> = filter
            .key
            .as_ref()
            .and_then(|k| k.batch_number.as_deref());
        let kind: Option<&str> = filter.kind.map(|k| k.as_str());

        const PREDICATE: &str = r#"
            m.tenant_id = $1
                AND ($2::uuid IS NULL OR (
                    r.product_id = $2
                    AND r.variant_id IS NOT DISTINCT FROM $3
                    AND r.warehouse_id IS NOT DISTINCT FROM $4
                    AND r.batch_number IS NOT DISTINCT FROM $5
                ))
                AND ($6::text IS NULL OR m.kind = $6)
                AND ($7::uuid IS NULL OR m.reference_id = $7)
                AND ($8::timestamptz IS NULL OR m.created_at >= $8)
                AND ($9::timestamptz IS NULL OR m.created_at < $9)
        "#;

        let count_row = sqlx::query(&format!(
            "SELECT COUNT(*) AS total FROM stock_movements m \
             JOIN stock_records r ON r.id = m.stock_record_id WHERE {PREDICATE}"
        ))
        .bind(tenant_id.as_uuid())
        .bind(product_id)
        .bind(variant_id)
        .bind(warehouse_id)
        .bind(batch_number)
        .bind(kind)
        .bind(filter.reference_id)
        .bind(filter.created_after)
        .bind(filter.created_before)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("count_movements", e))?;

        let total: i64 = count_row
            .try_get("total")
            .map_err(|e| StoreError::storage(format!("failed to read count: {e}")))?;

        let rows = sqlx::query(&format!(
            "SELECT {MOVEMENT_COLUMNS} FROM stock_movements m \
             JOIN stock_records r ON r.id = m.stock_record_id WHERE {PREDICATE} \
             ORDER BY m.seq ASC LIMIT $10 OFFSET $11"
        ))
        .bind(tenant_id.as_uuid())
        .bind(product_id)
        .bind(variant_id)
        .bind(warehouse_id)
        .bind(batch_number)
        .bind(kind)
        .bind(filter.reference_id)
        .bind(filter.created_after)
        .bind(filter.created_before)
        .bind(pagination.limit as i64)
        .bind(pagination.offset as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("query_movements", e))?;

        let movements = rows
            .iter()
            .map(decode_movement)
            .collect::<Result<Vec<_>, _>>()?;

        let has_more = total > (pagination.offset + pagination.limit) as i64;

        Ok(MovementQueryResult {
            movements,
            total: total as u64,
            pagination,
            has_more,
        })
    }
}
