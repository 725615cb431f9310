//! Reservations: expiring holds against available quantity.

use core::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stockforge_core::{ActorId, DomainError, DomainResult, Entity, Quantity, TenantId};
use stockforge_ledger::{MovementReference, StockKey, StockRecordId};

/// Reservation identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReservationId(pub Uuid);

impl ReservationId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for ReservationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ReservationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reservation lifecycle.
///
/// `Active` is the only source state; the three terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Active,
    /// Consumed into a committed outbound movement.
    Confirmed,
    /// Explicitly cancelled; held quantity returned to available.
    Released,
    /// Swept after `expires_at`; same quantity effect as Released.
    Expired,
}

impl ReservationStatus {
    pub fn is_active(self) -> bool {
        matches!(self, ReservationStatus::Active)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }

    /// Stable text form used for persistence.
    pub fn as_str(self) -> &'static str {
        match self {
            ReservationStatus::Active => "active",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::Released => "released",
            ReservationStatus::Expired => "expired",
        }
    }
}

impl FromStr for ReservationStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ReservationStatus::Active),
            "confirmed" => Ok(ReservationStatus::Confirmed),
            "released" => Ok(ReservationStatus::Released),
            "expired" => Ok(ReservationStatus::Expired),
            other => Err(DomainError::validation(format!(
                "unknown reservation status '{other}'"
            ))),
        }
    }
}

/// Command: take a hold on a bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveStock {
    pub tenant_id: TenantId,
    pub key: StockKey,
    pub quantity: Quantity,
    pub reference: MovementReference,
    /// How long the hold lives before the sweeper may expire it.
    pub ttl: Duration,
    pub occurred_at: DateTime<Utc>,
}

impl ReserveStock {
    pub fn expires_at(&self) -> DomainResult<DateTime<Utc>> {
        let ttl = chrono::Duration::from_std(self.ttl)
            .map_err(|e| DomainError::validation(format!("reservation ttl: {e}")))?;
        self.occurred_at
            .checked_add_signed(ttl)
            .ok_or_else(|| DomainError::validation("reservation ttl overflows the calendar"))
    }
}

/// Command: consume an active hold into a committed sale movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmReservation {
    pub tenant_id: TenantId,
    pub reservation_id: ReservationId,
    pub actor_id: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: cancel an active hold, returning the quantity to available.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseReservation {
    pub tenant_id: TenantId,
    pub reservation_id: ReservationId,
    pub occurred_at: DateTime<Utc>,
}

/// A temporary claim against a bucket's available quantity.
///
/// Back-references its bucket by id only; the bucket's lifecycle is
/// independent of its reservations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub tenant_id: TenantId,
    pub stock_record_id: StockRecordId,
    pub quantity: Quantity,
    pub status: ReservationStatus,
    pub reference: MovementReference,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity for Reservation {
    type Id = ReservationId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl Reservation {
    pub fn new(
        id: ReservationId,
        tenant_id: TenantId,
        stock_record_id: StockRecordId,
        quantity: Quantity,
        reference: MovementReference,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if !quantity.is_positive() {
            return Err(DomainError::validation(
                "reservation quantity must be positive",
            ));
        }
        Ok(Self {
            id,
            tenant_id,
            stock_record_id,
            quantity,
            status: ReservationStatus::Active,
            reference,
            expires_at,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }

    /// Active → Confirmed.
    ///
    /// An active hold past `expires_at` is rejected even before the sweeper
    /// has visited it: a sale must never complete against stock that is
    /// already eligible for reallocation. The caller expires the hold.
    pub fn try_confirm(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if !self.status.is_active() {
            return Err(DomainError::invalid_state(format!(
                "cannot confirm reservation {} in state {}",
                self.id,
                self.status.as_str()
            )));
        }
        if self.is_expired(now) {
            return Err(DomainError::invalid_state(format!(
                "reservation {} expired at {}",
                self.id, self.expires_at
            )));
        }
        self.status = ReservationStatus::Confirmed;
        self.updated_at = now;
        Ok(())
    }

    /// Active → Released. Returns `false` (no-op, not an error) when the
    /// reservation is already Released or Expired.
    pub fn try_release(&mut self, now: DateTime<Utc>) -> DomainResult<bool> {
        match self.status {
            ReservationStatus::Active => {
                self.status = ReservationStatus::Released;
                self.updated_at = now;
                Ok(true)
            }
            ReservationStatus::Released | ReservationStatus::Expired => Ok(false),
            ReservationStatus::Confirmed => Err(DomainError::invalid_state(format!(
                "cannot release confirmed reservation {}",
                self.id
            ))),
        }
    }

    /// Active-and-overdue → Expired. Returns `false` for everything else so
    /// a sweep racing a confirm/release is a no-op on the loser's side.
    pub fn try_expire(&mut self, now: DateTime<Utc>) -> bool {
        if self.status.is_active() && self.is_expired(now) {
            self.status = ReservationStatus::Expired;
            self.updated_at = now;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockforge_ledger::ReferenceKind;

    fn active_reservation(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> Reservation {
        Reservation::new(
            ReservationId::new(),
            TenantId::new(),
            StockRecordId::new(),
            Quantity::from(3),
            MovementReference::new(ReferenceKind::Sale, Uuid::now_v7()),
            expires_at,
            now,
        )
        .unwrap()
    }

    #[test]
    fn confirm_consumes_an_active_unexpired_hold() {
        let now = Utc::now();
        let mut r = active_reservation(now + chrono::Duration::minutes(5), now);
        r.try_confirm(now).unwrap();
        assert_eq!(r.status, ReservationStatus::Confirmed);
    }

    #[test]
    fn confirm_rejects_an_overdue_hold_the_sweeper_missed() {
        let now = Utc::now();
        let mut r = active_reservation(now - chrono::Duration::seconds(1), now);
        let err = r.try_confirm(now).unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
        // Untouched: the store decides to expire it, not this guard.
        assert_eq!(r.status, ReservationStatus::Active);
    }

    #[test]
    fn release_is_idempotent_on_terminal_release_states() {
        let now = Utc::now();
        let mut r = active_reservation(now + chrono::Duration::minutes(5), now);
        assert!(r.try_release(now).unwrap());
        assert!(!r.try_release(now).unwrap());
        assert_eq!(r.status, ReservationStatus::Released);
    }

    #[test]
    fn release_of_a_confirmed_hold_is_a_caller_error() {
        let now = Utc::now();
        let mut r = active_reservation(now + chrono::Duration::minutes(5), now);
        r.try_confirm(now).unwrap();
        assert!(matches!(
            r.try_release(now).unwrap_err(),
            DomainError::InvalidState(_)
        ));
    }

    #[test]
    fn expire_only_fires_on_overdue_active_holds() {
        let now = Utc::now();
        let mut fresh = active_reservation(now + chrono::Duration::minutes(5), now);
        assert!(!fresh.try_expire(now));

        let mut overdue = active_reservation(now - chrono::Duration::seconds(1), now);
        assert!(overdue.try_expire(now));
        assert_eq!(overdue.status, ReservationStatus::Expired);
        // Losing side of a race: no further transition.
        assert!(!overdue.try_expire(now));
    }

    #[test]
    fn zero_quantity_reservations_are_rejected() {
        let now = Utc::now();
        let err = Reservation::new(
            ReservationId::new(),
            TenantId::new(),
            StockRecordId::new(),
            Quantity::ZERO,
            MovementReference::new(ReferenceKind::Sale, Uuid::now_v7()),
            now,
            now,
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn ttl_produces_the_expiry_instant() {
        let now = Utc::now();
        let cmd = ReserveStock {
            tenant_id: TenantId::new(),
            key: StockKey::product(stockforge_core::ProductId::new()),
            quantity: Quantity::from(1),
            reference: MovementReference::new(ReferenceKind::Sale, Uuid::now_v7()),
            ttl: Duration::from_secs(300),
            occurred_at: now,
        };
        assert_eq!(cmd.expires_at().unwrap(), now + chrono::Duration::seconds(300));
    }
}
