//! Immutable movement records: the append-only audit trail of the ledger.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stockforge_core::{ActorId, DomainError, DomainResult, Money, Quantity, TenantId};

use crate::stock::StockRecordId;

/// Movement identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MovementId(pub Uuid);

impl MovementId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for MovementId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MovementId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which way a movement moves stock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementDirection {
    Inbound,
    Outbound,
}

/// Closed set of movement kinds.
///
/// Movements are stored as unsigned magnitudes; the kind implies the sign.
/// Extending this set is a versioned schema change (add a variant, bump the
/// record version) — kinds are persisted as text, never as a database-native
/// enum that would require online type mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementKind {
    /// Opening balance into a new bucket.
    Initial,
    /// Generic receipt.
    In,
    /// Generic issue.
    Out,
    AdjustmentIn,
    AdjustmentOut,
    TransferIn,
    TransferOut,
    Sale,
    Purchase,
    /// Customer brought goods back; stock increases.
    ReturnCustomer,
    /// Goods sent back to the supplier; stock decreases.
    ReturnSupplier,
    Damage,
    Expiry,
}

impl MovementKind {
    pub fn direction(self) -> MovementDirection {
        match self {
            MovementKind::Initial
            | MovementKind::In
            | MovementKind::AdjustmentIn
            | MovementKind::TransferIn
            | MovementKind::Purchase
            | MovementKind::ReturnCustomer => MovementDirection::Inbound,
            MovementKind::Out
            | MovementKind::AdjustmentOut
            | MovementKind::TransferOut
            | MovementKind::Sale
            | MovementKind::ReturnSupplier
            | MovementKind::Damage
            | MovementKind::Expiry => MovementDirection::Outbound,
        }
    }

    pub fn is_inbound(self) -> bool {
        self.direction() == MovementDirection::Inbound
    }

    pub fn is_outbound(self) -> bool {
        self.direction() == MovementDirection::Outbound
    }

    /// Stable text form used for persistence.
    pub fn as_str(self) -> &'static str {
        match self {
            MovementKind::Initial => "initial",
            MovementKind::In => "in",
            MovementKind::Out => "out",
            MovementKind::AdjustmentIn => "adjustment_in",
            MovementKind::AdjustmentOut => "adjustment_out",
            MovementKind::TransferIn => "transfer_in",
            MovementKind::TransferOut => "transfer_out",
            MovementKind::Sale => "sale",
            MovementKind::Purchase => "purchase",
            MovementKind::ReturnCustomer => "return_customer",
            MovementKind::ReturnSupplier => "return_supplier",
            MovementKind::Damage => "damage",
            MovementKind::Expiry => "expiry",
        }
    }
}

impl FromStr for MovementKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initial" => Ok(MovementKind::Initial),
            "in" => Ok(MovementKind::In),
            "out" => Ok(MovementKind::Out),
            "adjustment_in" => Ok(MovementKind::AdjustmentIn),
            "adjustment_out" => Ok(MovementKind::AdjustmentOut),
            "transfer_in" => Ok(MovementKind::TransferIn),
            "transfer_out" => Ok(MovementKind::TransferOut),
            "sale" => Ok(MovementKind::Sale),
            "purchase" => Ok(MovementKind::Purchase),
            "return_customer" => Ok(MovementKind::ReturnCustomer),
            "return_supplier" => Ok(MovementKind::ReturnSupplier),
            "damage" => Ok(MovementKind::Damage),
            "expiry" => Ok(MovementKind::Expiry),
            other => Err(DomainError::validation(format!(
                "unknown movement kind '{other}'"
            ))),
        }
    }
}

/// Kind of the upstream document that caused a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    Sale,
    Purchase,
    Adjustment,
    Transfer,
    Return,
}

impl ReferenceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ReferenceKind::Sale => "sale",
            ReferenceKind::Purchase => "purchase",
            ReferenceKind::Adjustment => "adjustment",
            ReferenceKind::Transfer => "transfer",
            ReferenceKind::Return => "return",
        }
    }
}

impl FromStr for ReferenceKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sale" => Ok(ReferenceKind::Sale),
            "purchase" => Ok(ReferenceKind::Purchase),
            "adjustment" => Ok(ReferenceKind::Adjustment),
            "transfer" => Ok(ReferenceKind::Transfer),
            "return" => Ok(ReferenceKind::Return),
            other => Err(DomainError::validation(format!(
                "unknown reference kind '{other}'"
            ))),
        }
    }
}

/// Causal reference: which sale/purchase/adjustment produced a change.
///
/// A weak reference into an external collaborator's domain — the engine never
/// dereferences it, only records and indexes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementReference {
    pub kind: ReferenceKind,
    pub id: Uuid,
}

impl MovementReference {
    pub fn new(kind: ReferenceKind, id: Uuid) -> Self {
        Self { kind, id }
    }
}

/// Immutable fact of one committed quantity change.
///
/// Written exactly once, in the same transaction as the bucket update it
/// describes. Never updated or deleted — corrections are new compensating
/// movements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movement {
    pub id: MovementId,
    pub tenant_id: TenantId,
    pub stock_record_id: StockRecordId,
    pub kind: MovementKind,
    /// Unsigned magnitude of the delta; `kind` implies the sign.
    pub quantity: Quantity,
    pub quantity_before: Quantity,
    pub quantity_after: Quantity,
    /// Supplied cost for inbound kinds; the bucket's moving average at commit
    /// time for outbound kinds.
    pub unit_cost: Money,
    pub total_cost: Money,
    pub reference: MovementReference,
    pub actor_id: ActorId,
    pub created_at: DateTime<Utc>,
}

impl Movement {
    /// Check that the before/after snapshot agrees with the signed delta.
    pub fn verify_chain(&self) -> DomainResult<()> {
        if !self.quantity.is_positive() {
            return Err(DomainError::invariant(format!(
                "movement {} has non-positive quantity {}",
                self.id, self.quantity
            )));
        }

        let expected = match self.kind.direction() {
            MovementDirection::Inbound => self.quantity_before.checked_add(self.quantity),
            MovementDirection::Outbound => self.quantity_before.checked_sub(self.quantity),
        };

        match expected {
            Some(after) if after == self.quantity_after => Ok(()),
            _ => Err(DomainError::invariant(format!(
                "movement {} snapshot mismatch: {} {} {} != {}",
                self.id,
                self.quantity_before,
                match self.kind.direction() {
                    MovementDirection::Inbound => "+",
                    MovementDirection::Outbound => "-",
                },
                self.quantity,
                self.quantity_after
            ))),
        }
    }
}

/// Replay a bucket's movements from an empty bucket.
///
/// Movements must be supplied in commit order. Each link is verified against
/// its own snapshot and against the running quantity; the returned value is
/// the reconstructed current quantity.
pub fn replay_quantity<'a, I>(movements: I) -> DomainResult<Quantity>
where
    I: IntoIterator<Item = &'a Movement>,
{
    let mut current = Quantity::ZERO;
    for movement in movements {
        movement.verify_chain()?;
        if movement.quantity_before != current {
            return Err(DomainError::invariant(format!(
                "movement {} breaks the chain: expected quantity_before {}, found {}",
                movement.id, current, movement.quantity_before
            )));
        }
        current = movement.quantity_after;
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn movement(
        kind: MovementKind,
        quantity: u64,
        before: u64,
        after: u64,
    ) -> Movement {
        Movement {
            id: MovementId::new(),
            tenant_id: TenantId::new(),
            stock_record_id: StockRecordId::new(),
            kind,
            quantity: Quantity::from(quantity),
            quantity_before: Quantity::from(before),
            quantity_after: Quantity::from(after),
            unit_cost: Money::from(10),
            total_cost: Money::from(10 * quantity),
            reference: MovementReference::new(ReferenceKind::Adjustment, Uuid::now_v7()),
            actor_id: ActorId::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn chain_verification_accepts_consistent_snapshots() {
        movement(MovementKind::In, 5, 0, 5).verify_chain().unwrap();
        movement(MovementKind::Sale, 3, 5, 2).verify_chain().unwrap();
    }

    #[test]
    fn chain_verification_rejects_bad_snapshots() {
        assert!(movement(MovementKind::In, 5, 0, 6).verify_chain().is_err());
        assert!(movement(MovementKind::Sale, 3, 5, 3).verify_chain().is_err());
    }

    #[test]
    fn replay_reconstructs_quantity() {
        let chain = vec![
            movement(MovementKind::Initial, 10, 0, 10),
            movement(MovementKind::Sale, 4, 10, 6),
            movement(MovementKind::Purchase, 2, 6, 8),
        ];
        assert_eq!(replay_quantity(&chain).unwrap(), Quantity::from(8));
    }

    #[test]
    fn replay_rejects_discontinuity() {
        let chain = vec![
            movement(MovementKind::Initial, 10, 0, 10),
            movement(MovementKind::Sale, 4, 9, 5),
        ];
        assert!(replay_quantity(&chain).is_err());
    }

    #[test]
    fn kind_text_form_round_trips() {
        for kind in [
            MovementKind::Initial,
            MovementKind::In,
            MovementKind::Out,
            MovementKind::AdjustmentIn,
            MovementKind::AdjustmentOut,
            MovementKind::TransferIn,
            MovementKind::TransferOut,
            MovementKind::Sale,
            MovementKind::Purchase,
            MovementKind::ReturnCustomer,
            MovementKind::ReturnSupplier,
            MovementKind::Damage,
            MovementKind::Expiry,
        ] {
            assert_eq!(kind.as_str().parse::<MovementKind>().unwrap(), kind);
        }
        assert!("restock".parse::<MovementKind>().is_err());
    }
}
