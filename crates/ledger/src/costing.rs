//! Moving weighted-average costing.
//!
//! Applies only to inbound movements; outbound movements leave the average
//! untouched and are valued at the average current at commit time.

use stockforge_core::{DomainError, DomainResult, Money, Quantity};

/// Cost state of a bucket after an inbound receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CostBasis {
    pub average_cost: Money,
    pub total_value: Money,
}

/// Blend the existing average with an incoming receipt, weighted by quantity.
///
/// `total_value` accumulates (existing value + incoming value) so that the
/// inbound path carries no rounding drift; the average is derived from it at
/// fixed precision. A zero incoming quantity leaves the average unchanged.
pub fn next_average_cost(
    quantity_before: Quantity,
    average_cost_before: Money,
    incoming_quantity: Quantity,
    incoming_unit_cost: Money,
) -> DomainResult<CostBasis> {
    let existing_value = average_cost_before
        .extend(quantity_before)
        .ok_or_else(|| DomainError::invariant("existing valuation overflow"))?;

    if incoming_quantity.is_zero() {
        return Ok(CostBasis {
            average_cost: average_cost_before,
            total_value: existing_value,
        });
    }

    let quantity_after = quantity_before
        .checked_add(incoming_quantity)
        .ok_or_else(|| DomainError::invariant("quantity overflow"))?;

    let incoming_value = incoming_unit_cost
        .extend(incoming_quantity)
        .ok_or_else(|| DomainError::invariant("incoming valuation overflow"))?;

    let total_value = existing_value
        .checked_add(incoming_value)
        .ok_or_else(|| DomainError::invariant("total valuation overflow"))?;

    let average_cost = if quantity_after.is_zero() {
        incoming_unit_cost
    } else {
        total_value
            .per_unit(quantity_after)
            .ok_or_else(|| DomainError::invariant("average cost division failed"))?
    };

    Ok(CostBasis {
        average_cost,
        total_value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn first_receipt_sets_the_average() {
        let basis = next_average_cost(
            Quantity::ZERO,
            Money::ZERO,
            Quantity::from(100),
            Money::parse("50.00").unwrap(),
        )
        .unwrap();

        assert_eq!(basis.average_cost.as_decimal(), dec!(50.0000));
        assert_eq!(basis.total_value.as_decimal(), dec!(5000.0000));
    }

    #[test]
    fn second_receipt_blends_by_quantity() {
        let basis = next_average_cost(
            Quantity::from(100),
            Money::parse("50.00").unwrap(),
            Quantity::from(50),
            Money::parse("60.00").unwrap(),
        )
        .unwrap();

        // (100 * 50 + 50 * 60) / 150
        assert_eq!(basis.average_cost.as_decimal(), dec!(53.3333));
        assert_eq!(basis.total_value.as_decimal(), dec!(8000.0000));
    }

    #[test]
    fn zero_incoming_quantity_leaves_average_unchanged() {
        let average = Money::parse("53.3333").unwrap();
        let basis = next_average_cost(
            Quantity::from(150),
            average,
            Quantity::ZERO,
            Money::parse("99.99").unwrap(),
        )
        .unwrap();

        assert_eq!(basis.average_cost, average);
    }

    #[test]
    fn fractional_quantities_blend_at_fixed_precision() {
        let basis = next_average_cost(
            Quantity::parse("2.5").unwrap(),
            Money::parse("10.00").unwrap(),
            Quantity::parse("7.5").unwrap(),
            Money::parse("12.00").unwrap(),
        )
        .unwrap();

        // (2.5 * 10 + 7.5 * 12) / 10 = 11.5
        assert_eq!(basis.average_cost.as_decimal(), dec!(11.5000));
        assert_eq!(basis.total_value.as_decimal(), dec!(115.0000));
    }
}
