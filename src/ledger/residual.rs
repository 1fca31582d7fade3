/**
 * DOMAIN LAYER - Small-Residual Absorption
 *
 * When the outstanding payable is positive but below the gateway's
 * minimum charge, the platform absorbs it as a discount rather than
 * attempt a charge the gateway would refuse (§4.8).
 */

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::Result;

use super::builder::TransactionBuilder;

/// If `excess_credit * 100 <= gateway_min_charge_cents`, spread the
/// residual across every ticket's current outstanding balance as an
/// `[absorb-small-payments]` discount. No-op otherwise.
pub fn absorb_if_below_minimum(builder: &mut TransactionBuilder, gateway_min_charge_cents: i64) -> Result<()> {
    let excess = builder.excess_credit();
    if excess <= Decimal::ZERO {
        return Ok(());
    }

    let excess_cents = excess * Decimal::ONE_HUNDRED;
    if excess_cents > Decimal::from(gateway_min_charge_cents) {
        return Ok(());
    }

    let ticket_ids: Vec<Uuid> = builder.ticket_ids();
    builder.apply_discount_to_tickets(&ticket_ids, excess, "[absorb-small-payments]")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::model::{CreatorScope, Ticket, TicketStatus};
    use crate::ledger::model::{Creator, ItemType, TransactionItem};
    use rust_decimal_macros::dec;

    fn builder_with_ticket(price: Decimal) -> (TransactionBuilder, Uuid) {
        let mut b = TransactionBuilder::new(Creator { scope: CreatorScope::User, id: Uuid::new_v4() }, true, true, "sale");
        let ticket_id = Uuid::new_v4();
        b.seed_for_test(
            ticket_id,
            Ticket {
                id: ticket_id,
                user_id: Uuid::new_v4(),
                trip_id: Uuid::new_v4(),
                board_stop_id: Uuid::new_v4(),
                alight_stop_id: Uuid::new_v4(),
                status: TicketStatus::Pending,
                notes: Default::default(),
            },
            price,
        );
        (b, ticket_id)
    }

    #[test]
    fn absorbs_residual_under_the_gateway_minimum() {
        let (mut b, _) = builder_with_ticket(dec!(0.30));
        absorb_if_below_minimum(&mut b, 50).unwrap();
        assert_eq!(b.excess_credit(), Decimal::ZERO);
    }

    #[test]
    fn leaves_residual_above_the_gateway_minimum_untouched() {
        let (mut b, _) = builder_with_ticket(dec!(5.00));
        absorb_if_below_minimum(&mut b, 50).unwrap();
        assert_eq!(b.excess_credit(), dec!(5.00));
    }
}
