/**
 * DOMAIN LAYER - Transaction Builder
 *
 * TransactionBuilder: accumulates typed line items and finalizes them
 * into a zero-sum, balanced journal entry while reconciling
 * promotions, route-pass redemptions, and payment rounding (§4.1).
 *
 * Modeled as a plain struct mutated through `&mut self`, with the
 * promotion/route-pass appliers as free functions over `&mut
 * TransactionBuilder` (§9) rather than trait objects - there is exactly
 * one implementation of each stage, so dynamic dispatch buys nothing.
 */

use std::collections::HashMap;

use rust_decimal::Decimal;
use sqlx::{Postgres, Transaction as DbTransaction};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::repository::{route_passes::RoutePassRepository, tickets::TicketRepository, trips::TripRepository};

use super::model::{
    Creator, ItemType, RequestedTrip, RoutePass, RoutePassNotes, RoutePassStatus, Ticket, TicketStatus,
    TransactionItem, TransactionType, Trip,
};

/// A recorded compensating action. The builder records one of these
/// for every write to entity state that a DB rollback alone would not
/// undo cleanly once the caller has already observed it (§5, §9).
#[derive(Debug, Clone)]
pub enum UndoOp {
    /// A ticket was created `pending` this build; if the surrounding
    /// workflow fails downstream of persistence, mark it `failed`
    /// instead of leaving it `pending` forever.
    MarkTicketFailed(Uuid),
    RestoreTicketStatus(Uuid, TicketStatus),
    RestoreRoutePassStatus(Uuid, RoutePassStatus),
}

/// Rounds to the nearest cent, matching the discount-allocation policy
/// in §4.1 ("all amounts rounded to the nearest cent").
pub fn round_cent(amount: Decimal) -> Decimal {
    amount.round_dp(2)
}

/// The in-memory accumulator. One instance is built up over the course
/// of a workflow and consumed by [`TransactionBuilder::build`].
pub struct TransactionBuilder {
    items: Vec<TransactionItem>,
    tickets: HashMap<Uuid, Ticket>,
    trips_by_id: HashMap<Uuid, Trip>,
    route_passes: HashMap<Uuid, RoutePass>,
    /// Outstanding (not-yet-discounted) amount per ticket, keyed by
    /// ticket id. Drives proportional discount allocation (§4.1) and
    /// route-pass redemption caps (§4.3).
    outstanding_tickets: HashMap<Uuid, Decimal>,
    outstanding_route_passes: HashMap<Uuid, Decimal>,
    undo_stack: Vec<UndoOp>,
    description: String,
    creator: Creator,
    committed: bool,
    dry_run: bool,
}

/// What `build` hands back to the workflow: the balanced Transaction
/// plus everything the workflow needs to persist it and to construct
/// the undo closure.
pub struct BuiltLedger {
    pub transaction_type: TransactionType,
    pub description: String,
    pub creator: Creator,
    pub committed: bool,
    pub dry_run: bool,
    pub items: Vec<TransactionItem>,
    pub tickets: HashMap<Uuid, Ticket>,
    pub route_passes: HashMap<Uuid, RoutePass>,
    pub undo_stack: Vec<UndoOp>,
}

impl TransactionBuilder {
    pub fn new(creator: Creator, committed: bool, dry_run: bool, description: impl Into<String>) -> Self {
        Self {
            items: Vec::new(),
            tickets: HashMap::new(),
            trips_by_id: HashMap::new(),
            route_passes: HashMap::new(),
            outstanding_tickets: HashMap::new(),
            outstanding_route_passes: HashMap::new(),
            undo_stack: Vec::new(),
            description: description.into(),
            creator,
            committed,
            dry_run,
        }
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn trip(&self, trip_id: Uuid) -> Option<&Trip> {
        self.trips_by_id.get(&trip_id)
    }

    pub fn tickets(&self) -> impl Iterator<Item = &Ticket> {
        self.tickets.values()
    }

    pub fn route_passes(&self) -> impl Iterator<Item = &RoutePass> {
        self.route_passes.values()
    }

    pub fn ticket_ids(&self) -> Vec<Uuid> {
        self.tickets.keys().copied().collect()
    }

    pub fn route_pass_ids(&self) -> Vec<Uuid> {
        self.route_passes.keys().copied().collect()
    }

    /// Load each requested trip, create a pending Ticket for it (unless
    /// dry-run), and push the matching `ticketSale` credit line (§4.1).
    pub async fn init_for_ticket_sale(
        &mut self,
        tx: &mut DbTransaction<'_, Postgres>,
        trip_repo: &TripRepository,
        ticket_repo: &TicketRepository,
        requested: &[RequestedTrip],
    ) -> Result<()> {
        for req in requested {
            let trip = trip_repo
                .get_for_update(tx, req.trip_id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("trip {} not found", req.trip_id)))?;

            let ticket_id = if self.dry_run {
                Uuid::new_v4()
            } else {
                let id = ticket_repo
                    .insert_pending(tx, req.trip_id, req.user_id, req.board_stop_id, req.alight_stop_id)
                    .await?;
                trip_repo.decrement_seat(tx, req.trip_id).await?;
                id
            };

            let ticket = Ticket {
                id: ticket_id,
                user_id: req.user_id,
                trip_id: req.trip_id,
                board_stop_id: req.board_stop_id,
                alight_stop_id: req.alight_stop_id,
                status: TicketStatus::Pending,
                notes: Default::default(),
            };

            self.outstanding_tickets.insert(ticket_id, trip.price);
            self.items.push(TransactionItem::credit(
                ItemType::TicketSale,
                Some(ticket_id),
                trip.price,
                format!("ticket sale: trip {}", req.trip_id),
            ));
            self.undo_stack.push(UndoOp::MarkTicketFailed(ticket_id));
            self.tickets.insert(ticket_id, ticket);
            self.trips_by_id.entry(trip.id).or_insert(trip);
        }
        Ok(())
    }

    /// Insert `quantity` new `valid` RoutePass rows priced at `price`
    /// and push one `routePass` credit line per pass (§4.6). Returns
    /// the new pass ids.
    pub async fn init_for_route_pass_purchase(
        &mut self,
        tx: &mut DbTransaction<'_, Postgres>,
        pass_repo: &RoutePassRepository,
        user_id: Uuid,
        company_id: Uuid,
        tag: &str,
        price: Decimal,
        quantity: i32,
    ) -> Result<Vec<Uuid>> {
        let mut ids = Vec::with_capacity(quantity.max(0) as usize);
        for _ in 0..quantity {
            let pass_id = if self.dry_run {
                Uuid::new_v4()
            } else {
                pass_repo.insert_valid(tx, user_id, company_id, tag, price).await?
            };

            self.outstanding_route_passes.insert(pass_id, price);
            self.items.push(TransactionItem::credit(
                ItemType::RoutePass,
                Some(pass_id),
                price,
                format!("route pass purchase: {}", tag),
            ));
            self.route_passes.insert(
                pass_id,
                RoutePass {
                    id: pass_id,
                    user_id,
                    company_id,
                    tag: tag.to_string(),
                    status: RoutePassStatus::Valid,
                    notes: RoutePassNotes { price, discount_value: Decimal::ZERO, refunded_transaction_id: None },
                },
            );
            ids.push(pass_id);
        }
        Ok(ids)
    }

    /// Same allocation policy as [`apply_discount_to_tickets`](Self::apply_discount_to_tickets),
    /// but against route passes purchased in this same builder (§4.2
    /// scope `RoutePass`).
    pub fn apply_discount_to_route_passes(&mut self, target_pass_ids: &[Uuid], total: Decimal, kind: &str) -> Result<()> {
        if total <= Decimal::ZERO || target_pass_ids.is_empty() {
            return Ok(());
        }

        let outstanding: Vec<Decimal> = target_pass_ids
            .iter()
            .map(|id| {
                self.outstanding_route_passes
                    .get(id)
                    .copied()
                    .ok_or_else(|| AppError::Internal(format!("route pass {} not tracked by builder", id)))
            })
            .collect::<Result<_>>()?;

        let pool: Decimal = outstanding.iter().sum();
        if pool <= Decimal::ZERO {
            return Err(AppError::Transaction(format!(
                "cannot apply {} discount: no outstanding balance left to discount",
                kind
            )));
        }

        let mut allocated_so_far = Decimal::ZERO;
        for (idx, pass_id) in target_pass_ids.iter().enumerate() {
            let is_last = idx == target_pass_ids.len() - 1;
            let allocation = if is_last {
                total - allocated_so_far
            } else {
                round_cent(total * outstanding[idx] / pool)
            };
            allocated_so_far += allocation;

            let outstanding_amt = self.outstanding_route_passes.get_mut(pass_id).unwrap();
            *outstanding_amt -= allocation;

            if let Some(pass) = self.route_passes.get_mut(pass_id) {
                pass.notes.discount_value += allocation;
            }
        }

        self.items.push(TransactionItem::debit(ItemType::Discount, None, total, kind));
        Ok(())
    }

    /// Record a route-pass redemption: the pass covers up to
    /// `allocation` of `ticket_id`'s outstanding balance, transitions
    /// `valid -> void`, and gets a matching undo entry (§4.3). Returns
    /// the amount actually allocated (capped by the ticket's current
    /// outstanding balance).
    pub fn redeem_route_pass_for_ticket(&mut self, mut pass: RoutePass, ticket_id: Uuid) -> Result<Decimal> {
        let outstanding = *self
            .outstanding_tickets
            .get(&ticket_id)
            .ok_or_else(|| AppError::Internal(format!("ticket {} not tracked by builder", ticket_id)))?;

        let allocation = round_cent(pass.notes.price.min(outstanding));
        if allocation <= Decimal::ZERO {
            return Ok(Decimal::ZERO);
        }

        self.outstanding_tickets.insert(ticket_id, outstanding - allocation);
        if let Some(ticket) = self.tickets.get_mut(&ticket_id) {
            ticket.notes.discount_value += allocation;
        }

        self.undo_stack.push(UndoOp::RestoreRoutePassStatus(pass.id, pass.status));
        pass.status = RoutePassStatus::Void;

        self.items.push(TransactionItem::debit(
            ItemType::Discount,
            Some(ticket_id),
            allocation,
            format!("route pass {} redeemed: {}", pass.tag, pass.id),
        ));

        self.route_passes.insert(pass.id, pass);
        Ok(allocation)
    }

    /// Distribute `total` proportionally across `target_ticket_ids` by
    /// their current outstanding balance, the last target absorbing
    /// rounding so allocations sum to exactly `total` (§4.1's
    /// discount-allocation policy). Pushes one `discount` debit line
    /// for the total and writes each allocation onto the ticket's
    /// cumulative `notes.discountValue`.
    pub fn apply_discount_to_tickets(&mut self, target_ticket_ids: &[Uuid], total: Decimal, kind: &str) -> Result<()> {
        if total <= Decimal::ZERO || target_ticket_ids.is_empty() {
            return Ok(());
        }

        let outstanding: Vec<Decimal> = target_ticket_ids
            .iter()
            .map(|id| {
                self.outstanding_tickets
                    .get(id)
                    .copied()
                    .ok_or_else(|| AppError::Internal(format!("ticket {} not tracked by builder", id)))
            })
            .collect::<Result<_>>()?;

        let pool: Decimal = outstanding.iter().sum();
        if pool <= Decimal::ZERO {
            return Err(AppError::Transaction(format!(
                "cannot apply {} discount: no outstanding balance left to discount",
                kind
            )));
        }

        let mut allocated_so_far = Decimal::ZERO;
        for (idx, ticket_id) in target_ticket_ids.iter().enumerate() {
            let is_last = idx == target_ticket_ids.len() - 1;
            let allocation = if is_last {
                total - allocated_so_far
            } else {
                round_cent(total * outstanding[idx] / pool)
            };
            allocated_so_far += allocation;

            let outstanding_amt = self.outstanding_tickets.get_mut(ticket_id).unwrap();
            *outstanding_amt -= allocation;

            if let Some(ticket) = self.tickets.get_mut(ticket_id) {
                ticket.notes.discount_value += allocation;
            }
        }

        self.items.push(TransactionItem::debit(ItemType::Discount, None, total, kind));
        Ok(())
    }

    /// Sum of the current outstanding (not-yet-discounted) balance
    /// across `ticket_ids`, for callers that need to size a
    /// percentage-based discount before calling
    /// [`apply_discount_to_tickets`](Self::apply_discount_to_tickets).
    pub fn outstanding_total(&self, ticket_ids: &[Uuid]) -> Decimal {
        ticket_ids.iter().filter_map(|id| self.outstanding_tickets.get(id)).sum()
    }

    /// Route-pass counterpart of [`outstanding_total`](Self::outstanding_total).
    pub fn outstanding_route_pass_total(&self, pass_ids: &[Uuid]) -> Decimal {
        pass_ids.iter().filter_map(|id| self.outstanding_route_passes.get(id)).sum()
    }

    /// Current `Σ credit − Σ debit` across every item accumulated so
    /// far (§4.1 `_excessCredit`).
    pub fn excess_credit(&self) -> Decimal {
        self.items.iter().map(|i| i.signed_amount()).sum()
    }

    /// Finalize the single payment/transfer/COGS triple against
    /// `company_id`. Guarantees the final zero-sum (§4.1).
    pub fn finalize_for_payment(&mut self, company_id: Uuid) {
        let excess = round_cent(self.excess_credit());
        if excess > Decimal::ZERO {
            self.items.push(TransactionItem::debit(ItemType::Payment, None, excess, "card payment"));
            self.items.push(TransactionItem::credit(ItemType::Transfer, Some(company_id), excess, "transfer to company"));
            self.items.push(TransactionItem::debit(ItemType::Account, None, excess, "cost of goods sold"));
        }
    }

    /// Pushes the `ticketRefund` debit line for a ticket refund and
    /// records the undo that restores its prior status (§4.7).
    pub fn add_ticket_refund_item(&mut self, ticket_id: Uuid, amount: Decimal, prior_status: TicketStatus) {
        self.undo_stack.push(UndoOp::RestoreTicketStatus(ticket_id, prior_status));
        self.items.push(TransactionItem::debit(ItemType::TicketRefund, Some(ticket_id), amount, format!("refund ticket {}", ticket_id)));
    }

    /// Pushes the `routePass` debit line for a route-pass refund and
    /// records the undo that restores its prior status (§4.7).
    pub fn add_route_pass_refund_item(&mut self, pass_id: Uuid, amount: Decimal, prior_status: RoutePassStatus) {
        self.undo_stack.push(UndoOp::RestoreRoutePassStatus(pass_id, prior_status));
        self.items.push(TransactionItem::debit(ItemType::RoutePass, Some(pass_id), amount, format!("refund route pass {}", pass_id)));
    }

    /// Mirror image of [`finalize_for_payment`](Self::finalize_for_payment)
    /// for a refund Transaction: when the accumulated items net to a
    /// debit (money owed back to the customer), appends `payment`
    /// credit, `transfer` debit (reversed out of `company_id`), and
    /// `account` credit mirroring it, again guaranteeing zero-sum.
    pub fn finalize_for_refund(&mut self, company_id: Uuid) {
        let excess = round_cent(self.excess_credit());
        if excess < Decimal::ZERO {
            let owed = -excess;
            self.items.push(TransactionItem::credit(ItemType::Payment, None, owed, "refund to card"));
            self.items.push(TransactionItem::debit(ItemType::Transfer, Some(company_id), owed, "transfer reversal from company"));
            self.items.push(TransactionItem::credit(ItemType::Account, None, owed, "cost of goods sold reversal"));
        }
    }

    /// Validate zero-sum and hand back everything the workflow needs
    /// to persist the Transaction and build its undo function.
    pub fn build(self, transaction_type: TransactionType) -> Result<BuiltLedger> {
        let total: Decimal = self.items.iter().map(|i| i.signed_amount()).sum();
        if total.abs() >= Decimal::new(1, 6) {
            return Err(AppError::Internal(format!(
                "zero-sum invariant violated: signed total {} != 0",
                total
            )));
        }

        Ok(BuiltLedger {
            transaction_type,
            description: self.description,
            creator: self.creator,
            committed: self.committed,
            dry_run: self.dry_run,
            items: self.items,
            tickets: self.tickets,
            route_passes: self.route_passes,
            undo_stack: self.undo_stack,
        })
    }
}

#[cfg(test)]
impl TransactionBuilder {
    /// Seeds a ticket-sale item directly, bypassing `init_for_ticket_sale`'s
    /// DB round-trip, for unit tests in other modules that need a builder
    /// already carrying outstanding tickets.
    pub fn seed_for_test(&mut self, ticket_id: Uuid, ticket: Ticket, price: Decimal) {
        self.outstanding_tickets.insert(ticket_id, price);
        self.tickets.insert(ticket_id, ticket);
        self.items.push(TransactionItem::credit(ItemType::TicketSale, Some(ticket_id), price, "ticket sale"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn test_creator() -> Creator {
        Creator { scope: super::super::model::CreatorScope::User, id: Uuid::new_v4() }
    }

    fn seed_ticket(builder: &mut TransactionBuilder, ticket_id: Uuid, price: Decimal) {
        builder.outstanding_tickets.insert(ticket_id, price);
        builder.tickets.insert(
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
        );
        builder.items.push(TransactionItem::credit(ItemType::TicketSale, Some(ticket_id), price, "ticket sale"));
    }

    #[test]
    fn two_ticket_sale_is_zero_sum_and_balanced() {
        let mut b = TransactionBuilder::new(test_creator(), true, true, "sale");
        let t1 = Uuid::new_v4();
        let t2 = Uuid::new_v4();
        seed_ticket(&mut b, t1, dec!(5.00));
        seed_ticket(&mut b, t2, dec!(10.00));

        assert_eq!(b.excess_credit(), dec!(15.00));
        b.finalize_for_payment(Uuid::new_v4());
        assert_eq!(b.excess_credit(), dec!(0));

        let built = b.build(TransactionType::TicketPurchase).unwrap();
        let total: Decimal = built.items.iter().map(|i| i.signed_amount()).sum();
        assert_eq!(total, Decimal::ZERO);
    }

    #[test]
    fn promo_discount_allocates_proportionally_with_last_cent_rounding() {
        let mut b = TransactionBuilder::new(test_creator(), true, true, "sale");
        let t1 = Uuid::new_v4();
        let t2 = Uuid::new_v4();
        seed_ticket(&mut b, t1, dec!(5.00));
        seed_ticket(&mut b, t2, dec!(10.00));

        b.apply_discount_to_tickets(&[t1, t2], dec!(3.00), "promo:SAVE20").unwrap();

        assert_eq!(b.tickets().find(|t| t.id == t1).unwrap().notes.discount_value, dec!(1.00));
        assert_eq!(b.tickets().find(|t| t.id == t2).unwrap().notes.discount_value, dec!(2.00));
        assert_eq!(b.excess_credit(), dec!(12.00));
    }

    #[test]
    fn route_pass_redemption_caps_at_outstanding_and_voids_pass() {
        let mut b = TransactionBuilder::new(test_creator(), true, true, "sale");
        let t1 = Uuid::new_v4();
        seed_ticket(&mut b, t1, dec!(5.00));

        let pass = RoutePass {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            company_id: Uuid::new_v4(),
            tag: "downtown".into(),
            status: RoutePassStatus::Valid,
            notes: super::super::model::RoutePassNotes { price: dec!(5.00), discount_value: Decimal::ZERO, refunded_transaction_id: None },
        };

        let allocated = b.redeem_route_pass_for_ticket(pass, t1).unwrap();
        assert_eq!(allocated, dec!(5.00));
        assert_eq!(b.excess_credit(), dec!(0.00));
        assert_eq!(b.route_passes().next().unwrap().status, RoutePassStatus::Void);
    }

    #[test]
    fn build_rejects_non_zero_sum() {
        let mut b = TransactionBuilder::new(test_creator(), true, true, "broken");
        b.items.push(TransactionItem::credit(ItemType::TicketSale, None, dec!(5.00), "x"));
        assert!(b.build(TransactionType::TicketPurchase).is_err());
    }
}
