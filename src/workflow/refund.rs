/**
 * WORKFLOW LAYER - RefundWorkflow
 *
 * Ticket and route-pass refunds (§4.7): produce a `refundPayment`
 * Transaction, flip the refunded entity to `refunded`, and size the
 * gateway-side refund via `generate_refund_info`. Runs at the default
 * READ COMMITTED isolation since it reads an already-committed origin
 * transaction and writes disjoint rows, guarded by the all-or-nothing
 * equality check (§5).
 */

use std::sync::Arc;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::{AdminRoleChecker, Credentials};
use crate::db::{begin_with_isolation, IsolationLevel};
use crate::error::{AppError, Result};
use crate::gateway::{self, PaymentGatewayAdapter, RefundRequest};
use crate::ledger::builder::TransactionBuilder;
use crate::ledger::model::{Charge, Creator, RoutePassStatus, TicketStatus, TransactionType};
use crate::repository::route_passes::RoutePassRepository;
use crate::repository::tickets::TicketRepository;
use crate::repository::transactions::TransactionRepository;

/// `generateRefundInfo`'s output (§4.7): everything the caller needs to
/// actually issue the gateway-side refund against `charge`.
pub struct RefundInfo {
    pub processing_fee: Decimal,
    pub charge: Charge,
    pub is_micro: bool,
    pub balance_amt_cents: i64,
    pub amount: Decimal,
    pub idempotency_key: String,
}

/// Fetches the Charge behind `payment_resource`, verifies it still
/// holds enough balance, and computes the processing-fee delta the
/// refund releases back (§4.7).
pub async fn generate_refund_info(
    gateway: &dyn PaymentGatewayAdapter,
    payment_resource: &str,
    amount: Decimal,
    is_micro: bool,
    idempotency_key: String,
) -> Result<RefundInfo> {
    let charge = gateway.retrieve_charge(payment_resource).await?;
    let is_local_and_non_amex = gateway.is_local_and_non_amex(&charge.source);
    let balance_cents = charge.amount_cents - charge.amount_refunded_cents;
    let amount_cents = (amount * Decimal::ONE_HUNDRED)
        .round()
        .to_i64()
        .ok_or_else(|| AppError::Internal("refund amount does not fit in cents".into()))?;

    if (balance_cents as f64) < (amount_cents as f64 - 0.1) {
        return Err(AppError::Transaction(format!(
            "charge {} balance {} cents is insufficient to refund {} cents",
            charge.id, balance_cents, amount_cents
        )));
    }

    let fee_before = gateway.calculate_admin_fee_in_cents(balance_cents, is_micro, is_local_and_non_amex);
    let fee_after = gateway.calculate_admin_fee_in_cents(balance_cents - amount_cents, is_micro, is_local_and_non_amex);
    let processing_fee = Decimal::from(fee_before - fee_after) / Decimal::ONE_HUNDRED;

    Ok(RefundInfo { processing_fee, charge, is_micro, balance_amt_cents: balance_cents, amount, idempotency_key })
}

pub struct RefundWorkflow {
    pool: PgPool,
    instance_tag: String,
    ticket_repo: TicketRepository,
    pass_repo: RoutePassRepository,
    transaction_repo: TransactionRepository,
    admin_checker: Arc<dyn AdminRoleChecker>,
}

impl RefundWorkflow {
    pub fn new(
        pool: PgPool,
        instance_tag: String,
        ticket_repo: TicketRepository,
        pass_repo: RoutePassRepository,
        transaction_repo: TransactionRepository,
        admin_checker: Arc<dyn AdminRoleChecker>,
    ) -> Self {
        Self { pool, instance_tag, ticket_repo, pass_repo, transaction_repo, admin_checker }
    }

    /// All-or-nothing: the caller-requested `requested_amount` must equal
    /// `ticketSale.credit - ticket.notes.discountValue` within 1e-4, or
    /// this raises before anything is mutated (§4.7, §8 scenario 5).
    pub async fn refund_ticket(
        &self,
        credentials: &Credentials,
        ticket_id: Uuid,
        company_id: Uuid,
        requested_amount: Decimal,
        creator: Creator,
        gateway: &dyn PaymentGatewayAdapter,
    ) -> Result<RefundInfo> {
        self.admin_checker.assert_admin_role(credentials, "refundTicket", company_id).await?;

        let mut tx = begin_with_isolation(&self.pool, IsolationLevel::ReadCommitted).await?;

        let ticket = self
            .ticket_repo
            .get_tx(&mut tx, ticket_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("ticket {} not found", ticket_id)))?;
        if !matches!(ticket.status, TicketStatus::Valid | TicketStatus::Void) {
            return Err(AppError::Transaction(format!("ticket {} is not refundable from status", ticket_id)));
        }

        let sale_transaction_id = self
            .transaction_repo
            .find_sale_transaction_id_for_ticket(ticket_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("no sale transaction found for ticket {}", ticket_id)))?;
        let sale_credit = self
            .transaction_repo
            .ticket_sale_credit(ticket_id)
            .await?
            .ok_or_else(|| AppError::Internal(format!("ticket {} has no ticketSale item", ticket_id)))?;

        let price_after_discount = sale_credit - ticket.notes.discount_value;
        if (requested_amount - price_after_discount).abs() > Decimal::new(1, 4) {
            return Err(AppError::Transaction("requires requested refund to equal ticket value after discounts".into()));
        }
        let target_amt = price_after_discount;

        let previously_refunded = self.transaction_repo.sum_refunded_for_ticket(ticket_id).await?;
        if previously_refunded + target_amt > price_after_discount + Decimal::new(1, 4) {
            return Err(AppError::Transaction("requires requested refund to equal ticket value after discounts".into()));
        }

        let payment = self
            .transaction_repo
            .get_payment_for_transaction(&mut tx, sale_transaction_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("no payment found for transaction {}", sale_transaction_id)))?;
        let payment_resource = payment
            .payment_resource
            .clone()
            .ok_or_else(|| AppError::Transaction("original payment has no gateway charge to refund".into()))?;

        let idempotency_key = gateway::idempotency_key_for_ticket_refund(&self.instance_tag, ticket_id);
        let refund_info = generate_refund_info(gateway, &payment_resource, target_amt, payment.options.is_micro, idempotency_key.clone()).await?;

        let mut builder = TransactionBuilder::new(creator, true, false, format!("refund ticket {}", ticket_id));
        builder.add_ticket_refund_item(ticket_id, target_amt, ticket.status);
        builder.finalize_for_refund(company_id);
        let built = builder.build(TransactionType::RefundPayment)?;

        let refund_transaction_id = self.transaction_repo.insert(&mut tx, &built).await?;
        self.transaction_repo.mark_committed(&mut tx, refund_transaction_id).await?;
        self.ticket_repo.set_status(&mut tx, ticket_id, TicketStatus::Refunded).await?;
        self.ticket_repo.set_refunded_transaction_id(&mut tx, ticket_id, refund_transaction_id).await?;

        tx.commit().await?;

        gateway
            .refund(RefundRequest { charge_id: payment_resource, amount: target_amt, idempotency_key: refund_info.idempotency_key.clone() })
            .await?;

        Ok(refund_info)
    }

    /// Only passes in status `valid|void|expired` may be refunded
    /// (§4.7).
    pub async fn refund_route_pass(
        &self,
        credentials: &Credentials,
        route_pass_id: Uuid,
        company_id: Uuid,
        creator: Creator,
        gateway: &dyn PaymentGatewayAdapter,
    ) -> Result<RefundInfo> {
        self.admin_checker.assert_admin_role(credentials, "refundRoutePass", company_id).await?;

        let mut tx = begin_with_isolation(&self.pool, IsolationLevel::ReadCommitted).await?;

        let pass = self
            .pass_repo
            .get_tx(&mut tx, route_pass_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("route pass {} not found", route_pass_id)))?;
        if !matches!(pass.status, RoutePassStatus::Valid | RoutePassStatus::Void | RoutePassStatus::Expired) {
            return Err(AppError::Transaction(format!("route pass {} is not refundable from status", route_pass_id)));
        }

        let purchase_transaction_id = self
            .transaction_repo
            .find_purchase_transaction_id_for_route_pass(route_pass_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("no purchase transaction found for route pass {}", route_pass_id)))?;

        let target_amt = pass.notes.price - pass.notes.discount_value;

        let payment = self
            .transaction_repo
            .get_payment_for_transaction(&mut tx, purchase_transaction_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("no payment found for transaction {}", purchase_transaction_id)))?;
        let payment_resource = payment
            .payment_resource
            .clone()
            .ok_or_else(|| AppError::Transaction("original payment has no gateway charge to refund".into()))?;

        let idempotency_key = gateway::idempotency_key_for_route_pass_refund(&self.instance_tag, route_pass_id);
        let refund_info = generate_refund_info(gateway, &payment_resource, target_amt, payment.options.is_micro, idempotency_key.clone()).await?;

        let mut builder = TransactionBuilder::new(creator, true, false, format!("refund route pass {}", route_pass_id));
        builder.add_route_pass_refund_item(route_pass_id, target_amt, pass.status);
        builder.finalize_for_refund(company_id);
        let built = builder.build(TransactionType::RefundPayment)?;

        let refund_transaction_id = self.transaction_repo.insert(&mut tx, &built).await?;
        self.transaction_repo.mark_committed(&mut tx, refund_transaction_id).await?;
        self.pass_repo.set_status(&mut tx, route_pass_id, RoutePassStatus::Refunded).await?;
        self.pass_repo.set_refunded_transaction_id(&mut tx, route_pass_id, refund_transaction_id).await?;

        tx.commit().await?;

        gateway
            .refund(RefundRequest { charge_id: payment_resource, amount: target_amt, idempotency_key: refund_info.idempotency_key.clone() })
            .await?;

        Ok(refund_info)
    }
}
