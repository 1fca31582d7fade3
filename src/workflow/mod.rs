/**
 * WORKFLOW LAYER
 *
 * Orchestrators that wrap the ledger builder in a DB transaction at a
 * declared isolation level, invoke the payment gateway, and run
 * compensating undo actions on failure (§4.5-§4.7, §5).
 */

pub mod cancel;
pub mod refund;
pub mod route_pass_purchase;
pub mod sale;

use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::{begin_with_isolation, IsolationLevel};
use crate::error::Result;
use crate::gateway::{ChargeRequest, PaymentGatewayAdapter};
use crate::ledger::builder::UndoOp;
use crate::ledger::model::{Charge, TicketStatus};
use crate::repository::route_passes::RoutePassRepository;
use crate::repository::tickets::TicketRepository;
use crate::repository::transactions::TransactionRepository;

/// Replays `undo_stack` in reverse under a fresh DB transaction at
/// READ COMMITTED; each individual undo is idempotent (§5, §9). Runs
/// after the workflow's own transaction has already rolled back or
/// committed, so this is the ledger's only remaining lever to restore
/// pre-sale entity state.
pub async fn run_undo(
    pool: &PgPool,
    ticket_repo: &TicketRepository,
    pass_repo: &RoutePassRepository,
    undo_stack: &[UndoOp],
) -> Result<()> {
    let mut tx = begin_with_isolation(pool, IsolationLevel::ReadCommitted).await?;
    for op in undo_stack.iter().rev() {
        match op {
            UndoOp::MarkTicketFailed(ticket_id) => {
                ticket_repo.set_status(&mut tx, *ticket_id, TicketStatus::Failed).await?;
            }
            UndoOp::RestoreTicketStatus(ticket_id, prior) => {
                ticket_repo.set_status(&mut tx, *ticket_id, *prior).await?;
            }
            UndoOp::RestoreRoutePassStatus(pass_id, prior) => {
                pass_repo.set_status(&mut tx, *pass_id, *prior).await?;
            }
        }
    }
    tx.commit().await?;
    Ok(())
}

/// Charges the card for an already-persisted transaction and records
/// the outcome onto its Payment row (§4.9 "ChargeSale outcome
/// persistence"). Does not touch Ticket/RoutePass status - callers
/// decide what a successful or failed charge means for the entities
/// they manage.
pub async fn settle_charge(
    pool: &PgPool,
    transaction_repo: &TransactionRepository,
    gateway: &dyn PaymentGatewayAdapter,
    transaction_id: Uuid,
    payment_amount: Decimal,
    description: String,
    statement_descriptor: String,
    destination: String,
    idempotency_key: String,
    source: Option<String>,
) -> Result<Charge> {
    let charge_result = gateway
        .charge_card(ChargeRequest {
            value: payment_amount,
            description,
            statement_descriptor,
            destination,
            idempotency_key,
            source,
            customer: None,
        })
        .await;

    let mut tx = begin_with_isolation(pool, IsolationLevel::ReadCommitted).await?;
    match charge_result {
        Ok(charge) => {
            let data = serde_json::json!({
                "id": charge.id,
                "amount_cents": charge.amount_cents,
                "amount_refunded_cents": charge.amount_refunded_cents,
                "source": charge.source,
            });
            transaction_repo
                .insert_payment(&mut tx, transaction_id, Some(&charge.id), &data, gateway.is_micro(charge.amount_cents))
                .await?;
            transaction_repo.mark_committed(&mut tx, transaction_id).await?;
            tx.commit().await?;
            Ok(charge)
        }
        Err(err) => {
            let data = serde_json::json!({ "error": err.to_string() });
            transaction_repo.insert_payment(&mut tx, transaction_id, None, &data, false).await?;
            tx.commit().await?;
            Err(err)
        }
    }
}
