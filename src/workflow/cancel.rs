/**
 * WORKFLOW LAYER - CancelSaleWorkflow
 *
 * `cancelSale` (§4.10): reverse a committed ticket-purchase Transaction,
 * e.g. after a gateway-decline discovered out of band. Its own module
 * rather than a `SaleWorkflow` method, since it is a distinct
 * SERIALIZABLE operation with its own entry point (SPEC_FULL supplement).
 */

use sqlx::PgPool;
use uuid::Uuid;

use crate::db::{begin_with_isolation, IsolationLevel};
use crate::error::{AppError, Result};
use crate::ledger::model::{ItemType, TicketStatus};
use crate::repository::tickets::TicketRepository;
use crate::repository::transactions::TransactionRepository;

pub struct CancelSaleWorkflow {
    pool: PgPool,
    ticket_repo: TicketRepository,
    transaction_repo: TransactionRepository,
}

impl CancelSaleWorkflow {
    pub fn new(pool: PgPool, ticket_repo: TicketRepository, transaction_repo: TransactionRepository) -> Self {
        Self { pool, ticket_repo, transaction_repo }
    }

    /// Every `ticketSale` ticket on the transaction must currently be
    /// `valid`, or the whole operation fails before anything is mutated.
    pub async fn cancel_sale(&self, transaction_id: Uuid) -> Result<()> {
        let mut tx = begin_with_isolation(&self.pool, IsolationLevel::Serializable).await?;

        let transaction = self
            .transaction_repo
            .get_with_items_tx(&mut tx, transaction_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("transaction {} not found", transaction_id)))?;

        if !transaction.committed {
            return Err(AppError::Transaction(format!("transaction {} is not committed", transaction_id)));
        }

        let ticket_ids: Vec<Uuid> = transaction
            .items
            .iter()
            .filter(|item| item.item_type == ItemType::TicketSale)
            .filter_map(|item| item.item_id)
            .collect();

        for ticket_id in &ticket_ids {
            let ticket = self
                .ticket_repo
                .get_tx(&mut tx, *ticket_id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("ticket {} not found", ticket_id)))?;
            if ticket.status != TicketStatus::Valid {
                return Err(AppError::Transaction(format!("ticket {} is not valid, cannot cancel", ticket_id)));
            }
        }

        for ticket_id in &ticket_ids {
            self.ticket_repo.set_status(&mut tx, *ticket_id, TicketStatus::Failed).await?;
        }
        self.transaction_repo.set_committed(&mut tx, transaction_id, false).await?;

        tx.commit().await?;
        Ok(())
    }
}
