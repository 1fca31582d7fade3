/**
 * REPOSITORY LAYER - Ticket Data Access
 *
 * Only talks to the `tickets` table; the business rules around when a
 * ticket may transition between statuses live in `ledger` and
 * `workflow`, not here (§3 Ticket lifecycle).
 */

use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Row, Transaction as DbTransaction};
use uuid::Uuid;

use crate::ledger::model::{Ticket, TicketNotes, TicketStatus};

#[derive(Clone)]
pub struct TicketRepository {
    pool: PgPool,
}

impl TicketRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert_pending(
        &self,
        tx: &mut DbTransaction<'_, Postgres>,
        trip_id: Uuid,
        user_id: Uuid,
        board_stop_id: Uuid,
        alight_stop_id: Uuid,
    ) -> Result<Uuid, sqlx::Error> {
        sqlx::query_scalar(
            r#"INSERT INTO tickets (trip_id, user_id, board_stop_id, alight_stop_id, status, discount_value)
               VALUES ($1, $2, $3, $4, 'pending', 0)
               RETURNING id"#,
        )
        .bind(trip_id)
        .bind(user_id)
        .bind(board_stop_id)
        .bind(alight_stop_id)
        .fetch_one(&mut **tx)
        .await
    }

    /// Has `user_id` already got a `valid` or `pending` ticket for
    /// `trip_id` (§4.4 noDuplicates)? Returns the conflicting ticket id
    /// when one exists, so the caller can name it in the error per
    /// §8 scenario 6.
    pub async fn existing_active_ticket(
        &self,
        tx: &mut DbTransaction<'_, Postgres>,
        user_id: Uuid,
        trip_id: Uuid,
    ) -> Result<Option<Uuid>, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT id FROM tickets WHERE user_id = $1 AND trip_id = $2 AND status IN ('valid', 'pending') LIMIT 1",
        )
        .bind(user_id)
        .bind(trip_id)
        .fetch_optional(&mut **tx)
        .await
    }

    pub async fn set_status(
        &self,
        tx: &mut DbTransaction<'_, Postgres>,
        ticket_id: Uuid,
        status: TicketStatus,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE tickets SET status = $2 WHERE id = $1")
            .bind(ticket_id)
            .bind(status_str(status))
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    pub async fn set_status_pooled(&self, ticket_id: Uuid, status: TicketStatus) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE tickets SET status = $2 WHERE id = $1")
            .bind(ticket_id)
            .bind(status_str(status))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_discount_value(
        &self,
        tx: &mut DbTransaction<'_, Postgres>,
        ticket_id: Uuid,
        discount_value: Decimal,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE tickets SET discount_value = $2 WHERE id = $1")
            .bind(ticket_id)
            .bind(discount_value)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    pub async fn set_refunded_transaction_id(
        &self,
        tx: &mut DbTransaction<'_, Postgres>,
        ticket_id: Uuid,
        transaction_id: Uuid,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE tickets SET refunded_transaction_id = $2 WHERE id = $1")
            .bind(ticket_id)
            .bind(transaction_id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    pub async fn get(&self, ticket_id: Uuid) -> Result<Option<Ticket>, sqlx::Error> {
        let row = sqlx::query(
            r#"SELECT id, user_id, trip_id, board_stop_id, alight_stop_id, status,
                      discount_value, refunded_transaction_id
               FROM tickets WHERE id = $1"#,
        )
        .bind(ticket_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_ticket))
    }

    pub async fn get_tx(
        &self,
        tx: &mut DbTransaction<'_, Postgres>,
        ticket_id: Uuid,
    ) -> Result<Option<Ticket>, sqlx::Error> {
        let row = sqlx::query(
            r#"SELECT id, user_id, trip_id, board_stop_id, alight_stop_id, status,
                      discount_value, refunded_transaction_id
               FROM tickets WHERE id = $1 FOR UPDATE"#,
        )
        .bind(ticket_id)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(row.as_ref().map(row_to_ticket))
    }
}

fn status_str(status: TicketStatus) -> &'static str {
    match status {
        TicketStatus::Pending => "pending",
        TicketStatus::Valid => "valid",
        TicketStatus::Void => "void",
        TicketStatus::Failed => "failed",
        TicketStatus::Refunded => "refunded",
    }
}

fn status_from_str(s: &str) -> TicketStatus {
    match s {
        "valid" => TicketStatus::Valid,
        "void" => TicketStatus::Void,
        "failed" => TicketStatus::Failed,
        "refunded" => TicketStatus::Refunded,
        _ => TicketStatus::Pending,
    }
}

fn row_to_ticket(row: &sqlx::postgres::PgRow) -> Ticket {
    Ticket {
        id: row.get("id"),
        user_id: row.get("user_id"),
        trip_id: row.get("trip_id"),
        board_stop_id: row.get("board_stop_id"),
        alight_stop_id: row.get("alight_stop_id"),
        status: status_from_str(row.get::<String, _>("status").as_str()),
        notes: TicketNotes {
            discount_value: row.get("discount_value"),
            refunded_transaction_id: row.get("refunded_transaction_id"),
        },
    }
}
