/**
 * REPOSITORY LAYER - Transaction / TransactionItem / Payment Data Access
 *
 * Persists the balanced journal entries a TransactionBuilder produces,
 * and the Payment rows that record a gateway charge against one (§3).
 */

use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::{PgPool, Postgres, Row, Transaction as DbTransaction};
use uuid::Uuid;

use crate::ledger::builder::BuiltLedger;
use crate::ledger::model::{
    Creator, CreatorScope, ItemType, Payment, PaymentOptions, Transaction, TransactionItem, TransactionType,
};

#[derive(Clone)]
pub struct TransactionRepository {
    pool: PgPool,
}

impl TransactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert the Transaction row and every TransactionItem it carries,
    /// in the same DB transaction the rest of the workflow is using.
    pub async fn insert(&self, tx: &mut DbTransaction<'_, Postgres>, built: &BuiltLedger) -> Result<Uuid, sqlx::Error> {
        let transaction_id: Uuid = sqlx::query_scalar(
            r#"INSERT INTO transactions (transaction_type, committed, description, created_by_scope, created_by_id)
               VALUES ($1, $2, $3, $4, $5)
               RETURNING id"#,
        )
        .bind(transaction_type_str(built.transaction_type))
        .bind(built.committed)
        .bind(&built.description)
        .bind(creator_scope_str(built.creator.scope))
        .bind(built.creator.id)
        .fetch_one(&mut **tx)
        .await?;

        for item in &built.items {
            sqlx::query(
                r#"INSERT INTO transaction_items (transaction_id, item_type, item_id, debit, credit, notes)
                   VALUES ($1, $2, $3, $4, $5, $6)"#,
            )
            .bind(transaction_id)
            .bind(item_type_str(&item.item_type))
            .bind(item.item_id)
            .bind(item.debit)
            .bind(item.credit)
            .bind(&item.notes)
            .execute(&mut **tx)
            .await?;
        }

        Ok(transaction_id)
    }

    pub async fn mark_committed(&self, tx: &mut DbTransaction<'_, Postgres>, transaction_id: Uuid) -> Result<(), sqlx::Error> {
        self.set_committed(tx, transaction_id, true).await
    }

    pub async fn set_committed(&self, tx: &mut DbTransaction<'_, Postgres>, transaction_id: Uuid, committed: bool) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE transactions SET committed = $2 WHERE id = $1")
            .bind(transaction_id)
            .bind(committed)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    pub async fn insert_payment(
        &self,
        tx: &mut DbTransaction<'_, Postgres>,
        transaction_id: Uuid,
        payment_resource: Option<&str>,
        data: &Value,
        is_micro: bool,
    ) -> Result<Uuid, sqlx::Error> {
        sqlx::query_scalar(
            r#"INSERT INTO payments (transaction_id, payment_resource, data, is_micro)
               VALUES ($1, $2, $3, $4)
               RETURNING id"#,
        )
        .bind(transaction_id)
        .bind(payment_resource)
        .bind(data)
        .bind(is_micro)
        .fetch_one(&mut **tx)
        .await
    }

    pub async fn get_payment_for_transaction(&self, tx: &mut DbTransaction<'_, Postgres>, transaction_id: Uuid) -> Result<Option<Payment>, sqlx::Error> {
        let row = sqlx::query(
            r#"SELECT id, transaction_id, payment_resource, data, is_micro
               FROM payments WHERE transaction_id = $1"#,
        )
        .bind(transaction_id)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(row.as_ref().map(row_to_payment))
    }

    pub async fn get_with_items(&self, transaction_id: Uuid) -> Result<Option<Transaction>, sqlx::Error> {
        let Some(header) = sqlx::query(
            r#"SELECT id, transaction_type, committed, description, created_by_scope, created_by_id
               FROM transactions WHERE id = $1"#,
        )
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let item_rows = sqlx::query(
            r#"SELECT item_type, item_id, debit, credit, notes, transaction_id
               FROM transaction_items WHERE transaction_id = $1"#,
        )
        .bind(transaction_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(row_to_transaction(&header, item_rows)))
    }

    pub async fn get_with_items_tx(
        &self,
        tx: &mut DbTransaction<'_, Postgres>,
        transaction_id: Uuid,
    ) -> Result<Option<Transaction>, sqlx::Error> {
        let Some(header) = sqlx::query(
            r#"SELECT id, transaction_type, committed, description, created_by_scope, created_by_id
               FROM transactions WHERE id = $1 FOR UPDATE"#,
        )
        .bind(transaction_id)
        .fetch_optional(&mut **tx)
        .await?
        else {
            return Ok(None);
        };

        let item_rows = sqlx::query(
            r#"SELECT item_type, item_id, debit, credit, notes, transaction_id
               FROM transaction_items WHERE transaction_id = $1"#,
        )
        .bind(transaction_id)
        .fetch_all(&mut **tx)
        .await?;

        Ok(Some(row_to_transaction(&header, item_rows)))
    }

    /// The Transaction whose `ticketSale` item references `ticket_id`
    /// (§4.7: the original sale a ticket refund reverses).
    pub async fn find_sale_transaction_id_for_ticket(&self, ticket_id: Uuid) -> Result<Option<Uuid>, sqlx::Error> {
        sqlx::query_scalar("SELECT transaction_id FROM transaction_items WHERE item_type = 'ticket_sale' AND item_id = $1")
            .bind(ticket_id)
            .fetch_optional(&self.pool)
            .await
    }

    /// The Transaction whose `routePass` item references `route_pass_id`.
    pub async fn find_purchase_transaction_id_for_route_pass(&self, route_pass_id: Uuid) -> Result<Option<Uuid>, sqlx::Error> {
        sqlx::query_scalar("SELECT transaction_id FROM transaction_items WHERE item_type = 'route_pass' AND item_id = $1")
            .bind(route_pass_id)
            .fetch_optional(&self.pool)
            .await
    }

    /// The `ticketSale` credit amount originally posted for `ticket_id`.
    pub async fn ticket_sale_credit(&self, ticket_id: Uuid) -> Result<Option<Decimal>, sqlx::Error> {
        sqlx::query_scalar("SELECT credit FROM transaction_items WHERE item_type = 'ticket_sale' AND item_id = $1")
            .bind(ticket_id)
            .fetch_optional(&self.pool)
            .await
    }

    /// The `routePass` credit amount originally posted for `route_pass_id`.
    pub async fn route_pass_sale_credit(&self, route_pass_id: Uuid) -> Result<Option<Decimal>, sqlx::Error> {
        sqlx::query_scalar("SELECT credit FROM transaction_items WHERE item_type = 'route_pass' AND item_id = $1")
            .bind(route_pass_id)
            .fetch_optional(&self.pool)
            .await
    }

    /// Previously-refunded total against one ticket, for the all-or-
    /// nothing bound check (§3 invariant 5, §4.7).
    pub async fn sum_refunded_for_ticket(&self, ticket_id: Uuid) -> Result<Decimal, sqlx::Error> {
        let rows = sqlx::query_scalar::<_, Decimal>(
            "SELECT COALESCE(SUM(debit), 0) FROM transaction_items WHERE item_type = 'ticket_refund' AND item_id = $1",
        )
        .bind(ticket_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(rows)
    }

    /// `Σ credit − Σ debit` restricted to one `item_type`, used by the
    /// refund workflow to recompute the original payment/fee amounts
    /// (§4.7).
    pub async fn sum_by_item_type(&self, transaction_id: Uuid, item_type: ItemType) -> Result<Decimal, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT debit, credit FROM transaction_items WHERE transaction_id = $1 AND item_type = $2",
        )
        .bind(transaction_id)
        .bind(item_type_str(&item_type))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| r.get::<Decimal, _>("credit") - r.get::<Decimal, _>("debit"))
            .sum())
    }
}

fn transaction_type_str(t: TransactionType) -> &'static str {
    match t {
        TransactionType::TicketPurchase => "ticket_purchase",
        TransactionType::RoutePassPurchase => "route_pass_purchase",
        TransactionType::RefundPayment => "refund_payment",
        TransactionType::Cancellation => "cancellation",
    }
}

fn transaction_type_from_str(s: &str) -> TransactionType {
    match s {
        "route_pass_purchase" => TransactionType::RoutePassPurchase,
        "refund_payment" => TransactionType::RefundPayment,
        "cancellation" => TransactionType::Cancellation,
        _ => TransactionType::TicketPurchase,
    }
}

fn creator_scope_str(scope: CreatorScope) -> &'static str {
    match scope {
        CreatorScope::User => "user",
        CreatorScope::Admin => "admin",
        CreatorScope::SuperAdmin => "super_admin",
        CreatorScope::Driver => "driver",
        CreatorScope::System => "system",
    }
}

fn creator_scope_from_str(s: &str) -> CreatorScope {
    match s {
        "admin" => CreatorScope::Admin,
        "super_admin" => CreatorScope::SuperAdmin,
        "driver" => CreatorScope::Driver,
        "system" => CreatorScope::System,
        _ => CreatorScope::User,
    }
}

fn item_type_str(t: &ItemType) -> &'static str {
    match t {
        ItemType::TicketSale => "ticket_sale",
        ItemType::TicketRefund => "ticket_refund",
        ItemType::RoutePass => "route_pass",
        ItemType::Discount => "discount",
        ItemType::Payment => "payment",
        ItemType::Transfer => "transfer",
        ItemType::Account => "account",
    }
}

fn item_type_from_str(s: &str) -> ItemType {
    match s {
        "ticket_refund" => ItemType::TicketRefund,
        "route_pass" => ItemType::RoutePass,
        "discount" => ItemType::Discount,
        "payment" => ItemType::Payment,
        "transfer" => ItemType::Transfer,
        "account" => ItemType::Account,
        _ => ItemType::TicketSale,
    }
}

fn row_to_transaction(header: &sqlx::postgres::PgRow, item_rows: Vec<sqlx::postgres::PgRow>) -> Transaction {
    let items = item_rows
        .iter()
        .map(|r| TransactionItem {
            item_type: item_type_from_str(r.get::<String, _>("item_type").as_str()),
            item_id: r.get("item_id"),
            debit: r.get("debit"),
            credit: r.get("credit"),
            notes: r.get("notes"),
            transaction_id: r.get("transaction_id"),
        })
        .collect();

    Transaction {
        id: Some(header.get("id")),
        transaction_type: transaction_type_from_str(header.get::<String, _>("transaction_type").as_str()),
        committed: header.get("committed"),
        description: header.get("description"),
        created_by: Creator {
            scope: creator_scope_from_str(header.get::<String, _>("created_by_scope").as_str()),
            id: header.get("created_by_id"),
        },
        items,
    }
}

fn row_to_payment(row: &sqlx::postgres::PgRow) -> Payment {
    Payment {
        id: row.get("id"),
        transaction_id: row.get("transaction_id"),
        payment_resource: row.get("payment_resource"),
        data: row.get("data"),
        options: PaymentOptions { is_micro: row.get("is_micro") },
    }
}
