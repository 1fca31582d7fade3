/**
 * REPOSITORY LAYER - Route Pass Data Access
 */

use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Row, Transaction as DbTransaction};
use uuid::Uuid;

use crate::ledger::model::{RoutePass, RoutePassNotes, RoutePassStatus};

#[derive(Clone)]
pub struct RoutePassRepository {
    pool: PgPool,
}

impl RoutePassRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Up to `limit` valid passes matching `user_id`/`tag`/`company_id`,
    /// locked for update so two concurrent sales cannot both redeem the
    /// same pass (§4.3).
    pub async fn fetch_valid_for_redemption(
        &self,
        tx: &mut DbTransaction<'_, Postgres>,
        user_id: Uuid,
        tag: &str,
        company_id: Uuid,
        limit: i64,
    ) -> Result<Vec<RoutePass>, sqlx::Error> {
        let rows = sqlx::query(
            r#"SELECT id, user_id, company_id, tag, status, price, discount_value
               FROM route_passes
               WHERE user_id = $1 AND tag = $2 AND company_id = $3 AND status = 'valid'
               ORDER BY created_at ASC
               LIMIT $4
               FOR UPDATE"#,
        )
        .bind(user_id)
        .bind(tag)
        .bind(company_id)
        .bind(limit)
        .fetch_all(&mut **tx)
        .await?;
        Ok(rows.iter().map(row_to_pass).collect())
    }

    pub async fn insert_valid(
        &self,
        tx: &mut DbTransaction<'_, Postgres>,
        user_id: Uuid,
        company_id: Uuid,
        tag: &str,
        price: Decimal,
    ) -> Result<Uuid, sqlx::Error> {
        sqlx::query_scalar(
            r#"INSERT INTO route_passes (user_id, company_id, tag, status, price, discount_value)
               VALUES ($1, $2, $3, 'valid', $4, 0)
               RETURNING id"#,
        )
        .bind(user_id)
        .bind(company_id)
        .bind(tag)
        .bind(price)
        .fetch_one(&mut **tx)
        .await
    }

    pub async fn set_status(
        &self,
        tx: &mut DbTransaction<'_, Postgres>,
        pass_id: Uuid,
        status: RoutePassStatus,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE route_passes SET status = $2 WHERE id = $1")
            .bind(pass_id)
            .bind(status_str(status))
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    pub async fn set_status_pooled(&self, pass_id: Uuid, status: RoutePassStatus) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE route_passes SET status = $2 WHERE id = $1")
            .bind(pass_id)
            .bind(status_str(status))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_discount_value(
        &self,
        tx: &mut DbTransaction<'_, Postgres>,
        pass_id: Uuid,
        discount_value: Decimal,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE route_passes SET discount_value = $2 WHERE id = $1")
            .bind(pass_id)
            .bind(discount_value)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    pub async fn set_refunded_transaction_id(
        &self,
        tx: &mut DbTransaction<'_, Postgres>,
        pass_id: Uuid,
        transaction_id: Uuid,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE route_passes SET refunded_transaction_id = $2 WHERE id = $1")
            .bind(pass_id)
            .bind(transaction_id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    pub async fn get_tx(
        &self,
        tx: &mut DbTransaction<'_, Postgres>,
        pass_id: Uuid,
    ) -> Result<Option<RoutePass>, sqlx::Error> {
        let row = sqlx::query(
            r#"SELECT id, user_id, company_id, tag, status, price, discount_value
               FROM route_passes WHERE id = $1 FOR UPDATE"#,
        )
        .bind(pass_id)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(row.as_ref().map(row_to_pass))
    }
}

fn status_str(status: RoutePassStatus) -> &'static str {
    match status {
        RoutePassStatus::Valid => "valid",
        RoutePassStatus::Void => "void",
        RoutePassStatus::Expired => "expired",
        RoutePassStatus::Refunded => "refunded",
        RoutePassStatus::Failed => "failed",
    }
}

fn status_from_str(s: &str) -> RoutePassStatus {
    match s {
        "valid" => RoutePassStatus::Valid,
        "expired" => RoutePassStatus::Expired,
        "refunded" => RoutePassStatus::Refunded,
        "failed" => RoutePassStatus::Failed,
        _ => RoutePassStatus::Void,
    }
}

fn row_to_pass(row: &sqlx::postgres::PgRow) -> RoutePass {
    RoutePass {
        id: row.get("id"),
        user_id: row.get("user_id"),
        company_id: row.get("company_id"),
        tag: row.get("tag"),
        status: status_from_str(row.get::<String, _>("status").as_str()),
        notes: RoutePassNotes {
            price: row.get("price"),
            discount_value: row.get("discount_value"),
            refunded_transaction_id: row.get("refunded_transaction_id"),
        },
    }
}
