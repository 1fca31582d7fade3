/**
 * INFRASTRUCTURE LAYER - Database Connection
 *
 * Database Pool: the connection manager - because opening connections
 * is expensive.
 *
 * Architecture Layer: Infrastructure (Layer 6)
 * Dependencies: PostgreSQL (via SQLx)
 */

use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};

pub async fn create_pool(database_url: &str) -> PgPool {
    if database_url.is_empty() {
        tracing::warn!("DATABASE_URL not set, database features unavailable");
        PgPoolOptions::new()
            .max_connections(1)
            .connect("postgres://localhost/nonexistent")
            .await
            .expect("this should not be called without a DATABASE_URL")
    } else {
        PgPoolOptions::new()
            .max_connections(20)
            .min_connections(5)
            .connect(database_url)
            .await
            .expect("failed to connect to database")
    }
}

/// Per-workflow isolation level (§5, §9: "make isolation level a
/// per-workflow constant, not a caller option, to prevent accidental
/// weakening").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    fn as_sql(self) -> &'static str {
        match self {
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

/// Start a transaction at the given isolation level. Postgres requires
/// `SET TRANSACTION ISOLATION LEVEL` to be the first statement after
/// `BEGIN`, so this must be called before any other query on `tx`.
pub async fn begin_with_isolation(
    pool: &PgPool,
    level: IsolationLevel,
) -> Result<Transaction<'static, Postgres>, sqlx::Error> {
    let mut tx = pool.begin().await?;
    let stmt = format!("SET TRANSACTION ISOLATION LEVEL {}", level.as_sql());
    sqlx::query(&stmt).execute(&mut *tx).await?;
    Ok(tx)
}
