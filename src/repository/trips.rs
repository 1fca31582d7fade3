/**
 * REPOSITORY LAYER - Trip / TripStop / Route Data Access
 *
 * Read-only during a workflow (§3): trips, their stops, and the route
 * they belong to. `get_for_update` takes the row lock booking needs to
 * prevent lost updates on `seats_available` under REPEATABLE READ
 * (§4.4).
 */

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Row, Transaction as DbTransaction};
use uuid::Uuid;

use crate::ledger::model::{BookingInfo, BookingWindowType, Route, TransportCompany, Trip, TripStop};

#[derive(Clone)]
pub struct TripRepository {
    pool: PgPool,
}

impl TripRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Load a trip (with its stops) under `SELECT ... FOR UPDATE`, so
    /// concurrent bookings serialize on the row rather than both
    /// reading the same `seats_available` (§4.4, §5).
    pub async fn get_for_update(
        &self,
        tx: &mut DbTransaction<'_, Postgres>,
        trip_id: Uuid,
    ) -> Result<Option<Trip>, sqlx::Error> {
        let row = sqlx::query(
            r#"SELECT id, route_id, is_running, seats_available, price,
                      booking_window_type, booking_window_size_ms
               FROM trips WHERE id = $1 FOR UPDATE"#,
        )
        .bind(trip_id)
        .fetch_optional(&mut **tx)
        .await?;

        let Some(row) = row else { return Ok(None) };
        let stops = self.stops_for_trip(&mut **tx, trip_id).await?;
        Ok(Some(row_to_trip(&row, stops)))
    }

    async fn stops_for_trip(
        &self,
        exec: impl sqlx::PgExecutor<'_>,
        trip_id: Uuid,
    ) -> Result<Vec<TripStop>, sqlx::Error> {
        let rows = sqlx::query("SELECT id, time FROM trip_stops WHERE trip_id = $1 ORDER BY time ASC")
            .bind(trip_id)
            .fetch_all(exec)
            .await?;
        Ok(rows
            .iter()
            .map(|r| TripStop { id: r.get("id"), time: r.get::<DateTime<Utc>, _>("time") })
            .collect())
    }

    /// Decrement `seats_available` by one inside the caller's already-
    /// locked row (taken by `get_for_update`), the write `seat_availability`'s
    /// re-read is meant to observe (§4.4, §5).
    pub async fn decrement_seat(&self, tx: &mut DbTransaction<'_, Postgres>, trip_id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE trips SET seats_available = seats_available - 1 WHERE id = $1")
            .bind(trip_id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// Re-read current seat count (outside any lock the caller already
    /// holds inside its own transaction) to confirm the post-insert
    /// availability check (§4.4 seatAvailability).
    pub async fn seats_available(
        &self,
        tx: &mut DbTransaction<'_, Postgres>,
        trip_id: Uuid,
    ) -> Result<i32, sqlx::Error> {
        sqlx::query_scalar("SELECT seats_available FROM trips WHERE id = $1")
            .bind(trip_id)
            .fetch_one(&mut **tx)
            .await
    }

    pub async fn route(&self, route_id: Uuid) -> Result<Option<Route>, sqlx::Error> {
        let row = sqlx::query("SELECT id, transport_company_id FROM routes WHERE id = $1")
            .bind(route_id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else { return Ok(None) };

        let tag_rows = sqlx::query_scalar::<_, String>("SELECT tag FROM route_tags WHERE route_id = $1")
            .bind(route_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(Some(Route {
            id: row.get("id"),
            transport_company_id: row.get("transport_company_id"),
            tags: tag_rows,
        }))
    }

    /// `companyDescriptor = smsOpCode ?? name` (§4.9) is per transport
    /// company, not a global constant; this is the lookup that backs it.
    pub async fn transport_company(&self, company_id: Uuid) -> Result<Option<TransportCompany>, sqlx::Error> {
        let row = sqlx::query("SELECT id, name, sms_op_code FROM transport_companies WHERE id = $1")
            .bind(company_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(|r| TransportCompany { id: r.get("id"), name: r.get("name"), sms_op_code: r.get("sms_op_code") }))
    }

    /// The next upcoming Trip of any Route carrying `tag`, used to
    /// derive a route pass's price (§4.6).
    pub async fn next_upcoming_trip_for_tag(&self, tag: &str) -> Result<Option<Trip>, sqlx::Error> {
        let row = sqlx::query(
            r#"SELECT t.id, t.route_id, t.is_running, t.seats_available, t.price,
                      t.booking_window_type, t.booking_window_size_ms
               FROM trips t
               JOIN routes r ON r.id = t.route_id
               JOIN route_tags rt ON rt.route_id = r.id
               JOIN trip_stops ts ON ts.trip_id = t.id
               WHERE rt.tag = $1 AND t.is_running = true
               GROUP BY t.id
               ORDER BY MIN(ts.time) ASC
               LIMIT 1"#,
        )
        .bind(tag)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };
        let trip_id: Uuid = row.get("id");
        let stops = self.stops_for_trip(&self.pool, trip_id).await?;
        Ok(Some(row_to_trip(&row, stops)))
    }
}

fn row_to_trip(row: &sqlx::postgres::PgRow, stops: Vec<TripStop>) -> Trip {
    let window_type = match row.try_get::<String, _>("booking_window_type").as_deref() {
        Ok("firstStop") => BookingWindowType::FirstStop,
        Ok("stop") => BookingWindowType::Stop,
        _ => BookingWindowType::Stop,
    };
    let window_size: i64 = row.try_get("booking_window_size_ms").unwrap_or(0);

    Trip {
        id: row.get("id"),
        route_id: row.get("route_id"),
        is_running: row.get("is_running"),
        seats_available: row.get("seats_available"),
        booking_info: BookingInfo { window_type, window_size },
        price: row.get::<Decimal, _>("price"),
        stops,
    }
}
