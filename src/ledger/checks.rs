/**
 * DOMAIN LAYER - Booking Checks
 *
 * Gate invoked before a sale finalizes (§4.4). `isRunning`, `validStops`
 * and `singleCompany` always run; `bookingWindow`, `noDuplicates` and
 * `seatAvailability` are individually toggled by [`CheckFlags`]
 * (default: all on).
 */

use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction as DbTransaction};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::ledger::model::{BookingInfo, BookingWindowType, RequestedTrip};
use crate::repository::{tickets::TicketRepository, trips::TripRepository};

use super::builder::TransactionBuilder;

#[derive(Debug, Clone, Copy)]
pub struct CheckFlags {
    pub ensure_availability: bool,
    pub no_duplicates: bool,
    pub booking_window: bool,
}

impl Default for CheckFlags {
    fn default() -> Self {
        Self { ensure_availability: true, no_duplicates: true, booking_window: true }
    }
}

/// `cutoff = minTime(stop) + windowSize`; the trip may not be booked
/// once `now` passes it (§4.4).
fn booking_cutoff(booking_info: BookingInfo, first_stop_time: DateTime<Utc>, board_or_alight_min: DateTime<Utc>) -> DateTime<Utc> {
    let base = match booking_info.window_type {
        BookingWindowType::FirstStop => first_stop_time,
        BookingWindowType::Stop => board_or_alight_min,
    };
    base + chrono::Duration::milliseconds(booking_info.window_size)
}

/// Runs every enabled check against the trips/tickets a builder has
/// already loaded via `init_for_ticket_sale`. Must run after that call
/// so `builder.trip(..)` and the freshly-inserted pending tickets are
/// available, and (for `seatAvailability`) after the pending rows have
/// actually been inserted so the re-read reflects them.
pub async fn run(
    flags: CheckFlags,
    builder: &TransactionBuilder,
    tx: &mut DbTransaction<'_, Postgres>,
    trip_repo: &TripRepository,
    ticket_repo: &TicketRepository,
    requested: &[RequestedTrip],
    now: DateTime<Utc>,
) -> Result<()> {
    single_company(builder, trip_repo).await?;

    for req in requested {
        let trip = builder
            .trip(req.trip_id)
            .ok_or_else(|| AppError::Internal(format!("trip {} not loaded by builder", req.trip_id)))?;

        if !trip.is_running {
            return Err(AppError::Transaction(format!("trip {} is not running", trip.id)));
        }

        let board_stop = trip
            .stop(req.board_stop_id)
            .ok_or_else(|| AppError::Transaction(format!("board stop {} not on trip {}", req.board_stop_id, trip.id)))?;
        let alight_stop = trip
            .stop(req.alight_stop_id)
            .ok_or_else(|| AppError::Transaction(format!("alight stop {} not on trip {}", req.alight_stop_id, trip.id)))?;

        if flags.booking_window {
            let first_stop_time = trip.stops.iter().map(|s| s.time).min().unwrap_or(now);
            let board_or_alight_min = board_stop.time.min(alight_stop.time);
            let cutoff = booking_cutoff(trip.booking_info, first_stop_time, board_or_alight_min);
            if now > cutoff {
                return Err(AppError::Transaction(format!("booking window for trip {} has closed", trip.id)));
            }
        }

        if flags.no_duplicates {
            if let Some(existing) = ticket_repo.existing_active_ticket(tx, req.user_id, req.trip_id).await? {
                return Err(AppError::Transaction(format!(
                    "user already holds ticket {} for trip {}",
                    existing, req.trip_id
                )));
            }
        }
    }

    if flags.ensure_availability {
        seat_availability(builder, tx, trip_repo, requested).await?;
    }

    Ok(())
}

async fn single_company(builder: &TransactionBuilder, trip_repo: &TripRepository) -> Result<()> {
    let mut company: Option<Uuid> = None;
    for ticket in builder.tickets() {
        let trip = builder
            .trip(ticket.trip_id)
            .ok_or_else(|| AppError::Internal(format!("trip {} not loaded by builder", ticket.trip_id)))?;
        let route = trip_repo
            .route(trip.route_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("route {} not found", trip.route_id)))?;
        match company {
            None => company = Some(route.transport_company_id),
            Some(c) if c != route.transport_company_id => {
                return Err(AppError::Transaction("trips span more than one transport company".into()));
            }
            _ => {}
        }
    }
    Ok(())
}

/// Re-read each trip's `seats_available` after pending tickets have
/// been inserted; reject if any went negative (§4.4, §5).
async fn seat_availability(
    _builder: &TransactionBuilder,
    tx: &mut DbTransaction<'_, Postgres>,
    trip_repo: &TripRepository,
    requested: &[RequestedTrip],
) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for req in requested {
        if !seen.insert(req.trip_id) {
            continue;
        }
        let seats = trip_repo.seats_available(tx, req.trip_id).await?;
        if seats < 0 {
            return Err(AppError::Transaction(format!("trip {} has no seats available", req.trip_id)));
        }
    }
    Ok(())
}
