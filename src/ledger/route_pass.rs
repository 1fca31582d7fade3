/**
 * DOMAIN LAYER - Route Pass Application
 *
 * Consumes available RoutePasses against the builder's already-loaded
 * ticket-sale items (§4.3).
 */

use std::collections::BTreeSet;

use sqlx::{Postgres, Transaction as DbTransaction};
use uuid::Uuid;

use crate::error::Result;
use crate::repository::route_passes::RoutePassRepository;
use crate::repository::trips::TripRepository;

use super::builder::TransactionBuilder;
use super::model::Ticket;

/// Every route tag carried by the builder's loaded trips' routes, in
/// alphabetical order - the documented tie-break when a cart touches
/// more than one tag (§4.3).
async fn route_tags_for_builder(builder: &TransactionBuilder, trip_repo: &TripRepository) -> Result<Vec<String>> {
    let mut tags: BTreeSet<String> = BTreeSet::new();
    for ticket in builder.tickets() {
        if let Some(trip) = builder.trip(ticket.trip_id) {
            if let Some(route) = trip_repo.route(trip.route_id).await? {
                tags.extend(route.tags);
            }
        }
    }
    Ok(tags.into_iter().collect())
}

/// Redeems up to one valid pass per outstanding ticket, per tag, in
/// alphabetical tag order. Mutates `builder` in place.
pub async fn apply(
    builder: &mut TransactionBuilder,
    tx: &mut DbTransaction<'_, Postgres>,
    trip_repo: &TripRepository,
    pass_repo: &RoutePassRepository,
    user_id: Uuid,
    company_id: Uuid,
) -> Result<()> {
    let tags = route_tags_for_builder(builder, trip_repo).await?;

    for tag in tags {
        let all_tickets: Vec<Ticket> = builder.tickets().cloned().collect();
        let mut candidate_tickets = Vec::new();
        for ticket in all_tickets {
            let Some(trip) = builder.trip(ticket.trip_id) else { continue };
            if let Some(route) = trip_repo.route(trip.route_id).await? {
                if route.tags.iter().any(|t| t == &tag) {
                    candidate_tickets.push(ticket);
                }
            }
        }

        let passes = pass_repo
            .fetch_valid_for_redemption(tx, user_id, &tag, company_id, candidate_tickets.len() as i64)
            .await?;

        let mut passes = passes.into_iter();
        for ticket in candidate_tickets {
            if builder.outstanding_total(&[ticket.id]) <= rust_decimal::Decimal::ZERO {
                continue;
            }
            let Some(pass) = passes.next() else { break };
            builder.redeem_route_pass_for_ticket(pass, ticket.id)?;
        }
    }

    Ok(())
}
