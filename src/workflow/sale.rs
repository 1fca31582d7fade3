/**
 * WORKFLOW LAYER - SaleWorkflow
 *
 * `prepareTicketSale` (§4.5): builds and persists a balanced
 * ticket-purchase Transaction inside one REPEATABLE READ DB
 * transaction. Charging the card is a separate step (`charge_sale`)
 * so a declined charge can run compensating undo without having ever
 * touched the gateway from inside the builder (§4.1 failure semantics).
 */

use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::config::Config;
use crate::db::{begin_with_isolation, IsolationLevel};
use crate::error::{AppError, Result};
use crate::gateway::{self, PaymentGatewayAdapter};
use crate::ledger::builder::{round_cent, BuiltLedger, TransactionBuilder};
use crate::ledger::model::{Creator, RequestedTrip, TicketStatus, TransactionType};
use crate::ledger::promotion::{self, PromoScope, PromotionResolver};
use crate::ledger::{checks, residual, route_pass};
use crate::repository::route_passes::RoutePassRepository;
use crate::repository::tickets::TicketRepository;
use crate::repository::transactions::TransactionRepository;
use crate::repository::trips::TripRepository;

use super::{run_undo, settle_charge};

pub struct SaleInput {
    pub trips: Vec<RequestedTrip>,
    pub promo_code: Option<String>,
    pub dry_run: bool,
    pub apply_route_pass: bool,
    pub checks: checks::CheckFlags,
    pub expected_price: Option<Decimal>,
    pub creator: Creator,
    pub committed: bool,
    pub transaction_type: TransactionType,
}

pub struct PreparedSale {
    pub transaction_id: Option<Uuid>,
    pub built: BuiltLedger,
    pub payment_amount: Decimal,
    pub company_id: Uuid,
}

pub struct SaleWorkflow {
    pool: PgPool,
    config: Config,
    trip_repo: TripRepository,
    ticket_repo: TicketRepository,
    pass_repo: RoutePassRepository,
    transaction_repo: TransactionRepository,
}

impl SaleWorkflow {
    pub fn new(
        pool: PgPool,
        config: Config,
        trip_repo: TripRepository,
        ticket_repo: TicketRepository,
        pass_repo: RoutePassRepository,
        transaction_repo: TransactionRepository,
    ) -> Self {
        Self { pool, config, trip_repo, ticket_repo, pass_repo, transaction_repo }
    }

    /// Steps 1-8 of §4.5. Returns the persisted (or, if `dry_run`,
    /// purely in-memory) transaction along with the payment amount the
    /// caller needs to actually charge the card.
    pub async fn prepare_ticket_sale(
        &self,
        resolver: &dyn PromotionResolver,
        input: SaleInput,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<PreparedSale> {
        if input.trips.is_empty() {
            return Err(AppError::Validation("at least one trip is required".into()));
        }

        let mut tx = begin_with_isolation(&self.pool, IsolationLevel::RepeatableRead).await?;

        let mut builder = TransactionBuilder::new(input.creator.clone(), input.committed, input.dry_run, "ticket sale");

        builder.init_for_ticket_sale(&mut tx, &self.trip_repo, &self.ticket_repo, &input.trips).await?;

        checks::run(input.checks, &builder, &mut tx, &self.trip_repo, &self.ticket_repo, &input.trips, now).await?;

        let company_id = self.single_company_id(&builder).await?;
        let user_id = input.trips[0].user_id;

        if input.apply_route_pass {
            route_pass::apply(&mut builder, &mut tx, &self.trip_repo, &self.pass_repo, user_id, company_id).await?;
        }

        if let Some(code) = &input.promo_code {
            let ticket_ids = builder.ticket_ids();
            promotion::apply(resolver, &mut builder, code, PromoScope::Promotion, company_id, &ticket_ids).await?;
        }

        residual::absorb_if_below_minimum(&mut builder, self.config.gateway_min_charge_cents)?;

        let payment_amount = round_cent(builder.excess_credit());
        builder.finalize_for_payment(company_id);

        if let Some(expected) = input.expected_price {
            if (expected - payment_amount).abs() >= Decimal::new(1, 3) {
                return Err(AppError::price_changed(expected, payment_amount));
            }
        }

        let built = builder.build(input.transaction_type)?;

        let transaction_id = if built.dry_run {
            None
        } else {
            let id = self.transaction_repo.insert(&mut tx, &built).await?;
            for pass in built.route_passes.values() {
                self.pass_repo.set_status(&mut tx, pass.id, pass.status).await?;
            }
            if built.committed {
                for ticket_id in built.tickets.keys() {
                    self.ticket_repo.set_status(&mut tx, *ticket_id, TicketStatus::Valid).await?;
                }
                self.transaction_repo.mark_committed(&mut tx, id).await?;
            }
            Some(id)
        };

        tx.commit().await?;

        Ok(PreparedSale { transaction_id, built, payment_amount, company_id })
    }

    /// Charges the card for a previously-prepared sale and reconciles
    /// the outcome. On decline, replays the prepared undo stack so
    /// pending tickets end up `failed` and any redeemed passes end up
    /// `valid` again (§4.1, §5).
    pub async fn charge_sale(
        &self,
        gateway: &dyn PaymentGatewayAdapter,
        token_issued_at: i64,
        card_source: Option<String>,
        prepared: &PreparedSale,
    ) -> Result<()> {
        let Some(transaction_id) = prepared.transaction_id else {
            return Ok(());
        };

        if prepared.payment_amount <= Decimal::ZERO {
            return Ok(());
        }

        let company = self
            .trip_repo
            .transport_company(prepared.company_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("transport company {} not found", prepared.company_id)))?;

        let idempotency_key = gateway::idempotency_key_for_sale(&self.config.idempotency_tag, transaction_id, token_issued_at);
        let statement_descriptor = gateway::statement_descriptor(company.descriptor(), transaction_id);

        let outcome = settle_charge(
            &self.pool,
            &self.transaction_repo,
            gateway,
            transaction_id,
            prepared.payment_amount,
            format!("ticket sale {}", transaction_id),
            statement_descriptor,
            self.config.merchant_id().to_string(),
            idempotency_key,
            card_source,
        )
        .await;

        match outcome {
            Ok(_charge) => {
                let mut tx = begin_with_isolation(&self.pool, IsolationLevel::ReadCommitted).await?;
                for ticket_id in prepared.built.tickets.keys() {
                    self.ticket_repo.set_status(&mut tx, *ticket_id, TicketStatus::Valid).await?;
                }
                tx.commit().await?;
                Ok(())
            }
            Err(err) => {
                run_undo(&self.pool, &self.ticket_repo, &self.pass_repo, &prepared.built.undo_stack).await?;
                Err(err)
            }
        }
    }

    async fn single_company_id(&self, builder: &TransactionBuilder) -> Result<Uuid> {
        for ticket in builder.tickets() {
            if let Some(trip) = builder.trip(ticket.trip_id) {
                if let Some(route) = self.trip_repo.route(trip.route_id).await? {
                    return Ok(route.transport_company_id);
                }
            }
        }
        Err(AppError::Internal("no trip loaded to derive transport company".into()))
    }
}
