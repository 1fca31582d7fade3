/**
 * WORKFLOW LAYER - RoutePassPurchaseWorkflow
 *
 * `purchaseRoutePass` (§4.6): derives price from the next upcoming trip
 * carrying `tag`, creates `quantity` RoutePass rows at SERIALIZABLE,
 * and finalizes a standard payment line.
 */

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::{begin_with_isolation, IsolationLevel};
use crate::error::{AppError, Result};
use crate::ledger::builder::{round_cent, BuiltLedger, TransactionBuilder};
use crate::ledger::model::{Creator, TransactionType};
use crate::ledger::promotion::{self, PromoScope, PromotionResolver};
use crate::repository::route_passes::RoutePassRepository;
use crate::repository::transactions::TransactionRepository;
use crate::repository::trips::TripRepository;

/// Exactly one of `quantity`/`value` must be supplied (§4.6).
pub enum Sizing {
    Quantity(i32),
    Value(Decimal),
}

pub struct RoutePassPurchaseInput {
    pub user_id: Uuid,
    pub tag: String,
    pub sizing: Sizing,
    pub promo_code: Option<String>,
    pub company_id: Uuid,
    pub dry_run: bool,
    pub transaction_type: TransactionType,
    pub expected_price: Option<Decimal>,
    pub creator: Creator,
}

pub struct PurchasedRoutePasses {
    pub transaction_id: Option<Uuid>,
    pub built: BuiltLedger,
    pub payment_amount: Decimal,
}

pub struct RoutePassPurchaseWorkflow {
    pool: PgPool,
    trip_repo: TripRepository,
    pass_repo: RoutePassRepository,
    transaction_repo: TransactionRepository,
}

impl RoutePassPurchaseWorkflow {
    pub fn new(pool: PgPool, trip_repo: TripRepository, pass_repo: RoutePassRepository, transaction_repo: TransactionRepository) -> Self {
        Self { pool, trip_repo, pass_repo, transaction_repo }
    }

    pub async fn purchase_route_pass(
        &self,
        resolver: &dyn PromotionResolver,
        input: RoutePassPurchaseInput,
    ) -> Result<PurchasedRoutePasses> {
        let next_trip = self
            .trip_repo
            .next_upcoming_trip_for_tag(&input.tag)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("no upcoming trip found for tag {}", input.tag)))?;
        let price = next_trip.price;
        if price <= Decimal::ZERO {
            return Err(AppError::Internal(format!("trip {} has non-positive price", next_trip.id)));
        }

        let quantity = match input.sizing {
            Sizing::Quantity(q) => q,
            Sizing::Value(v) => (v / price).round().to_i32().unwrap_or(0),
        };
        if quantity <= 0 {
            return Err(AppError::Validation("quantity must resolve to at least 1".into()));
        }

        let mut tx = begin_with_isolation(&self.pool, IsolationLevel::Serializable).await?;

        let mut builder = TransactionBuilder::new(input.creator.clone(), true, input.dry_run, "route pass purchase");

        let pass_ids = builder
            .init_for_route_pass_purchase(&mut tx, &self.pass_repo, input.user_id, input.company_id, &input.tag, price, quantity)
            .await?;

        if let Some(code) = &input.promo_code {
            promotion::apply(resolver, &mut builder, code, PromoScope::RoutePass, input.company_id, &pass_ids).await?;
        }

        let payment_amount = round_cent(builder.excess_credit());
        builder.finalize_for_payment(input.company_id);

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
            self.transaction_repo.mark_committed(&mut tx, id).await?;
            Some(id)
        };

        tx.commit().await?;

        Ok(PurchasedRoutePasses { transaction_id, built, payment_amount })
    }
}
