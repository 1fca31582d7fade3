/**
 * DOMAIN LAYER - Promotion Application
 *
 * The promo rule engine itself (how a code maps to a discount) is an
 * external collaborator (§6); this module only specifies its interface
 * with the builder and the post-application bookkeeping (§4.2).
 */

use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::{AppError, Result};

use super::builder::TransactionBuilder;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromoScope {
    Promotion,
    RoutePass,
}

#[derive(Debug, Clone, Copy)]
pub enum DiscountKind {
    Percent(Decimal),
    Fixed(Decimal),
}

#[derive(Debug, Clone)]
pub struct ResolvedPromo {
    pub kind: DiscountKind,
}

/// Why a promo code could not be applied (§4.2: "unknown, expired,
/// exhausted, or inapplicable").
#[derive(Debug, thiserror::Error)]
pub enum PromoError {
    #[error("promo code {0} is unknown")]
    Unknown(String),
    #[error("promo code {0} has expired")]
    Expired(String),
    #[error("promo code {0} has been exhausted")]
    Exhausted(String),
    #[error("promo code {0} does not apply to this cart")]
    Inapplicable(String),
}

impl From<PromoError> for AppError {
    fn from(e: PromoError) -> Self {
        AppError::Transaction(e.to_string())
    }
}

/// The rule engine seam: given a code and scope, resolve it to a
/// discount shape, or fail with one of the reasons above.
#[async_trait]
pub trait PromotionResolver: Send + Sync {
    async fn resolve(&self, code: &str, scope: PromoScope, company_id: Uuid) -> std::result::Result<ResolvedPromo, PromoError>;
}

/// Applies a resolved promo to `target_ids`'s outstanding balance and
/// pushes the `discount` line via the builder (§4.1, §4.2). The
/// `updateTicketsWithDiscounts` bookkeeping the spec calls out happens
/// inside `apply_discount_to_tickets` itself, onto `notes.discountValue`.
pub async fn apply(
    resolver: &dyn PromotionResolver,
    builder: &mut TransactionBuilder,
    promo_code: &str,
    scope: PromoScope,
    company_id: Uuid,
    target_ids: &[Uuid],
) -> Result<()> {
    let resolved = resolver.resolve(promo_code, scope, company_id).await?;

    let outstanding = match scope {
        PromoScope::Promotion => builder.outstanding_total(target_ids),
        PromoScope::RoutePass => builder.outstanding_route_pass_total(target_ids),
    };
    let total = match resolved.kind {
        DiscountKind::Fixed(amount) => amount,
        DiscountKind::Percent(pct) => super::builder::round_cent(outstanding * pct),
    };

    match scope {
        PromoScope::Promotion => builder.apply_discount_to_tickets(target_ids, total, &format!("promo:{}", promo_code)),
        PromoScope::RoutePass => builder.apply_discount_to_route_passes(target_ids, total, &format!("promo:{}", promo_code)),
    }
}

/// Stand-in resolver for deployments that have not yet wired in the
/// real promo rules engine (§6): every code comes back unknown. A real
/// implementation looks codes up against a `promotions` table or an
/// external rules service and is swapped in at the same seam.
pub struct NullPromotionResolver;

#[async_trait]
impl PromotionResolver for NullPromotionResolver {
    async fn resolve(&self, code: &str, _scope: PromoScope, _company_id: Uuid) -> std::result::Result<ResolvedPromo, PromoError> {
        Err(PromoError::Unknown(code.to_string()))
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::HashMap;

    /// Fixed lookup table resolver for deterministic tests, grounded on
    /// the same seam pattern as the mock payment gateway (§9).
    pub struct StaticPromotionResolver {
        pub codes: HashMap<String, ResolvedPromo>,
    }

    #[async_trait]
    impl PromotionResolver for StaticPromotionResolver {
        async fn resolve(&self, code: &str, _scope: PromoScope, _company_id: Uuid) -> std::result::Result<ResolvedPromo, PromoError> {
            self.codes.get(code).map(|r| ResolvedPromo { kind: r.kind }).ok_or_else(|| PromoError::Unknown(code.to_string()))
        }
    }
}
