/**
 * CONTROLLER LAYER - HTTP Request Handlers
 *
 * Thin wrappers around the workflow layer: pull identity off the
 * upstream-forwarded headers (§1 "out of scope": auth policy lives
 * upstream, this crate trusts what it's given), parse the request
 * body, delegate, wrap the result.
 */

use std::sync::Arc;

use axum::{extract::State, http::HeaderMap, Json};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::auth::{Credentials, Scope};
use crate::error::{AppError, Result};
use crate::gateway::PaymentGatewayAdapter;
use crate::ledger::checks::CheckFlags;
use crate::ledger::model::{Creator, CreatorScope, RequestedTrip, TransactionType};
use crate::ledger::promotion::NullPromotionResolver;
use crate::workflow::cancel::CancelSaleWorkflow;
use crate::workflow::refund::RefundWorkflow;
use crate::workflow::route_pass_purchase::{RoutePassPurchaseInput, RoutePassPurchaseWorkflow, Sizing};
use crate::workflow::sale::{SaleInput, SaleWorkflow};

pub struct AppState {
    pub sale: SaleWorkflow,
    pub cancel: CancelSaleWorkflow,
    pub route_pass_purchase: RoutePassPurchaseWorkflow,
    pub refund: RefundWorkflow,
    pub gateway: Arc<dyn PaymentGatewayAdapter>,
}

fn extract_user_id(headers: &HeaderMap) -> Result<Uuid> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or(AppError::Unauthorized)
}

fn extract_credentials(headers: &HeaderMap) -> Result<Credentials> {
    let scope = headers.get("x-user-scope").and_then(|v| v.to_str().ok()).unwrap_or("user");
    match scope {
        "admin" => {
            let admin_id = extract_user_id(headers)?;
            Ok(Credentials::admin(admin_id))
        }
        "superadmin" => Ok(Credentials { scope: Scope::SuperAdmin, admin_id: None, email: None, driver_id: None }),
        _ => Ok(Credentials::user()),
    }
}

#[derive(Debug, Deserialize)]
pub struct SaleRequest {
    pub trips: Vec<RequestedTrip>,
    pub promo_code: Option<String>,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub apply_route_pass: bool,
    pub expected_price: Option<Decimal>,
    pub token_issued_at: i64,
    pub card_source: Option<String>,
}

pub async fn sell_tickets(State(state): State<Arc<AppState>>, headers: HeaderMap, Json(req): Json<SaleRequest>) -> Result<Json<Value>> {
    let user_id = extract_user_id(&headers)?;

    let input = SaleInput {
        trips: req.trips,
        promo_code: req.promo_code,
        dry_run: req.dry_run,
        apply_route_pass: req.apply_route_pass,
        checks: CheckFlags::default(),
        expected_price: req.expected_price,
        creator: Creator { scope: CreatorScope::User, id: user_id },
        committed: false,
        transaction_type: TransactionType::TicketPurchase,
    };

    let resolver = NullPromotionResolver;
    let prepared = state.sale.prepare_ticket_sale(&resolver, input, chrono::Utc::now()).await?;

    if !req.dry_run {
        state.sale.charge_sale(state.gateway.as_ref(), req.token_issued_at, req.card_source, &prepared).await?;
    }

    Ok(Json(json!({
        "status": "success",
        "data": {
            "transaction_id": prepared.transaction_id,
            "payment_amount": prepared.payment_amount,
        }
    })))
}

#[derive(Debug, Deserialize)]
pub struct CancelSaleRequest {
    pub transaction_id: Uuid,
}

pub async fn cancel_sale(State(state): State<Arc<AppState>>, Json(req): Json<CancelSaleRequest>) -> Result<Json<Value>> {
    state.cancel.cancel_sale(req.transaction_id).await?;
    Ok(Json(json!({ "status": "success" })))
}

#[derive(Debug, Deserialize)]
pub struct RoutePassPurchaseRequest {
    pub tag: String,
    pub quantity: Option<i32>,
    pub value: Option<Decimal>,
    pub promo_code: Option<String>,
    pub company_id: Uuid,
    #[serde(default)]
    pub dry_run: bool,
    pub expected_price: Option<Decimal>,
}

pub async fn purchase_route_pass(State(state): State<Arc<AppState>>, headers: HeaderMap, Json(req): Json<RoutePassPurchaseRequest>) -> Result<Json<Value>> {
    let user_id = extract_user_id(&headers)?;

    let sizing = match (req.quantity, req.value) {
        (Some(q), None) => Sizing::Quantity(q),
        (None, Some(v)) => Sizing::Value(v),
        _ => return Err(AppError::Validation("exactly one of quantity or value is required".into())),
    };

    let input = RoutePassPurchaseInput {
        user_id,
        tag: req.tag,
        sizing,
        promo_code: req.promo_code,
        company_id: req.company_id,
        dry_run: req.dry_run,
        transaction_type: TransactionType::RoutePassPurchase,
        expected_price: req.expected_price,
        creator: Creator { scope: CreatorScope::User, id: user_id },
    };

    let resolver = NullPromotionResolver;
    let purchased = state.route_pass_purchase.purchase_route_pass(&resolver, input).await?;

    Ok(Json(json!({
        "status": "success",
        "data": {
            "transaction_id": purchased.transaction_id,
            "payment_amount": purchased.payment_amount,
        }
    })))
}

#[derive(Debug, Deserialize)]
pub struct RefundTicketRequest {
    pub ticket_id: Uuid,
    pub company_id: Uuid,
    /// Caller's expectation of `ticketSale.credit - ticket.notes.discountValue`;
    /// validated against the computed value before anything is mutated (§4.7).
    pub requested_amount: Decimal,
}

pub async fn refund_ticket(State(state): State<Arc<AppState>>, headers: HeaderMap, Json(req): Json<RefundTicketRequest>) -> Result<Json<Value>> {
    let credentials = extract_credentials(&headers)?;
    let creator = Creator { scope: CreatorScope::Admin, id: req.company_id };
    let info = state
        .refund
        .refund_ticket(&credentials, req.ticket_id, req.company_id, req.requested_amount, creator, state.gateway.as_ref())
        .await?;

    Ok(Json(json!({
        "status": "success",
        "data": { "amount": info.amount, "processing_fee": info.processing_fee }
    })))
}

#[derive(Debug, Deserialize)]
pub struct RefundRoutePassRequest {
    pub route_pass_id: Uuid,
    pub company_id: Uuid,
}

pub async fn refund_route_pass(State(state): State<Arc<AppState>>, headers: HeaderMap, Json(req): Json<RefundRoutePassRequest>) -> Result<Json<Value>> {
    let credentials = extract_credentials(&headers)?;
    let creator = Creator { scope: CreatorScope::Admin, id: req.company_id };
    let info = state
        .refund
        .refund_route_pass(&credentials, req.route_pass_id, req.company_id, creator, state.gateway.as_ref())
        .await?;

    Ok(Json(json!({
        "status": "success",
        "data": { "amount": info.amount, "processing_fee": info.processing_fee }
    })))
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "service": "bukr-ledger" }))
}
