/**
 * GATEWAY LAYER - Stripe Adapter
 *
 * Concrete `PaymentGatewayAdapter` backed by the real Stripe HTTPS API.
 * Merchant routing and live/test selection come from `Config` (§6, §9:
 * "replace global stripeIsLive with an injected configuration").
 */

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Deserialize;

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::ledger::model::Charge;

use super::{ChargeRequest, PaymentGatewayAdapter, RefundRequest};

const STRIPE_API_BASE: &str = "https://api.stripe.com/v1";
/// Below this, a charge is treated as micro for fee-schedule purposes.
const MICRO_THRESHOLD_CENTS: i64 = 100;

pub struct StripeGatewayAdapter {
    client: reqwest::Client,
    secret_key: String,
    min_charge_cents: i64,
}

impl StripeGatewayAdapter {
    pub fn new(config: &Config) -> Self {
        Self {
            client: reqwest::Client::new(),
            secret_key: config.stripe_secret_key.clone(),
            min_charge_cents: config.gateway_min_charge_cents,
        }
    }

    fn auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder.basic_auth(&self.secret_key, Option::<&str>::None)
    }
}

#[derive(Deserialize)]
struct StripeChargeResponse {
    id: String,
    amount: i64,
    #[serde(default)]
    amount_refunded: i64,
    #[serde(default)]
    source: StripeSource,
}

#[derive(Deserialize, Default)]
struct StripeSource {
    #[serde(default)]
    id: String,
}

impl From<StripeChargeResponse> for Charge {
    fn from(r: StripeChargeResponse) -> Self {
        Charge { id: r.id, amount_cents: r.amount, amount_refunded_cents: r.amount_refunded, source: r.source.id }
    }
}

#[async_trait]
impl PaymentGatewayAdapter for StripeGatewayAdapter {
    async fn charge_card(&self, req: ChargeRequest) -> Result<Charge> {
        let amount_cents = (req.value * Decimal::ONE_HUNDRED)
            .round()
            .to_i64()
            .ok_or_else(|| AppError::Internal("charge amount does not fit in cents".into()))?;

        let mut form = vec![
            ("amount".to_string(), amount_cents.to_string()),
            ("currency".to_string(), "usd".to_string()),
            ("description".to_string(), req.description),
            ("statement_descriptor".to_string(), req.statement_descriptor),
            ("destination[account]".to_string(), req.destination),
        ];
        if let Some(source) = req.source {
            form.push(("source".to_string(), source));
        }
        if let Some(customer) = req.customer {
            form.push(("customer".to_string(), customer));
        }

        let response = self
            .auth(self.client.post(format!("{STRIPE_API_BASE}/charges")))
            .header("Idempotency-Key", req.idempotency_key)
            .form(&form)
            .send()
            .await
            .map_err(|e| AppError::Charge(format!("stripe charge request failed: {e}")))?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Charge(format!("stripe declined charge: {body}")));
        }

        let parsed: StripeChargeResponse =
            response.json().await.map_err(|e| AppError::Charge(format!("invalid stripe response: {e}")))?;
        Ok(parsed.into())
    }

    async fn refund(&self, req: RefundRequest) -> Result<Charge> {
        let amount_cents = (req.amount * Decimal::ONE_HUNDRED)
            .round()
            .to_i64()
            .ok_or_else(|| AppError::Internal("refund amount does not fit in cents".into()))?;

        let form = [("charge".to_string(), req.charge_id.clone()), ("amount".to_string(), amount_cents.to_string())];

        let response = self
            .auth(self.client.post(format!("{STRIPE_API_BASE}/refunds")))
            .header("Idempotency-Key", req.idempotency_key)
            .form(&form)
            .send()
            .await
            .map_err(|e| AppError::Charge(format!("stripe refund request failed: {e}")))?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Charge(format!("stripe declined refund: {body}")));
        }

        self.retrieve_charge(&req.charge_id).await
    }

    async fn retrieve_charge(&self, resource_id: &str) -> Result<Charge> {
        let response = self
            .auth(self.client.get(format!("{STRIPE_API_BASE}/charges/{resource_id}")))
            .send()
            .await
            .map_err(|e| AppError::Charge(format!("stripe retrieve-charge request failed: {e}")))?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Charge(format!("stripe charge {resource_id} not retrievable: {body}")));
        }

        let parsed: StripeChargeResponse =
            response.json().await.map_err(|e| AppError::Charge(format!("invalid stripe response: {e}")))?;
        Ok(parsed.into())
    }

    fn is_micro(&self, amount_cents: i64) -> bool {
        amount_cents < MICRO_THRESHOLD_CENTS
    }

    fn is_local_and_non_amex(&self, source: &str) -> bool {
        !source.to_lowercase().contains("amex")
    }

    fn calculate_admin_fee_in_cents(&self, cents: i64, is_micro: bool, is_local_and_non_amex: bool) -> i64 {
        if is_micro {
            return (cents as f64 * 0.08).round() as i64;
        }
        let base_bps = if is_local_and_non_amex { 290 } else { 340 };
        let percentage = (cents as f64 * base_bps as f64 / 10_000.0).round() as i64;
        percentage + 30
    }

    fn min_transaction_charge_in_cents(&self) -> i64 {
        self.min_charge_cents
    }
}
