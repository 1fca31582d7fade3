/**
 * GATEWAY LAYER - In-Memory Mock Adapter
 *
 * Deterministic, network-free `PaymentGatewayAdapter` for workflow
 * tests (§9: "real and mock implementations allow property-based tests
 * without network I/O").
 */

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use crate::error::{AppError, Result};
use crate::ledger::model::Charge;

use super::{ChargeRequest, PaymentGatewayAdapter, RefundRequest};

pub struct MockGatewayAdapter {
    next_id: AtomicI64,
    charges: Mutex<Vec<Charge>>,
    /// Charges already minted, keyed by the idempotency key they were
    /// minted under, so a retried `charge_card` call reuses the charge
    /// instead of double-charging (§8: "calling chargeSale twice with
    /// the same tokenIat/transaction.id produces one gateway charge").
    charges_by_idempotency_key: Mutex<HashMap<String, Charge>>,
    min_charge_cents: i64,
    /// When set, every `charge_card` call fails with `ChargeError`
    /// (§7): used to exercise rollback/undo paths.
    pub force_decline: bool,
}

impl MockGatewayAdapter {
    pub fn new(min_charge_cents: i64) -> Self {
        Self {
            next_id: AtomicI64::new(1),
            charges: Mutex::new(Vec::new()),
            charges_by_idempotency_key: Mutex::new(HashMap::new()),
            min_charge_cents,
            force_decline: false,
        }
    }

    pub fn declining(min_charge_cents: i64) -> Self {
        Self { force_decline: true, ..Self::new(min_charge_cents) }
    }
}

#[async_trait]
impl PaymentGatewayAdapter for MockGatewayAdapter {
    async fn charge_card(&self, req: ChargeRequest) -> Result<Charge> {
        if self.force_decline {
            return Err(AppError::Charge("mock gateway declined".into()));
        }
        if let Some(existing) = self.charges_by_idempotency_key.lock().unwrap().get(&req.idempotency_key) {
            return Ok(existing.clone());
        }
        let amount_cents = (req.value * Decimal::ONE_HUNDRED).round().to_i64().unwrap_or(0);
        let id = format!("ch_mock_{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let charge = Charge { id: id.clone(), amount_cents, amount_refunded_cents: 0, source: "card_mock".into() };
        self.charges.lock().unwrap().push(charge.clone());
        self.charges_by_idempotency_key.lock().unwrap().insert(req.idempotency_key, charge.clone());
        Ok(charge)
    }

    async fn refund(&self, req: RefundRequest) -> Result<Charge> {
        let mut charges = self.charges.lock().unwrap();
        let charge = charges
            .iter_mut()
            .find(|c| c.id == req.charge_id)
            .ok_or_else(|| AppError::NotFound(format!("charge {} not found", req.charge_id)))?;
        let amount_cents = (req.amount * Decimal::ONE_HUNDRED).round().to_i64().unwrap_or(0);
        charge.amount_refunded_cents += amount_cents;
        Ok(charge.clone())
    }

    async fn retrieve_charge(&self, resource_id: &str) -> Result<Charge> {
        self.charges
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.id == resource_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("charge {} not found", resource_id)))
    }

    fn is_micro(&self, amount_cents: i64) -> bool {
        amount_cents < 100
    }

    fn is_local_and_non_amex(&self, source: &str) -> bool {
        !source.to_lowercase().contains("amex")
    }

    fn calculate_admin_fee_in_cents(&self, cents: i64, is_micro: bool, _is_local_and_non_amex: bool) -> i64 {
        if is_micro {
            (cents as f64 * 0.08).round() as i64
        } else {
            (cents as f64 * 0.029).round() as i64 + 30
        }
    }

    fn min_transaction_charge_in_cents(&self) -> i64 {
        self.min_charge_cents
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn charge_then_refund_round_trips() {
        let gateway = MockGatewayAdapter::new(50);
        let charge = gateway
            .charge_card(ChargeRequest {
                value: Decimal::new(1500, 2),
                description: "test".into(),
                statement_descriptor: "TEST".into(),
                destination: "acct_1".into(),
                idempotency_key: "instance=dev,bookingId=x,session=1".into(),
                source: Some("tok_visa".into()),
                customer: None,
            })
            .await
            .unwrap();
        assert_eq!(charge.amount_cents, 1500);

        let refunded = gateway
            .refund(RefundRequest { charge_id: charge.id.clone(), amount: Decimal::new(1500, 2), idempotency_key: "Refund:instance=dev,ticketId=x".into() })
            .await
            .unwrap();
        assert_eq!(refunded.amount_refunded_cents, 1500);
    }

    #[tokio::test]
    async fn charging_twice_with_the_same_idempotency_key_reuses_the_charge() {
        let gateway = MockGatewayAdapter::new(50);
        let req = || ChargeRequest {
            value: Decimal::new(1000, 2),
            description: "test".into(),
            statement_descriptor: "TEST".into(),
            destination: "acct_1".into(),
            idempotency_key: "instance=dev,bookingId=x,session=1".into(),
            source: Some("tok_visa".into()),
            customer: None,
        };

        let first = gateway.charge_card(req()).await.unwrap();
        let second = gateway.charge_card(req()).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(gateway.charges.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn forced_decline_returns_charge_error() {
        let gateway = MockGatewayAdapter::declining(50);
        let result = gateway
            .charge_card(ChargeRequest {
                value: Decimal::new(1000, 2),
                description: "test".into(),
                statement_descriptor: "TEST".into(),
                destination: "acct_1".into(),
                idempotency_key: "instance=dev,bookingId=x,session=1".into(),
                source: Some("tok_visa".into()),
                customer: None,
            })
            .await;
        assert!(matches!(result, Err(AppError::Charge(_))));
    }
}
