/**
 * GATEWAY LAYER - Payment Gateway Adapter
 *
 * The payment gateway is an external collaborator with a narrow
 * interface (§1, §4.9, §9): charge, refund, retrieve-charge, plus the
 * fee/micro/descriptor helpers the ledger needs to size its lines.
 */

pub mod mock;
pub mod stripe;

use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::Result;
use crate::ledger::model::Charge;

#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub value: Decimal,
    pub description: String,
    pub statement_descriptor: String,
    /// Merchant destination account (§6 `merchant_id`).
    pub destination: String,
    pub idempotency_key: String,
    pub source: Option<String>,
    pub customer: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RefundRequest {
    pub charge_id: String,
    pub amount: Decimal,
    pub idempotency_key: String,
}

#[async_trait]
pub trait PaymentGatewayAdapter: Send + Sync {
    async fn charge_card(&self, req: ChargeRequest) -> Result<Charge>;
    async fn refund(&self, req: RefundRequest) -> Result<Charge>;
    async fn retrieve_charge(&self, resource_id: &str) -> Result<Charge>;

    fn is_micro(&self, amount_cents: i64) -> bool;
    fn is_local_and_non_amex(&self, source: &str) -> bool;
    fn calculate_admin_fee_in_cents(&self, cents: i64, is_micro: bool, is_local_and_non_amex: bool) -> i64;
    fn min_transaction_charge_in_cents(&self) -> i64;
}

/// `instance=<env>,bookingId=<txId>,session=<iat>` (§4.9, §8: must match
/// `^(Refund:)?instance=[^,]*,.*$`).
pub fn idempotency_key_for_sale(instance_tag: &str, transaction_id: Uuid, token_issued_at: i64) -> String {
    format!("instance={},bookingId={},session={}", instance_tag, transaction_id, token_issued_at)
}

pub fn idempotency_key_for_ticket_refund(instance_tag: &str, ticket_id: Uuid) -> String {
    format!("Refund:instance={},ticketId={}", instance_tag, ticket_id)
}

pub fn idempotency_key_for_route_pass_refund(instance_tag: &str, route_pass_id: Uuid) -> String {
    format!("Refund:instance={},routePassId={}", instance_tag, route_pass_id)
}

/// `companyDescriptor = smsOpCode ?? name`; drop `<>"'`, form
/// `"{descriptor[0..10]},Ref#{txId}"`, truncate to 22 chars (§4.9, §8).
pub fn statement_descriptor(company_descriptor: &str, transaction_id: Uuid) -> String {
    let cleaned: String = company_descriptor.chars().filter(|c| !matches!(c, '<' | '>' | '"' | '\'')).collect();
    let head: String = cleaned.chars().take(10).collect();
    let full = format!("{},Ref#{}", head, transaction_id);
    full.chars().take(22).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotency_key_matches_spec_pattern() {
        let tx_id = Uuid::new_v4();
        let sale = idempotency_key_for_sale("dev", tx_id, 1_700_000_000);
        assert!(sale.starts_with("instance=dev,"));

        let refund = idempotency_key_for_ticket_refund("dev", tx_id);
        assert!(refund.starts_with("Refund:instance=dev,"));
    }

    #[test]
    fn statement_descriptor_strips_forbidden_chars_and_truncates() {
        let tx_id = Uuid::new_v4();
        let descriptor = statement_descriptor("Big<Bus>Co\"'", tx_id);
        assert!(descriptor.len() <= 22);
        assert!(!descriptor.contains(['<', '>', '"', '\'']));
    }

    #[test]
    fn statement_descriptor_uses_first_ten_chars_of_company_name() {
        let tx_id = Uuid::new_v4();
        let descriptor = statement_descriptor("Greyhound Lines", tx_id);
        assert!(descriptor.starts_with("Greyhound "));
    }
}
