/**
 * DOMAIN LAYER - Ledger Item Model
 *
 * Typed line-item variants for the double-entry journal, plus the
 * entities a TransactionBuilder reads and mutates (§3, §4.1).
 *
 * Architecture Layer: Domain (Layer 4)
 * Responsibility: define the shape of the ledger, nothing else - no
 * SQL, no HTTP, no gateway calls live here.
 *
 * `itemType` is a tagged union here instead of the teacher's
 * string-keyed map (§9: "replace the string-keyed transactionItemsByType
 * map with a tagged union indexed by itemType").
 */

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// One posting against a typed account or entity (§3: TransactionItem).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemType {
    TicketSale,
    TicketRefund,
    RoutePass,
    Discount,
    Payment,
    Transfer,
    /// COGS mirror line, named `account` in the spec.
    Account,
}

/// A single debit or credit posting. Exactly one of `debit`/`credit` is
/// positive; the other is `Decimal::ZERO` (§3 invariant 3: amounts are
/// never negative, sign lives in the column).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionItem {
    pub item_type: ItemType,
    pub item_id: Option<Uuid>,
    pub debit: Decimal,
    pub credit: Decimal,
    pub notes: String,
    /// Only present once posted; an item under construction in a
    /// still-building Transaction has no id yet.
    pub transaction_id: Option<Uuid>,
}

impl TransactionItem {
    pub fn debit(item_type: ItemType, item_id: Option<Uuid>, amount: Decimal, notes: impl Into<String>) -> Self {
        Self { item_type, item_id, debit: amount, credit: Decimal::ZERO, notes: notes.into(), transaction_id: None }
    }

    pub fn credit(item_type: ItemType, item_id: Option<Uuid>, amount: Decimal, notes: impl Into<String>) -> Self {
        Self { item_type, item_id, debit: Decimal::ZERO, credit: amount, notes: notes.into(), transaction_id: None }
    }

    /// Signed contribution to the zero-sum total: credit is positive,
    /// debit is negative.
    pub fn signed_amount(&self) -> Decimal {
        self.credit - self.debit
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionType {
    TicketPurchase,
    RoutePassPurchase,
    RefundPayment,
    Cancellation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CreatorScope {
    User,
    Admin,
    SuperAdmin,
    Driver,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Creator {
    pub scope: CreatorScope,
    pub id: Uuid,
}

/// A balanced journal entry comprising multiple line items, committed
/// atomically with the operational state changes it represents (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Option<Uuid>,
    pub transaction_type: TransactionType,
    pub committed: bool,
    pub description: String,
    pub created_by: Creator,
    pub items: Vec<TransactionItem>,
}

impl Transaction {
    /// `| Σ items.debit − Σ items.credit | < 1e-6` (§3 invariant 1, §8).
    pub fn is_zero_sum(&self) -> bool {
        let total: Decimal = self.items.iter().map(|i| i.signed_amount()).sum();
        total.abs() < Decimal::new(1, 6)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TicketStatus {
    Pending,
    Valid,
    Void,
    Failed,
    Refunded,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TicketNotes {
    pub discount_value: Decimal,
    pub refunded_transaction_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: Uuid,
    pub user_id: Uuid,
    pub trip_id: Uuid,
    pub board_stop_id: Uuid,
    pub alight_stop_id: Uuid,
    pub status: TicketStatus,
    pub notes: TicketNotes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoutePassStatus {
    Valid,
    Void,
    Expired,
    Refunded,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutePassNotes {
    pub price: Decimal,
    pub discount_value: Decimal,
    pub refunded_transaction_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutePass {
    pub id: Uuid,
    pub user_id: Uuid,
    pub company_id: Uuid,
    pub tag: String,
    pub status: RoutePassStatus,
    pub notes: RoutePassNotes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingWindowType {
    Stop,
    FirstStop,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BookingInfo {
    pub window_type: BookingWindowType,
    /// Window size in milliseconds.
    pub window_size: i64,
}

impl Default for BookingInfo {
    /// "If bookingInfo fails validation, use defaults
    /// {windowType: stop, windowSize: 0}" (§4.4).
    fn default() -> Self {
        Self { window_type: BookingWindowType::Stop, window_size: 0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TripStop {
    pub id: Uuid,
    pub time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trip {
    pub id: Uuid,
    pub route_id: Uuid,
    pub is_running: bool,
    pub seats_available: i32,
    pub booking_info: BookingInfo,
    pub price: Decimal,
    pub stops: Vec<TripStop>,
}

impl Trip {
    pub fn stop(&self, stop_id: Uuid) -> Option<&TripStop> {
        self.stops.iter().find(|s| s.id == stop_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    pub id: Uuid,
    pub transport_company_id: Uuid,
    pub tags: Vec<String>,
}

/// Owns the merchant the statement descriptor is drawn from (§4.9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportCompany {
    pub id: Uuid,
    pub name: String,
    pub sms_op_code: Option<String>,
}

impl TransportCompany {
    /// `companyDescriptor = smsOpCode ?? name` (§4.9).
    pub fn descriptor(&self) -> &str {
        self.sms_op_code.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaymentOptions {
    pub is_micro: bool,
}

/// 1:1 with the `payment` line of a Transaction; the external-gateway
/// side of the ledger (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub payment_resource: Option<String>,
    pub data: Value,
    pub options: PaymentOptions,
}

/// Gateway-side charge record (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Charge {
    pub id: String,
    pub amount_cents: i64,
    pub amount_refunded_cents: i64,
    pub source: String,
}

/// A requested trip booking, as supplied by the caller to
/// `TransactionBuilder::init_for_ticket_sale` (§4.1).
#[derive(Debug, Clone, Deserialize)]
pub struct RequestedTrip {
    pub trip_id: Uuid,
    pub board_stop_id: Uuid,
    pub alight_stop_id: Uuid,
    pub user_id: Uuid,
}
