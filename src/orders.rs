//! Order domain types and the status transition graph.
//!
//! The transition graph here is the single authority on which status changes
//! are legal; handlers and UI clients only render what these functions decide.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::ActorRole;

/// Order fulfillment status.
///
/// Legal transitions:
/// `pending -> confirmed -> preparing -> shipped -> delivered`, plus
/// `pending -> cancelled` and `confirmed -> cancelled`. `delivered` and
/// `cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Preparing,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 6] = [
        Self::Pending,
        Self::Confirmed,
        Self::Preparing,
        Self::Shipped,
        Self::Delivered,
        Self::Cancelled,
    ];

    /// The single legal forward successor, `None` for terminal states.
    pub fn next_status(self) -> Option<OrderStatus> {
        match self {
            Self::Pending => Some(Self::Confirmed),
            Self::Confirmed => Some(Self::Preparing),
            Self::Preparing => Some(Self::Shipped),
            Self::Shipped => Some(Self::Delivered),
            Self::Delivered | Self::Cancelled => None,
        }
    }

    /// Whether `target` is a direct successor of `self` in the graph.
    pub fn can_transition_to(self, target: OrderStatus) -> bool {
        if self.next_status() == Some(target) {
            return true;
        }
        // Cancellation is permitted only before shipping.
        target == Self::Cancelled && matches!(self, Self::Pending | Self::Confirmed)
    }

    /// Whether `actor` may request the `self -> target` edge.
    ///
    /// Buyers may only cancel, and only while the order is still pending.
    /// Farmers and admins may walk any edge in the graph. The system actor
    /// (settlement automation) advances forward edges but never cancels.
    pub fn requestable_by(self, target: OrderStatus, actor: ActorRole) -> bool {
        if !self.can_transition_to(target) {
            return false;
        }
        match actor {
            ActorRole::Buyer => target == Self::Cancelled && self == Self::Pending,
            ActorRole::Farmer | ActorRole::Admin => true,
            ActorRole::System => target != Self::Cancelled,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Preparing => "preparing",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payment status, tracked independently of the fulfillment graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
}

/// Payment method chosen at checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_method", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Card,
    Upi,
    Wallet,
    Cod,
}

impl PaymentMethod {
    /// Whether payment for this method finalizes through on-chain settlement.
    /// Cash on delivery is the only off-chain path.
    pub fn settles_on_chain(self) -> bool {
        !matches!(self, Self::Cod)
    }
}

/// Settlement verification status on the order, mirroring the active
/// blockchain transaction. Independent of `status`/`payment_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "settlement_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SettlementStatus {
    Pending,
    Verified,
    Failed,
}

/// Structured postal address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingAddress {
    pub street: String,
    pub city: String,
    pub state: String,
    pub zip: String,
    pub country: String,
}

/// A purchased line item, priced at time of purchase.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OrderItem {
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: i32,
    pub unit_price: i64,
    pub total_price: i64,
}

impl OrderItem {
    pub fn line_total(&self) -> i64 {
        self.unit_price * i64::from(self.quantity)
    }
}

/// A buyer's purchase request against one farmer's products, tracked through
/// fulfillment and settlement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub order_number: String,
    pub buyer_id: Uuid,
    pub farmer_id: Uuid,
    pub items: Vec<OrderItem>,
    pub total_amount: i64,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_method: PaymentMethod,
    pub shipping_address: ShippingAddress,
    pub delivery_date: Option<DateTime<Utc>>,
    pub blockchain_tx_id: Option<String>,
    pub blockchain_hash: Option<String>,
    pub blockchain_status: SettlementStatus,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Builds a new pending order from a creation request, computing line and
    /// order totals.
    pub fn new(buyer_id: Uuid, request: CreateOrderRequest) -> Self {
        let now = Utc::now();
        let id = Uuid::new_v4();

        let items: Vec<OrderItem> = request
            .items
            .into_iter()
            .map(|item| OrderItem {
                product_id: item.product_id,
                product_name: item.product_name,
                quantity: item.quantity,
                unit_price: item.unit_price,
                total_price: item.unit_price * i64::from(item.quantity),
            })
            .collect();

        let mut order = Self {
            id,
            order_number: format!("ORD-{}", id.simple()),
            buyer_id,
            farmer_id: request.farmer_id,
            items,
            total_amount: 0,
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            payment_method: request.payment_method,
            shipping_address: request.shipping_address,
            delivery_date: None,
            blockchain_tx_id: None,
            blockchain_hash: None,
            blockchain_status: SettlementStatus::Pending,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        order.recalculate_total();
        order
    }

    /// Recomputes every line total and the order total. Must be called after
    /// any item mutation so that `total_amount` always reconciles.
    pub fn recalculate_total(&mut self) {
        for item in &mut self.items {
            item.total_price = item.line_total();
        }
        self.total_amount = self.items.iter().map(|item| item.total_price).sum();
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Domain events handed to the notification fan-out.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum OrderEvent {
    Created {
        order_id: Uuid,
        buyer_id: Uuid,
        farmer_id: Uuid,
    },
    StatusChanged {
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
    },
    SettlementConfirmed {
        order_id: Uuid,
        tx_id: String,
    },
    SettlementFailed {
        order_id: Uuid,
        tx_id: String,
    },
}

/// Request DTO for placing an order.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateOrderRequest {
    pub farmer_id: Uuid,
    #[validate(length(min = 1, message = "order must contain at least one item"))]
    #[validate]
    pub items: Vec<CreateOrderItem>,
    pub payment_method: PaymentMethod,
    pub shipping_address: ShippingAddress,
}

/// A line item in an order creation request.
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CreateOrderItem {
    pub product_id: Uuid,
    #[validate(length(min = 1))]
    pub product_name: String,
    #[validate(range(min = 1, message = "quantity must be positive"))]
    pub quantity: i32,
    #[validate(range(min = 0, message = "unit price cannot be negative"))]
    pub unit_price: i64,
}

/// Request DTO for a status transition.
#[derive(Debug, Deserialize)]
pub struct TransitionRequest {
    pub status: OrderStatus,
}

/// Response DTO for a status transition. `applied` is false when the order
/// was already in the requested state and the call was an idempotent no-op.
#[derive(Debug, Serialize)]
pub struct TransitionResponse {
    pub applied: bool,
    pub order: Order,
}

/// Response DTO for the progression helper.
#[derive(Debug, Serialize)]
pub struct NextStatusResponse {
    pub next: Option<OrderStatus>,
}

/// Query parameters for listing orders.
#[derive(Debug, Default, Deserialize)]
pub struct ListOrdersQuery {
    pub buyer_id: Option<Uuid>,
    pub farmer_id: Option<Uuid>,
    pub status: Option<OrderStatus>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}
