pub mod broker;

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Queue carrying OrderCreated events from the orders service to the
/// payments service.
pub const ORDER_PAYMENTS_QUEUE: &str = "order-payments";

/// Queue carrying payment results (and payment-side audit events) back to
/// the orders service.
pub const PAYMENT_RESULTS_QUEUE: &str = "payment-results";

/// Published by the orders service when an order enters PaymentPending.
/// `id` doubles as the outbox row id and the inbox deduplication key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OrderCreated {
    pub id: Uuid,
    pub order_id: i32,
    pub user_id: Uuid,
    pub amount: BigDecimal,
}

/// Published by the payments service once it has decided the outcome of an
/// order. Terminal message of the saga.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PaymentResult {
    pub id: Uuid,
    pub order_id: i32,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub processed_at: DateTime<Utc>,
}

impl PaymentResult {
    pub fn processed(order_id: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            success: true,
            reason: None,
            processed_at: Utc::now(),
        }
    }

    pub fn failed(order_id: i32, reason: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            success: false,
            reason: Some(reason.to_string()),
            processed_at: Utc::now(),
        }
    }
}

/// Audit event appended when a payment account is created.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AccountCreated {
    pub id: Uuid,
    pub account_id: i32,
    pub user_id: Uuid,
}

/// Audit event appended when a deposit credits an account. Shares the
/// PaymentProcessed tag but carries no OrderId, so the orders service
/// ignores it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DepositReceipt {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount: BigDecimal,
    pub new_balance: BigDecimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Created,
    PaymentPending,
    PaymentProcessed,
    PaymentFailed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Created => "Created",
            OrderStatus::PaymentPending => "PaymentPending",
            OrderStatus::PaymentProcessed => "PaymentProcessed",
            OrderStatus::PaymentFailed => "PaymentFailed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Created" => Some(OrderStatus::Created),
            "PaymentPending" => Some(OrderStatus::PaymentPending),
            "PaymentProcessed" => Some(OrderStatus::PaymentProcessed),
            "PaymentFailed" => Some(OrderStatus::PaymentFailed),
            _ => None,
        }
    }

    /// Terminal status for a payment result's success flag.
    pub fn from_result(success: bool) -> Self {
        if success {
            OrderStatus::PaymentProcessed
        } else {
            OrderStatus::PaymentFailed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn order_created_uses_pascal_case_keys() {
        let event = OrderCreated {
            id: Uuid::new_v4(),
            order_id: 7,
            user_id: Uuid::new_v4(),
            amount: BigDecimal::from_str("99.90").unwrap(),
        };

        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert!(json.get("Id").is_some());
        assert_eq!(json["OrderId"], 7);
        assert!(json.get("UserId").is_some());
        assert_eq!(json["Amount"], "99.90");
    }

    #[test]
    fn payment_result_omits_reason_when_successful() {
        let result = PaymentResult::processed(3);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["Success"], true);
        assert!(json.get("Reason").is_none());
        assert!(json.get("ProcessedAt").is_some());

        let failed = PaymentResult::failed(3, "Insufficient funds");
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["Reason"], "Insufficient funds");
    }

    #[test]
    fn payment_result_round_trips() {
        let result = PaymentResult::failed(42, "Account not found");
        let json = serde_json::to_string(&result).unwrap();
        let back: PaymentResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, result.id);
        assert_eq!(back.order_id, 42);
        assert!(!back.success);
        assert_eq!(back.reason.as_deref(), Some("Account not found"));
    }

    #[test]
    fn order_status_round_trips_through_strings() {
        for status in [
            OrderStatus::Created,
            OrderStatus::PaymentPending,
            OrderStatus::PaymentProcessed,
            OrderStatus::PaymentFailed,
        ] {
            assert_eq!(OrderStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(OrderStatus::parse("Refunded"), None);
    }

    #[test]
    fn result_status_mapping() {
        assert_eq!(OrderStatus::from_result(true), OrderStatus::PaymentProcessed);
        assert_eq!(OrderStatus::from_result(false), OrderStatus::PaymentFailed);
    }
}
