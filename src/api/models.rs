use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::ledger::models::{to_major_units, Order, OrderStatus, Withdrawal};

// ========== REQUEST MODELS ==========

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(length(min = 1, message = "login must not be empty"))]
    pub login: String,
    #[validate(length(min = 1, message = "password must not be empty"))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, message = "login must not be empty"))]
    pub login: String,
    #[validate(length(min = 1, message = "password must not be empty"))]
    pub password: String,
}

/// Withdraw bonus points against an order number.
#[derive(Debug, Deserialize, Validate)]
pub struct WithdrawRequest {
    #[validate(length(min = 1, message = "order number must not be empty"))]
    pub order: String,
    /// Amount in major units. A non-positive sum would turn the balance
    /// debit into a credit, so it never reaches the ledger.
    #[validate(custom = "validate_positive_sum")]
    pub sum: Decimal,
}

fn validate_positive_sum(sum: &Decimal) -> Result<(), ValidationError> {
    if sum.is_sign_positive() && !sum.is_zero() {
        Ok(())
    } else {
        Err(ValidationError::new("sum must be positive"))
    }
}

// ========== RESPONSE MODELS ==========

/// One uploaded order. Accrual is reported in major units and only once
/// the order is PROCESSED.
#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub number: String,
    pub status: OrderStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accrual: Option<Decimal>,
    pub uploaded_at: DateTime<Utc>,
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        let accrual = match order.status {
            OrderStatus::Processed => Some(to_major_units(order.accrual)),
            _ => None,
        };

        Self {
            number: order.number,
            status: order.status,
            accrual,
            uploaded_at: order.uploaded_at,
        }
    }
}

/// Current balance and lifetime withdrawn total, both in major units.
#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub current: Decimal,
    pub withdrawn: Decimal,
}

#[derive(Debug, Serialize)]
pub struct WithdrawalResponse {
    pub order: String,
    pub sum: Decimal,
    pub processed_at: DateTime<Utc>,
}

impl From<Withdrawal> for WithdrawalResponse {
    fn from(withdrawal: Withdrawal) -> Self {
        Self {
            order: withdrawal.order_number,
            sum: to_major_units(withdrawal.amount),
            processed_at: withdrawal.processed_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::str::FromStr;
    use uuid::Uuid;

    fn order(status: OrderStatus, accrual: i64) -> Order {
        Order {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            number: "79927398713".to_string(),
            status,
            accrual,
            uploaded_at: Utc::now(),
        }
    }

    #[test]
    fn test_accrual_reported_only_when_processed() {
        let response = OrderResponse::from(order(OrderStatus::Processed, 1234));
        assert_eq!(response.accrual, Some(Decimal::from_str("12.34").unwrap()));

        let response = OrderResponse::from(order(OrderStatus::Processing, 1234));
        assert_eq!(response.accrual, None);

        let response = OrderResponse::from(order(OrderStatus::New, 0));
        assert_eq!(response.accrual, None);
    }

    #[test]
    fn test_accrual_omitted_from_json_when_absent() {
        let json =
            serde_json::to_value(OrderResponse::from(order(OrderStatus::New, 0))).unwrap();
        assert!(json.get("accrual").is_none());
        assert_eq!(json["status"], "NEW");
    }

    #[test]
    fn test_withdraw_request_rejects_non_positive_sums() {
        let request = |sum: &str| WithdrawRequest {
            order: "79927398713".to_string(),
            sum: Decimal::from_str(sum).unwrap(),
        };

        assert!(request("-5").validate().is_err());
        assert!(request("0").validate().is_err());
        assert!(request("0.01").validate().is_ok());
        assert!(request("751").validate().is_ok());
    }

    #[test]
    fn test_register_request_rejects_empty_fields() {
        let request = RegisterRequest {
            login: String::new(),
            password: "secret".to_string(),
        };
        assert!(request.validate().is_err());

        let request = RegisterRequest {
            login: "alice".to_string(),
            password: "secret".to_string(),
        };
        assert!(request.validate().is_ok());
    }
}
