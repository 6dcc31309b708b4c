use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{prelude::FromRow, Type};
use std::fmt;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// How many minor units make one bonus point. The ledger stores integer
/// minor units; the oracle and the HTTP API speak fractional major units.
pub const MINOR_UNITS_PER_POINT: i64 = 100;

/// Ledger-side order status. Orders only move forward:
/// NEW -> PROCESSING -> {INVALID | PROCESSED}, or straight from NEW to a
/// terminal status. INVALID and PROCESSED are one-way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "order_status", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    New,
    Processing,
    Invalid,
    Processed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Invalid => "INVALID",
            OrderStatus::Processed => "PROCESSED",
        }
    }

    /// Terminal statuses never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Invalid | OrderStatus::Processed)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Order entity
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub number: String,
    pub status: OrderStatus,
    /// Bonus points in minor units; meaningful only once status = PROCESSED.
    pub accrual: i64,
    pub uploaded_at: DateTime<Utc>,
}

/// User entity
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub login: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// Current bonus balance in minor units.
    pub balance: i64,
    pub created_at: DateTime<Utc>,
}

/// Withdrawal entity - a debit of bonus points against an order number
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Withdrawal {
    pub id: Uuid,
    pub user_id: Uuid,
    pub order_number: String,
    /// Amount withdrawn, in minor units.
    pub amount: i64,
    pub processed_at: DateTime<Utc>,
}

/// Convert a fractional major-unit amount to integer minor units,
/// truncating any sub-cent remainder.
pub fn to_minor_units(amount: Decimal) -> AppResult<i64> {
    amount
        .checked_mul(Decimal::from(MINOR_UNITS_PER_POINT))
        .and_then(|scaled| scaled.trunc().to_i64())
        .ok_or_else(|| {
            AppError::InvalidInput(format!("amount {} does not fit in minor units", amount))
        })
}

/// Convert integer minor units back to a major-unit decimal.
pub fn to_major_units(minor: i64) -> Decimal {
    Decimal::new(minor, 2)
}

/// Luhn check over a decimal order number, run on the upload path before a
/// reconciliation task is ever created. Starting parity comes from the
/// number length; doubled digits above 9 use the canonical -9 correction.
pub fn is_valid_order_number(number: &str) -> bool {
    if number.is_empty() {
        return false;
    }

    let parity = number.len() % 2;
    let mut sum = 0u32;
    for (i, ch) in number.chars().enumerate() {
        let Some(mut digit) = ch.to_digit(10) else {
            return false;
        };
        if i % 2 == parity {
            digit *= 2;
            if digit > 9 {
                digit -= 9;
            }
        }
        sum += digit;
    }

    sum % 10 == 0
}
