use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AppResult, OracleError};
use crate::ledger::models::to_minor_units;

/// Oracle-side order status. A separate enum from the ledger's
/// `OrderStatus`: REGISTERED and PROCESSING both keep the reconciler
/// polling, only INVALID and PROCESSED are terminal verdicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OracleStatus {
    Registered,
    Processing,
    Invalid,
    Processed,
}

/// Verdict reported by the accrual system for one order number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleVerdict {
    #[serde(rename = "order")]
    pub number: String,
    pub status: OracleStatus,
    /// Accrued amount in major units; present only when status = PROCESSED.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accrual: Option<Decimal>,
}

impl OracleVerdict {
    /// The single point where oracle major units become ledger minor units.
    /// A missing accrual on a PROCESSED verdict counts as zero.
    pub fn accrual_minor_units(&self) -> AppResult<i64> {
        to_minor_units(self.accrual.unwrap_or(Decimal::ZERO))
    }
}

/// External system of record for whether and how much an order accrues.
#[async_trait]
pub trait AccrualOracle: Send + Sync {
    async fn get_order(&self, number: &str) -> Result<OracleVerdict, OracleError>;
}

/// HTTP client for the accrual service.
pub struct AccrualClient {
    client: Client,
    base_url: String,
}

impl AccrualClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client: Client::new(),
            base_url,
        }
    }
}

#[async_trait]
impl AccrualOracle for AccrualClient {
    async fn get_order(&self, number: &str) -> Result<OracleVerdict, OracleError> {
        let url = format!("{}/api/orders/{}", self.base_url, number);
        debug!(%url, "querying accrual service");

        let response = self.client.get(&url).send().await?;

        match response.status() {
            StatusCode::OK => Ok(response.json::<OracleVerdict>().await?),
            StatusCode::NO_CONTENT => Err(OracleError::NotRegistered),
            StatusCode::TOO_MANY_REQUESTS => Err(OracleError::RateLimited),
            status => Err(OracleError::Internal(format!(
                "unexpected status {status} for order {number}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_verdict_decodes_with_accrual() {
        let verdict: OracleVerdict =
            serde_json::from_str(r#"{"order":"79927398713","status":"PROCESSED","accrual":12.34}"#)
                .unwrap();

        assert_eq!(verdict.number, "79927398713");
        assert_eq!(verdict.status, OracleStatus::Processed);
        assert_eq!(verdict.accrual, Some(Decimal::from_str("12.34").unwrap()));
        assert_eq!(verdict.accrual_minor_units().unwrap(), 1234);
    }

    #[test]
    fn test_verdict_decodes_without_accrual() {
        let verdict: OracleVerdict =
            serde_json::from_str(r#"{"order":"79927398713","status":"PROCESSING"}"#).unwrap();

        assert_eq!(verdict.status, OracleStatus::Processing);
        assert_eq!(verdict.accrual, None);
        assert_eq!(verdict.accrual_minor_units().unwrap(), 0);
    }

    #[test]
    fn test_verdict_rejects_unknown_status() {
        let result = serde_json::from_str::<OracleVerdict>(
            r#"{"order":"79927398713","status":"EXPLODED"}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_retryable_errors() {
        assert!(OracleError::NotRegistered.is_retryable());
        assert!(OracleError::RateLimited.is_retryable());
        assert!(!OracleError::Internal("503".to_string()).is_retryable());
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = AccrualClient::new("http://accrual:8080/");
        assert_eq!(client.base_url, "http://accrual:8080");
    }
}
