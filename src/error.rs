use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use sqlx::migrate::MigrateError;
use thiserror::Error;

/// Top-level error type for the entire application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Reconcile error: {0}")]
    Reconcile(#[from] ReconcileError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Errors reported by the external accrual oracle.
///
/// `NotRegistered` and `RateLimited` are retryable: a reconciliation task
/// absorbs them and polls again. Everything else is fatal for the task.
#[derive(Error, Debug)]
pub enum OracleError {
    #[error("order is not registered with the accrual service")]
    NotRegistered,

    #[error("accrual service is rate limiting requests")]
    RateLimited,

    #[error("accrual service returned an unexpected response: {0}")]
    Internal(String),

    #[error("accrual service request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl OracleError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, OracleError::NotRegistered | OracleError::RateLimited)
    }
}

/// Terminal failures of a reconciliation task. Write failures carry which
/// ledger write was lost; `Cancelled` is the distinct "gave up" outcome.
#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("order {number}: accrual check failed: {source}")]
    Oracle {
        number: String,
        #[source]
        source: OracleError,
    },

    #[error("order {number}: status write failed: {source}")]
    StatusWrite {
        number: String,
        #[source]
        source: Box<AppError>,
    },

    #[error("order {number}: finalize write failed: {source}")]
    FinalizeWrite {
        number: String,
        #[source]
        source: Box<AppError>,
    },

    #[error("order {number}: reconciliation cancelled before a terminal verdict")]
    Cancelled { number: String },
}

/// Task pool errors
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("task pool is shut down and no longer accepts submissions")]
    Closed,
}

/// Authentication errors
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("invalid login or password")]
    InvalidCredentials,

    #[error("missing bearer token")]
    MissingToken,

    #[error("invalid or expired token")]
    InvalidToken,

    #[error("password hashing error: {0}")]
    PasswordHash(String),

    #[error("token signing error: {0}")]
    Token(String),
}

/// Order upload errors
#[derive(Error, Debug)]
pub enum OrderError {
    #[error("order number {0} failed validation")]
    InvalidNumber(String),

    #[error("order number {0} was uploaded by another user")]
    NumberTaken(String),
}

/// Ledger write errors with a user-facing meaning
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("login {0} is already taken")]
    LoginTaken(String),

    #[error("balance is too low for the requested withdrawal")]
    InsufficientBalance,
}

/// API error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = match self {
            AppError::Auth(AuthError::InvalidCredentials) => (
                StatusCode::UNAUTHORIZED,
                "INVALID_CREDENTIALS",
                "Invalid login or password".to_string(),
                None,
            ),
            AppError::Auth(AuthError::MissingToken) => (
                StatusCode::UNAUTHORIZED,
                "MISSING_TOKEN",
                "Authorization header with a bearer token is required".to_string(),
                None,
            ),
            AppError::Auth(AuthError::InvalidToken) => (
                StatusCode::UNAUTHORIZED,
                "INVALID_TOKEN",
                "Bearer token is invalid or expired".to_string(),
                None,
            ),
            AppError::Ledger(LedgerError::LoginTaken(login)) => (
                StatusCode::CONFLICT,
                "LOGIN_TAKEN",
                format!("Login {} is already taken", login),
                None,
            ),
            AppError::Ledger(LedgerError::InsufficientBalance) => (
                StatusCode::PAYMENT_REQUIRED,
                "INSUFFICIENT_BALANCE",
                "Balance is too low for the requested withdrawal".to_string(),
                None,
            ),
            AppError::Order(OrderError::InvalidNumber(number)) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "INVALID_ORDER_NUMBER",
                format!("Order number {} failed validation", number),
                Some(serde_json::json!({ "number": number })),
            ),
            AppError::Order(OrderError::NumberTaken(number)) => (
                StatusCode::CONFLICT,
                "ORDER_NUMBER_TAKEN",
                format!("Order number {} was uploaded by another user", number),
                Some(serde_json::json!({ "number": number })),
            ),
            AppError::Scheduler(SchedulerError::Closed) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "SCHEDULER_UNAVAILABLE",
                "Background processing is shutting down".to_string(),
                None,
            ),
            AppError::NotFound(what) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("Not found: {}", what),
                None,
            ),
            AppError::InvalidInput(msg) => (
                StatusCode::BAD_REQUEST,
                "INVALID_INPUT",
                msg,
                None,
            ),
            AppError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                "A database error occurred".to_string(),
                None,
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
                None,
            ),
        };

        let body = Json(ErrorResponse {
            error: message,
            error_code: error_code.to_string(),
            details,
        });

        (status, body).into_response()
    }
}

impl From<MigrateError> for AppError {
    fn from(error: MigrateError) -> Self {
        AppError::Internal(format!("Migration error: {:?}", error))
    }
}

impl From<rust_decimal::Error> for AppError {
    fn from(error: rust_decimal::Error) -> Self {
        AppError::InvalidInput(format!("Decimal conversion error: {:?}", error))
    }
}

/// Result type alias for the application
pub type AppResult<T> = Result<T, AppError>;
