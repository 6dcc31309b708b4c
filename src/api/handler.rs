use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use super::models::*;
use crate::{
    auth::{AuthService, AuthUser},
    error::{AppError, AppResult, AuthError, OrderError},
    ledger::{
        models::{is_valid_order_number, to_minor_units, Order},
        repository::LedgerRepository,
    },
    reconciler::OrderReconciler,
    scheduler::TaskPool,
};

#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<LedgerRepository>,
    pub auth: Arc<AuthService>,
    pub reconciler: Arc<OrderReconciler>,
    pub task_pool: Arc<TaskPool<Order>>,
    /// Advisory deadline for one order's reconciliation task.
    pub reconcile_timeout: Duration,
}

/// Repeat upload by the same user is a 200; anyone else's number is a 409.
fn existing_order_status(existing: &Order, user_id: Uuid) -> Result<StatusCode, OrderError> {
    if existing.user_id == user_id {
        Ok(StatusCode::OK)
    } else {
        Err(OrderError::NumberTaken(existing.number.clone()))
    }
}

fn bearer_response(token: String) -> Response {
    (
        StatusCode::OK,
        [(header::AUTHORIZATION, format!("Bearer {token}"))],
    )
        .into_response()
}

/// Register a new user and log them in
/// POST /api/user/register
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> AppResult<Response> {
    payload
        .validate()
        .map_err(|err| AppError::InvalidInput(err.to_string()))?;

    let password_hash = state.auth.hash_password(&payload.password)?;
    let user = state.ledger.create_user(&payload.login, &password_hash).await?;
    let token = state.auth.issue_token(user.id)?;

    info!(login = %user.login, "user registered");

    Ok(bearer_response(token))
}

/// Log an existing user in
/// POST /api/user/login
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<Response> {
    payload
        .validate()
        .map_err(|err| AppError::InvalidInput(err.to_string()))?;

    let user = state
        .ledger
        .get_user_by_login(&payload.login)
        .await?
        .ok_or(AuthError::InvalidCredentials)?;

    if !state
        .auth
        .verify_password(&payload.password, &user.password_hash)?
    {
        return Err(AuthError::InvalidCredentials.into());
    }

    let token = state.auth.issue_token(user.id)?;

    info!(login = %user.login, "user logged in");

    Ok(bearer_response(token))
}

/// Upload an order number for accrual
/// POST /api/user/orders (text/plain body)
///
/// 200 if this user already uploaded the number, 409 if another user did,
/// 422 if the number fails the Luhn check, 202 once the order is saved and
/// its reconciliation task is queued.
pub async fn upload_order(
    AuthUser(user_id): AuthUser,
    State(state): State<AppState>,
    body: String,
) -> AppResult<StatusCode> {
    let number = body.trim();
    if !is_valid_order_number(number) {
        return Err(OrderError::InvalidNumber(number.to_string()).into());
    }

    if let Some(existing) = state.ledger.get_order_by_number(number).await? {
        return existing_order_status(&existing, user_id).map_err(Into::into);
    }

    let order = match state.ledger.save_order(user_id, number).await {
        Ok(order) => order,
        // Lost a race with a concurrent upload of the same number; re-read
        // to tell "this user already has it" from a genuine conflict.
        Err(AppError::Order(OrderError::NumberTaken(_))) => {
            let existing = state
                .ledger
                .get_order_by_number(number)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("order {}", number)))?;
            return existing_order_status(&existing, user_id).map_err(Into::into);
        }
        Err(err) => return Err(err),
    };

    // Fire-and-forget: the upload response does not wait for the verdict.
    // A full queue suspends this handler until a worker frees a slot.
    let task = state.reconciler.task(order.id, order.number.clone());
    state
        .task_pool
        .submit(
            CancellationToken::new(),
            state.reconcile_timeout,
            task,
            false,
        )
        .await?;

    info!(order = %order.number, "order accepted for reconciliation");

    Ok(StatusCode::ACCEPTED)
}

/// List the user's orders, newest first
/// GET /api/user/orders
pub async fn list_orders(
    AuthUser(user_id): AuthUser,
    State(state): State<AppState>,
) -> AppResult<Response> {
    let orders = state.ledger.list_user_orders(user_id).await?;

    if orders.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    let response: Vec<OrderResponse> = orders.into_iter().map(OrderResponse::from).collect();
    Ok(Json(response).into_response())
}

/// Current and withdrawn bonus totals
/// GET /api/user/balance
pub async fn get_balance(
    AuthUser(user_id): AuthUser,
    State(state): State<AppState>,
) -> AppResult<Json<BalanceResponse>> {
    let user = state
        .ledger
        .get_user(user_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("user {}", user_id)))?;

    let withdrawn = state.ledger.withdrawn_total(user_id).await?;

    Ok(Json(BalanceResponse {
        current: crate::ledger::models::to_major_units(user.balance),
        withdrawn: crate::ledger::models::to_major_units(withdrawn),
    }))
}

/// Withdraw bonus points against an order number
/// POST /api/user/balance/withdraw
pub async fn withdraw(
    AuthUser(user_id): AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<WithdrawRequest>,
) -> AppResult<StatusCode> {
    payload
        .validate()
        .map_err(|err| AppError::InvalidInput(err.to_string()))?;

    if !is_valid_order_number(&payload.order) {
        return Err(OrderError::InvalidNumber(payload.order.clone()).into());
    }

    let amount = to_minor_units(payload.sum)?;
    state.ledger.withdraw(user_id, &payload.order, amount).await?;

    info!(order = %payload.order, amount, "withdrawal processed");

    Ok(StatusCode::OK)
}

/// List the user's withdrawals, newest first
/// GET /api/user/withdrawals
pub async fn list_withdrawals(
    AuthUser(user_id): AuthUser,
    State(state): State<AppState>,
) -> AppResult<Response> {
    let withdrawals = state.ledger.list_user_withdrawals(user_id).await?;

    if withdrawals.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    let response: Vec<WithdrawalResponse> = withdrawals
        .into_iter()
        .map(WithdrawalResponse::from)
        .collect();
    Ok(Json(response).into_response())
}

/// GET /health
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: Utc::now(),
    })
}
