use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::models::{Order, OrderStatus, User, Withdrawal};
use crate::error::{AppError, AppResult, LedgerError, OrderError};

/// The narrow write surface a reconciliation task needs. Kept separate from
/// the full repository so tasks can run against test doubles.
#[async_trait]
pub trait OrderLedger: Send + Sync {
    /// Durably set the order status without touching the accrual.
    async fn set_order_status(&self, order_id: Uuid, status: OrderStatus) -> AppResult<Order>;

    /// Durably set the order status and accrual, and credit the owning
    /// user's balance by the same amount, as one atomic unit.
    async fn set_order_status_and_accrual(
        &self,
        order_id: Uuid,
        status: OrderStatus,
        accrual: i64,
    ) -> AppResult<Order>;
}

/// Ledger repository - THE source of truth for all state
pub struct LedgerRepository {
    pub pool: PgPool,
}

const ORDER_COLUMNS: &str = "id, user_id, number, status, accrual, uploaded_at";

fn constraint_name(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db) => db.constraint().map(str::to_owned),
        _ => None,
    }
}

/// Two uploads of the same number can both pass the pre-insert lookup; the
/// loser of that race hits `orders_number_key` and must surface as a
/// conflict, not a database error.
fn order_insert_error(err: sqlx::Error, number: &str) -> AppError {
    match constraint_name(&err).as_deref() {
        Some("orders_number_key") => OrderError::NumberTaken(number.to_string()).into(),
        _ => AppError::Database(err),
    }
}

impl LedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // ========== USER OPERATIONS ==========

    pub async fn create_user(&self, login: &str, password_hash: &str) -> AppResult<User> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (login, password_hash)
            VALUES ($1, $2)
            RETURNING id, login, password_hash, balance, created_at
            "#,
        )
        .bind(login)
        .bind(password_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| match constraint_name(&err).as_deref() {
            Some("users_login_key") => LedgerError::LoginTaken(login.to_string()).into(),
            _ => AppError::Database(err),
        })?;

        Ok(user)
    }

    pub async fn get_user_by_login(&self, login: &str) -> AppResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, login, password_hash, balance, created_at
            FROM users
            WHERE login = $1
            "#,
        )
        .bind(login)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    pub async fn get_user(&self, user_id: Uuid) -> AppResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, login, password_hash, balance, created_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    // ========== ORDER OPERATIONS ==========

    /// Persist a freshly uploaded order with status NEW and no accrual.
    pub async fn save_order(&self, user_id: Uuid, number: &str) -> AppResult<Order> {
        let order = sqlx::query_as::<_, Order>(&format!(
            r#"
            INSERT INTO orders (user_id, number)
            VALUES ($1, $2)
            RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(number)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| order_insert_error(err, number))?;

        Ok(order)
    }

    pub async fn get_order_by_number(&self, number: &str) -> AppResult<Option<Order>> {
        let order = sqlx::query_as::<_, Order>(&format!(
            r#"
            SELECT {ORDER_COLUMNS}
            FROM orders
            WHERE number = $1
            "#
        ))
        .bind(number)
        .fetch_optional(&self.pool)
        .await?;

        Ok(order)
    }

    pub async fn list_user_orders(&self, user_id: Uuid) -> AppResult<Vec<Order>> {
        let orders = sqlx::query_as::<_, Order>(&format!(
            r#"
            SELECT {ORDER_COLUMNS}
            FROM orders
            WHERE user_id = $1
            ORDER BY uploaded_at DESC
            "#
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(orders)
    }

    // ========== WITHDRAWAL OPERATIONS ==========

    /// Debit the user's balance and record the withdrawal in one
    /// transaction. The balance check is the `users_balance_nonnegative`
    /// constraint so concurrent withdrawals cannot overdraw.
    pub async fn withdraw(
        &self,
        user_id: Uuid,
        order_number: &str,
        amount: i64,
    ) -> AppResult<Withdrawal> {
        let mut tx = self.pool.begin().await?;

        let debited = sqlx::query("UPDATE users SET balance = balance - $2 WHERE id = $1")
            .bind(user_id)
            .bind(amount)
            .execute(&mut *tx)
            .await
            .map_err(|err| match constraint_name(&err).as_deref() {
                Some("users_balance_nonnegative") => LedgerError::InsufficientBalance.into(),
                _ => AppError::Database(err),
            })?;

        if debited.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("user {}", user_id)));
        }

        let withdrawal = sqlx::query_as::<_, Withdrawal>(
            r#"
            INSERT INTO withdrawals (user_id, order_number, amount)
            VALUES ($1, $2, $3)
            RETURNING id, user_id, order_number, amount, processed_at
            "#,
        )
        .bind(user_id)
        .bind(order_number)
        .bind(amount)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(withdrawal)
    }

    pub async fn withdrawn_total(&self, user_id: Uuid) -> AppResult<i64> {
        let total = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COALESCE(SUM(amount), 0)::BIGINT
            FROM withdrawals
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(total)
    }

    pub async fn list_user_withdrawals(&self, user_id: Uuid) -> AppResult<Vec<Withdrawal>> {
        let withdrawals = sqlx::query_as::<_, Withdrawal>(
            r#"
            SELECT id, user_id, order_number, amount, processed_at
            FROM withdrawals
            WHERE user_id = $1
            ORDER BY processed_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(withdrawals)
    }
}

#[async_trait]
impl OrderLedger for LedgerRepository {
    async fn set_order_status(&self, order_id: Uuid, status: OrderStatus) -> AppResult<Order> {
        let order = sqlx::query_as::<_, Order>(&format!(
            r#"
            UPDATE orders
            SET status = $2
            WHERE id = $1
            RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(order_id)
        .bind(status)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("order {}", order_id)))?;

        Ok(order)
    }

    async fn set_order_status_and_accrual(
        &self,
        order_id: Uuid,
        status: OrderStatus,
        accrual: i64,
    ) -> AppResult<Order> {
        let mut tx = self.pool.begin().await?;

        let order = sqlx::query_as::<_, Order>(&format!(
            r#"
            UPDATE orders
            SET status = $2, accrual = $3
            WHERE id = $1
            RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(order_id)
        .bind(status)
        .bind(accrual)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("order {}", order_id)))?;

        let credited = sqlx::query("UPDATE users SET balance = balance + $2 WHERE id = $1")
            .bind(order.user_id)
            .bind(accrual)
            .execute(&mut *tx)
            .await?;

        if credited.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("user {}", order.user_id)));
        }

        tx.commit().await?;

        Ok(order)
    }
}
