use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{AppResult, ReconcileError};
use crate::ledger::models::{Order, OrderStatus};
use crate::ledger::repository::OrderLedger;
use crate::oracle::{AccrualOracle, OracleStatus};

/// Factory for per-order reconciliation tasks.
///
/// Each task polls the accrual oracle on a fixed interval and converges the
/// ledger's order status with the oracle's verdict. The ledger stays the
/// single source of truth: the task only remembers the last-seen oracle
/// status, and only to avoid writing the same PROCESSING transition twice.
pub struct OrderReconciler {
    oracle: Arc<dyn AccrualOracle>,
    ledger: Arc<dyn OrderLedger>,
    poll_interval: Duration,
}

impl OrderReconciler {
    pub fn new(
        oracle: Arc<dyn AccrualOracle>,
        ledger: Arc<dyn OrderLedger>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            oracle,
            ledger,
            poll_interval,
        }
    }

    /// Produce the task body for one uploaded order, suitable for
    /// `TaskPool::submit`.
    pub fn task(
        &self,
        order_id: Uuid,
        number: String,
    ) -> impl FnOnce(CancellationToken) -> BoxFuture<'static, AppResult<Order>> + Send + 'static
    {
        let oracle = Arc::clone(&self.oracle);
        let ledger = Arc::clone(&self.ledger);
        let poll_interval = self.poll_interval;

        move |cancel| {
            reconcile_order(oracle, ledger, poll_interval, order_id, number, cancel).boxed()
        }
    }
}

async fn reconcile_order(
    oracle: Arc<dyn AccrualOracle>,
    ledger: Arc<dyn OrderLedger>,
    poll_interval: Duration,
    order_id: Uuid,
    number: String,
    cancel: CancellationToken,
) -> AppResult<Order> {
    // First poll happens one full interval after submission, never
    // immediately.
    let mut tick = interval_at(Instant::now() + poll_interval, poll_interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // Sentinel: nothing observed yet.
    let mut last_seen = OracleStatus::Registered;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(order = %number, "reconciliation cancelled");
                return Err(ReconcileError::Cancelled { number }.into());
            }
            _ = tick.tick() => {}
        }

        let verdict = match oracle.get_order(&number).await {
            Ok(verdict) => verdict,
            Err(err) if err.is_retryable() => {
                debug!(order = %number, reason = %err, "accrual not ready, will poll again");
                continue;
            }
            Err(source) => {
                return Err(ReconcileError::Oracle { number, source }.into());
            }
        };

        match verdict.status {
            OracleStatus::Registered => {}
            OracleStatus::Processing => {
                if last_seen != OracleStatus::Processing {
                    ledger
                        .set_order_status(order_id, OrderStatus::Processing)
                        .await
                        .map_err(|source| ReconcileError::StatusWrite {
                            number: number.clone(),
                            source: Box::new(source),
                        })?;
                    last_seen = OracleStatus::Processing;
                    debug!(order = %number, "order moved to PROCESSING");
                }
            }
            OracleStatus::Invalid => {
                let order = ledger
                    .set_order_status(order_id, OrderStatus::Invalid)
                    .await
                    .map_err(|source| ReconcileError::StatusWrite {
                        number: number.clone(),
                        source: Box::new(source),
                    })?;
                info!(order = %number, "order finalized as INVALID");
                return Ok(order);
            }
            OracleStatus::Processed => {
                let accrual = verdict.accrual_minor_units()?;
                let order = ledger
                    .set_order_status_and_accrual(order_id, OrderStatus::Processed, accrual)
                    .await
                    .map_err(|source| ReconcileError::FinalizeWrite {
                        number: number.clone(),
                        source: Box::new(source),
                    })?;
                info!(order = %number, accrual, "order finalized as PROCESSED");
                return Ok(order);
            }
        }
    }
}
