use std::{sync::Arc, time::Duration};

use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::info;

use crate::{
    api::handler::AppState,
    auth::AuthService,
    config::Config,
    error::AppResult,
    ledger::repository::LedgerRepository,
    oracle::AccrualClient,
    reconciler::OrderReconciler,
    scheduler::TaskPool,
};

pub async fn initialize_app_state(config: &Config) -> AppResult<AppState> {
    info!("Initializing application components ...");

    let pool = initialize_database(&config.database_uri).await?;

    let ledger = Arc::new(LedgerRepository::new(pool));

    let oracle = Arc::new(AccrualClient::new(config.accrual_system_address.clone()));
    info!(
        "✅ Accrual client initialized for {}",
        config.accrual_system_address
    );

    let auth = Arc::new(AuthService::new(
        config.jwt_secret_key.clone(),
        config.token_ttl_hours,
    ));
    info!("✅ Auth service initialized (token TTL {}h)", config.token_ttl_hours);

    let reconciler = Arc::new(OrderReconciler::new(
        oracle,
        ledger.clone(),
        Duration::from_millis(config.reconcile_poll_interval_ms),
    ));

    let task_pool = Arc::new(TaskPool::new(config.concurrency_limit, config.queue_size));
    task_pool.start();
    info!(
        "✅ Reconciliation pool started: {} workers, queue capacity {}",
        task_pool.workers(),
        task_pool.queue_capacity()
    );

    Ok(AppState {
        ledger,
        auth,
        reconciler,
        task_pool,
        reconcile_timeout: Duration::from_secs(config.reconcile_timeout_secs),
    })
}

async fn initialize_database(database_uri: &str) -> AppResult<PgPool> {
    info!("📊 Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(30)
        .min_connections(3)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .connect(database_uri)
        .await?;

    info!("🔄 Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;

    info!("✓ Database initialized");
    Ok(pool)
}
