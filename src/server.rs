use std::future::Future;
use std::sync::Arc;

use axum::{
    middleware::from_fn,
    routing::{get, post},
    Extension, Router,
};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::{
    api::handler::{
        get_balance, health_check, list_orders, list_withdrawals, login, register, upload_order,
        withdraw, AppState,
    },
    middleware::{rate_limit_middleware, RateLimitLayer},
};

pub fn create_app(state: AppState) -> Router {
    info!("⚙️ Setting up HTTP routes...");

    // Credential endpoints get their own limiter; the Extension layer must
    // wrap the middleware so it is inserted before the check runs.
    let auth_limiter = Arc::new(RateLimitLayer::new(10, 60));
    let auth_routes = Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .layer(from_fn(rate_limit_middleware))
        .layer(Extension(auth_limiter));

    let user_routes = Router::new()
        .merge(auth_routes)
        .route("/orders", post(upload_order).get(list_orders))
        .route("/balance", get(get_balance))
        .route("/balance/withdraw", post(withdraw))
        .route("/withdrawals", get(list_withdrawals));

    let app = Router::new()
        .route("/health", get(health_check))
        .nest("/api/user", user_routes)
        .layer(CompressionLayer::new())
        .layer(CorsLayer::very_permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!("✓ HTTP routes configured");
    app
}

pub async fn run_server(
    app: Router,
    bind_address: &str,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    info!("🌐 Server listening on: {}", bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}
