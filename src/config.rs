use config::ConfigError;
use std::fmt::Display;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct Config {
    pub run_address: String,
    pub database_uri: String,
    pub accrual_system_address: String,
    pub jwt_secret_key: String,
    pub token_ttl_hours: i64,
    /// Number of reconciliation workers.
    pub concurrency_limit: usize,
    /// Task queue capacity; 0 means five slots per worker.
    pub queue_size: usize,
    pub reconcile_poll_interval_ms: u64,
    pub reconcile_timeout_secs: u64,
    pub shutdown_grace_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            run_address: std::env::var("RUN_ADDRESS")
                .unwrap_or_else(|_| "0.0.0.0:8081".to_string()),
            database_uri: required("DATABASE_URI")?,
            accrual_system_address: required("ACCRUAL_SYSTEM_ADDRESS")?,
            jwt_secret_key: required("JWT_SECRET_KEY")?,
            token_ttl_hours: parsed("TOKEN_TTL_HOURS", 24)?,
            concurrency_limit: parsed("CONCURRENCY_LIMIT", 5)?,
            queue_size: parsed("QUEUE_SIZE", 0)?,
            reconcile_poll_interval_ms: parsed("RECONCILE_POLL_INTERVAL_MS", 1000)?,
            reconcile_timeout_secs: parsed("RECONCILE_TIMEOUT_SECS", 3600)?,
            shutdown_grace_secs: parsed("SHUTDOWN_GRACE_SECS", 30)?,
        })
    }
}

fn required(name: &str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::NotFound(name.to_string()))
}

fn parsed<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|err| ConfigError::Message(format!("{name}: {err}"))),
        Err(_) => Ok(default),
    }
}
