//! Environment-driven configuration.

use std::env;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub cors_allowed_origins: Vec<String>,
    pub jwt_secret: String,
    pub oracle_rpc_url: String,
    pub oracle_timeout_seconds: u64,
    pub webhook_secret: Option<String>,
    /// Watcher poll interval; 0 disables the watcher.
    pub settlement_poll_seconds: u64,
    pub settlement_batch_size: i64,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost:5432/agrovault".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "3001".to_string())
                .parse()
                .expect("PORT must be a number"),
            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "http://localhost:3000".to_string())
                .split(',')
                .map(|origin| origin.trim().to_string())
                .filter(|origin| !origin.is_empty())
                .collect(),
            jwt_secret: env::var("JWT_SECRET").expect("JWT_SECRET must be set"),
            oracle_rpc_url: env::var("ORACLE_RPC_URL")
                .unwrap_or_else(|_| "https://rpc-testnet.agrovault.network".to_string()),
            oracle_timeout_seconds: env::var("ORACLE_TIMEOUT_SECONDS")
                .ok()
                .and_then(|value| value.parse().ok())
                .unwrap_or(10),
            webhook_secret: env::var("SETTLEMENT_WEBHOOK_SECRET").ok(),
            settlement_poll_seconds: env::var("SETTLEMENT_POLL_SECONDS")
                .ok()
                .and_then(|value| value.parse().ok())
                .unwrap_or(10),
            settlement_batch_size: env::var("SETTLEMENT_BATCH_SIZE")
                .ok()
                .and_then(|value| value.parse().ok())
                .unwrap_or(50),
        }
    }
}
