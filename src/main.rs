//! AgroVault Backend Server
//!
//! Order lifecycle manager for the AgroVault marketplace: order status
//! transitions, blockchain settlement confirmation, and notification fan-out
//! behind a JSON API, with a supervised background confirmation watcher.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::http::{header, HeaderValue, Method};
use sqlx::postgres::PgPoolOptions;
use tokio::time::sleep;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use agrovault_server::app_state::AppState;
use agrovault_server::config::Config;
use agrovault_server::oracle::RpcOracle;
use agrovault_server::routes;
use agrovault_server::services::{
    NotificationService, OrderLifecycleService, SettlementService,
};
use agrovault_server::store::postgres::{
    PgNotificationStore, PgOrderStore, PgTransactionStore,
};
use agrovault_server::store::{NotificationStore, OrderStore, TransactionStore};
use agrovault_server::watcher::{ConfirmationWatcher, StartError};

const WATCHER_SUPERVISOR_MAX_BACKOFF_SECONDS: u64 = 30;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Arc::new(Config::from_env());

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("failed to connect to database")?;

    let order_store: Arc<dyn OrderStore> = Arc::new(PgOrderStore::new(pool.clone()));
    let transaction_store: Arc<dyn TransactionStore> =
        Arc::new(PgTransactionStore::new(pool.clone()));
    let notification_store: Arc<dyn NotificationStore> =
        Arc::new(PgNotificationStore::new(pool));

    let oracle = Arc::new(RpcOracle::new(
        config.oracle_rpc_url.clone(),
        Duration::from_secs(config.oracle_timeout_seconds),
    ));

    let notifier = Arc::new(NotificationService::new(notification_store));
    let lifecycle = Arc::new(OrderLifecycleService::new(
        order_store.clone(),
        notifier.clone(),
    ));
    let settlement = Arc::new(SettlementService::new(
        order_store,
        transaction_store.clone(),
        oracle,
        notifier.clone(),
    ));

    let state = AppState::new(
        config.clone(),
        lifecycle,
        settlement.clone(),
        notifier,
    );

    // Start and supervise the background confirmation watcher.
    {
        let transactions = transaction_store;
        let settlement = settlement;
        let poll_interval = Duration::from_secs(config.settlement_poll_seconds);
        let batch_size = config.settlement_batch_size;

        tokio::spawn(async move {
            let mut restart_count: u32 = 0;
            loop {
                let watcher = ConfirmationWatcher::new(
                    transactions.clone(),
                    settlement.clone(),
                    poll_interval,
                    batch_size,
                );
                let handle = tokio::spawn(async move { watcher.start().await });

                match handle.await {
                    Ok(Ok(())) => {
                        info!("confirmation watcher exited cleanly; stopping supervisor");
                        break;
                    }
                    Ok(Err(StartError::Disabled)) => {
                        info!("confirmation watcher disabled: SETTLEMENT_POLL_SECONDS is 0");
                        break;
                    }
                    Err(join_error) => {
                        if join_error.is_panic() {
                            error!("confirmation watcher panicked; restarting");
                        } else {
                            error!(error = %join_error, "confirmation watcher task failed; restarting");
                        }
                    }
                }

                restart_count = restart_count.saturating_add(1);
                let backoff_seconds = (2u64.saturating_pow(restart_count.min(5)))
                    .min(WATCHER_SUPERVISOR_MAX_BACKOFF_SECONDS);
                warn!(restart_count, backoff_seconds, "confirmation watcher restart backoff");
                sleep(Duration::from_secs(backoff_seconds)).await;
            }
        });
    }

    let app = routes::app(state).layer(build_cors_layer(&config.cors_allowed_origins));

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    info!("Server starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind listener")?;
    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}

fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins = allowed_origins
        .iter()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect::<Vec<_>>();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
        .allow_credentials(false)
}
