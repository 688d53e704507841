//! Route definitions for the AgroVault API

use axum::routing::{get, post};
use axum::Router;

use crate::app_state::AppState;
use crate::handlers::*;

// Order routes
pub fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/api/orders", post(create_order))
        .route("/api/orders", get(list_orders))
        .route("/api/orders/:id", get(get_order))
        .route("/api/orders/:id/status", post(transition_order))
        .route("/api/orders/:id/next-status", get(next_status))
        .route("/api/orders/:id/settlement", post(record_submission))
}

// Settlement routes
pub fn settlement_routes() -> Router<AppState> {
    Router::new()
        .route("/api/settlement/verify/:tx_id", post(verify_transaction))
        .route("/api/settlement/webhook", post(settlement_webhook))
}

// Notification routes
pub fn notification_routes() -> Router<AppState> {
    Router::new()
        .route("/api/notifications", get(list_notifications))
        .route("/api/notifications/unread-count", get(unread_count))
        .route("/api/notifications/:id/read", post(mark_notification_read))
        .route("/api/notifications/read-all", post(mark_all_notifications_read))
}

/// The full application router over a wired state.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .merge(order_routes())
        .merge(settlement_routes())
        .merge(notification_routes())
        .with_state(state)
}
