//! API handlers for the AgroVault backend
//!
//! Handlers only translate HTTP to service calls; every lifecycle decision
//! (legality, authority, idempotence) lives in the services.

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use axum_extra::TypedHeader;
use headers::authorization::Bearer;
use headers::Authorization;
use uuid::Uuid;
use validator::Validate;

use crate::app_state::AppState;
use crate::auth::{self, ActorContext};
use crate::errors::{Error, Result};
use crate::models::{ActorRole, ApiResponse};
use crate::notifications::{
    ListNotificationsQuery, MarkAllReadResponse, Notification, UnreadCountResponse,
};
use crate::orders::{
    CreateOrderRequest, ListOrdersQuery, NextStatusResponse, Order, TransitionRequest,
    TransitionResponse,
};
use crate::services::TransitionOutcome;
use crate::settlement::{BlockchainTransaction, RecordSubmissionRequest, WebhookPayload};

pub async fn root() -> &'static str {
    "AgroVault API Server"
}

pub async fn health_check() -> &'static str {
    "OK"
}

fn actor_from(state: &AppState, bearer: &Bearer) -> Result<ActorContext> {
    auth::verify_token(bearer.token(), &state.config.jwt_secret)
}

// ===== Order Handlers =====

/// Place a new order
pub async fn create_order(
    State(state): State<AppState>,
    TypedHeader(Authorization(bearer)): TypedHeader<Authorization<Bearer>>,
    Json(request): Json<CreateOrderRequest>,
) -> Result<Json<ApiResponse<Order>>> {
    let actor = actor_from(&state, &bearer)?;
    if actor.role != ActorRole::Buyer {
        return Err(Error::Unauthorized(
            "only buyers can place orders".to_string(),
        ));
    }
    request.validate()?;

    let order = state.lifecycle.create_order(actor.user_id, request).await?;
    Ok(Json(ApiResponse::ok(order)))
}

/// Get a single order by ID
pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Order>>> {
    let order = state.lifecycle.get_order(id).await?;
    Ok(Json(ApiResponse::ok(order)))
}

/// List orders with filtering and pagination
pub async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<ListOrdersQuery>,
) -> Result<Json<ApiResponse<Vec<Order>>>> {
    let orders = state.lifecycle.list_orders(&query).await?;
    Ok(Json(ApiResponse::ok(orders)))
}

/// Request a status transition
pub async fn transition_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    TypedHeader(Authorization(bearer)): TypedHeader<Authorization<Bearer>>,
    Json(request): Json<TransitionRequest>,
) -> Result<Json<ApiResponse<TransitionResponse>>> {
    let actor = actor_from(&state, &bearer)?;

    let outcome = state
        .lifecycle
        .request_transition(id, request.status, actor)
        .await?;

    let response = match outcome {
        TransitionOutcome::Applied(order) => TransitionResponse {
            applied: true,
            order,
        },
        TransitionOutcome::AlreadyInState(order) => TransitionResponse {
            applied: false,
            order,
        },
    };
    Ok(Json(ApiResponse::ok(response)))
}

/// The single legal next status for progression UIs
pub async fn next_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<NextStatusResponse>>> {
    let next = state.lifecycle.next_status(id).await?;
    Ok(Json(ApiResponse::ok(NextStatusResponse { next })))
}

// ===== Settlement Handlers =====

/// Record a settlement submission for an order
pub async fn record_submission(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    TypedHeader(Authorization(bearer)): TypedHeader<Authorization<Bearer>>,
    Json(request): Json<RecordSubmissionRequest>,
) -> Result<Json<ApiResponse<BlockchainTransaction>>> {
    let actor = actor_from(&state, &bearer)?;
    request.validate()?;

    let transaction = state.settlement.record_submission(id, actor, request).await?;
    Ok(Json(ApiResponse::ok(transaction)))
}

/// Re-verify a settlement transaction against the oracle
pub async fn verify_transaction(
    State(state): State<AppState>,
    Path(tx_id): Path<String>,
    TypedHeader(Authorization(bearer)): TypedHeader<Authorization<Bearer>>,
) -> Result<Json<ApiResponse<BlockchainTransaction>>> {
    actor_from(&state, &bearer)?;

    let transaction = state.settlement.verify(&tx_id).await?;
    Ok(Json(ApiResponse::ok(transaction)))
}

/// Webhook endpoint for settlement status updates
pub async fn settlement_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<WebhookPayload>,
) -> Result<Json<ApiResponse<BlockchainTransaction>>> {
    // Fail-closed: without a configured secret every request is rejected.
    match &state.config.webhook_secret {
        Some(secret) if !secret.is_empty() => {
            let provided = headers
                .get("X-Webhook-Secret")
                .and_then(|value| value.to_str().ok())
                .unwrap_or_default();

            if provided != secret {
                return Err(Error::Unauthorized(
                    "invalid webhook secret".to_string(),
                ));
            }
        }
        _ => {
            tracing::error!("webhook secret not configured - rejecting request");
            return Err(Error::Unauthorized(
                "webhook endpoint is not configured".to_string(),
            ));
        }
    }

    if let Some(claimed) = payload.status {
        tracing::debug!(tx_id = %payload.tx_id, claimed = %claimed, "webhook delivered status claim");
    }

    // The claimed status is advisory; verification goes back to the oracle.
    let transaction = state.settlement.verify(&payload.tx_id).await?;
    Ok(Json(ApiResponse::ok(transaction)))
}

// ===== Notification Handlers =====

/// List the caller's notifications
pub async fn list_notifications(
    State(state): State<AppState>,
    TypedHeader(Authorization(bearer)): TypedHeader<Authorization<Bearer>>,
    Query(query): Query<ListNotificationsQuery>,
) -> Result<Json<ApiResponse<Vec<Notification>>>> {
    let actor = actor_from(&state, &bearer)?;
    let notifications = state.notifier.list(actor.user_id, &query).await?;
    Ok(Json(ApiResponse::ok(notifications)))
}

/// Count the caller's unread notifications
pub async fn unread_count(
    State(state): State<AppState>,
    TypedHeader(Authorization(bearer)): TypedHeader<Authorization<Bearer>>,
) -> Result<Json<ApiResponse<UnreadCountResponse>>> {
    let actor = actor_from(&state, &bearer)?;
    let count = state.notifier.unread_count(actor.user_id).await?;
    Ok(Json(ApiResponse::ok(UnreadCountResponse { count })))
}

/// Mark one notification read
pub async fn mark_notification_read(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    TypedHeader(Authorization(bearer)): TypedHeader<Authorization<Bearer>>,
) -> Result<Json<ApiResponse<()>>> {
    actor_from(&state, &bearer)?;
    state.notifier.mark_read(id).await?;
    Ok(Json(ApiResponse::ok(())))
}

/// Mark all of the caller's notifications read
pub async fn mark_all_notifications_read(
    State(state): State<AppState>,
    TypedHeader(Authorization(bearer)): TypedHeader<Authorization<Bearer>>,
) -> Result<Json<ApiResponse<MarkAllReadResponse>>> {
    let actor = actor_from(&state, &bearer)?;
    let marked = state.notifier.mark_all_read(actor.user_id).await?;
    Ok(Json(ApiResponse::ok(MarkAllReadResponse { marked })))
}
