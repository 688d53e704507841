//! Application state shared across handlers

use std::sync::Arc;

use axum::extract::FromRef;

use crate::config::Config;
use crate::services::{NotificationService, OrderLifecycleService, SettlementService};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub lifecycle: Arc<OrderLifecycleService>,
    pub settlement: Arc<SettlementService>,
    pub notifier: Arc<NotificationService>,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        lifecycle: Arc<OrderLifecycleService>,
        settlement: Arc<SettlementService>,
        notifier: Arc<NotificationService>,
    ) -> Self {
        Self {
            config,
            lifecycle,
            settlement,
            notifier,
        }
    }
}

impl FromRef<AppState> for Arc<Config> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.config.clone()
    }
}

impl FromRef<AppState> for Arc<OrderLifecycleService> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.lifecycle.clone()
    }
}

impl FromRef<AppState> for Arc<SettlementService> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.settlement.clone()
    }
}

impl FromRef<AppState> for Arc<NotificationService> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.notifier.clone()
    }
}
