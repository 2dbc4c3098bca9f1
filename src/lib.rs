//! Shiftswap server - volunteer duty exchange over a chat bot

pub mod account;
pub mod bot;
pub mod clock;
pub mod config;
pub mod error;
pub mod exchange;
pub mod gateway;
pub mod memory;
pub mod models;
pub mod repository;
pub mod store;
pub mod websocket;

use axum::{routing::get, Router};
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::account::AccountService;
use crate::bot::Dispatcher;
use crate::clock::{Clock, SystemClock};
use crate::config::ExchangeSettings;
use crate::exchange::ExchangeManager;
use crate::gateway::ConnectionHub;
use crate::repository::ScheduleRepository;

/// Application state shared across handlers
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub hub: Arc<ConnectionHub>,
}

impl AppState {
    pub fn new(pool: SqlitePool, settings: ExchangeSettings) -> Arc<Self> {
        Self::with_parts(
            Arc::new(store::Store::new(pool)),
            Arc::new(SystemClock),
            settings,
        )
    }

    /// Wire the exchange workflow over any repository and clock
    pub fn with_parts(
        repo: Arc<dyn ScheduleRepository>,
        clock: Arc<dyn Clock>,
        settings: ExchangeSettings,
    ) -> Arc<Self> {
        let hub = Arc::new(ConnectionHub::new());
        let manager = Arc::new(ExchangeManager::new(
            repo.clone(),
            hub.clone(),
            clock.clone(),
            settings.clone(),
        ));
        let accounts = AccountService::new(repo, hub.clone(), clock, settings);

        Arc::new(Self {
            dispatcher: Dispatcher::new(manager, accounts),
            hub,
        })
    }
}

/// Routes without middleware
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(websocket::handler))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
