//! patter — group chat delivery core.
//!
//! Two halves, reconciled: a durable, append-only, per-group message log
//! (the source of truth for existence and order) and a best-effort live
//! relay (one actor per room, at-most-once delivery). Clients that miss
//! live broadcasts heal through the catch-up read path; client
//! implementers must build on catch-up rather than trusting the relay
//! alone.

pub mod config;
pub mod db;
pub mod error;
pub mod membership;
pub mod messages;
pub mod notify;
pub mod relay;

use std::sync::Arc;

use axum::Router;
use axum::extract::FromRef;
use sqlx::SqlitePool;
use tower_http::cors::CorsLayer;

use crate::config::Config;
use crate::membership::SqliteOracle;
use crate::messages::log::MessageLog;
use crate::notify::TracingNotifier;
use crate::relay::Rooms;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub log: Arc<MessageLog>,
    pub rooms: Rooms,
    pub oracle: SqliteOracle,
    pub notifier: TracingNotifier,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(db_pool: SqlitePool, config: Config) -> Self {
        Self {
            log: Arc::new(MessageLog::new(db_pool.clone())),
            rooms: Rooms::new(),
            oracle: SqliteOracle::new(db_pool),
            notifier: TracingNotifier,
            config: Arc::new(config),
        }
    }
}

/// The full HTTP surface: send + history under `/g`, relay websockets
/// under `/r`.
pub fn app(state: AppState) -> Router {
    Router::new()
        .nest("/g", messages::router())
        .nest("/r", relay::router())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
