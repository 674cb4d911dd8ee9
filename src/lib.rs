//! Estoque API
//!
//! Stock adjustment service over a legacy relational inventory schema.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod openapi;
pub mod schema;
pub mod services;

use axum::Router;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::services::catalog::ProductCatalog;
use crate::services::directory::UserDirectory;
use crate::services::ledger::{LedgerPolicy, StockLedgerService};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DbPool>,
    pub config: Arc<AppConfig>,
    pub event_sender: EventSender,
    pub ledger: StockLedgerService,
    pub catalog: ProductCatalog,
    pub directory: UserDirectory,
}

impl AppState {
    pub fn new(db: Arc<DbPool>, config: Arc<AppConfig>, event_sender: EventSender) -> Self {
        let ledger = StockLedgerService::new(
            db.clone(),
            event_sender.clone(),
            LedgerPolicy::from(config.as_ref()),
        );
        let catalog = ProductCatalog::new(db.clone());
        let directory = UserDirectory::new(db.clone());
        Self {
            db,
            config,
            event_sender,
            ledger,
            catalog,
            directory,
        }
    }
}

/// Compose the full application router.
pub fn app_router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(handlers::health::health_router())
        .nest("/api/v1/stock", handlers::stock::stock_router())
        .nest("/api/v1/users", handlers::users::users_router())
        .merge(openapi::swagger_ui())
        .with_state(state)
}
