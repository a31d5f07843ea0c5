// Module: http
// HTTP/JSON API and websocket live tails

pub mod error;
pub mod health;
pub mod item;
pub mod middleware;
pub mod stream;

use axum::{
    routing::{get, post},
    Router,
};
use logcdn_core::bootstrap::Services;
use logcdn_core::service::{ItemService, LogIngestor, StreamHub};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

pub use error::{AppError, AppResult};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub items: ItemService,
    pub ingestor: LogIngestor,
    pub hub: StreamHub,
    /// Fired on shutdown; closes every open live stream
    pub shutdown: CancellationToken,
}

impl AppState {
    #[must_use]
    pub fn new(services: &Services, shutdown: CancellationToken) -> Self {
        Self {
            items: services.items.clone(),
            ingestor: services.ingestor.clone(),
            hub: services.hub.clone(),
            shutdown,
        }
    }
}

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    let items = Router::new()
        .route("/item/delete", post(item::mark_delete))
        .route("/item/{item_type}/log", post(item::store_log))
        .route("/item/{item_type}/{api_ref_hash}/download", get(item::download))
        .route("/item/{item_type}/{api_ref_hash}/lines", get(item::lines))
        .route("/item/{item_type}/{api_ref_hash}/stream", get(stream::stream_handler))
        .route_layer(axum::middleware::from_fn(middleware::metrics_layer));

    Router::new()
        .merge(items)
        .merge(health::create_health_router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
