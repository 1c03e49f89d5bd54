use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use dashmap::DashMap;

use revline_calendar::CalendarClient;
use revline_core::config::RevlineConfig;
use revline_db::Database;
use revline_store::SessionStore;

/// Central shared state — passed as Arc<AppState> to all Axum handlers.
/// Calls share nothing in-process beyond what lives here.
pub struct AppState {
    pub config: RevlineConfig,
    pub db: Arc<Database>,
    pub store: Arc<SessionStore>,
    pub calendar: Arc<CalendarClient>,
    /// Shared HTTP client for the VIN decoder and telephony REST calls.
    pub http: reqwest::Client,
    /// Active calls: call_sid -> stream_sid. Observability only; per-call
    /// state lives in the session store.
    pub active_calls: DashMap<String, String>,
}

impl AppState {
    pub fn new(
        config: RevlineConfig,
        db: Arc<Database>,
        store: Arc<SessionStore>,
        calendar: Arc<CalendarClient>,
    ) -> Self {
        Self {
            config,
            db,
            store,
            calendar,
            http: reqwest::Client::new(),
            active_calls: DashMap::new(),
        }
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/voice", post(crate::http::twiml::inbound_handler))
        .route("/voice/outbound", post(crate::http::twiml::outbound_handler))
        .route("/calls/outbound", post(crate::outbound::dial_handler))
        .route("/media-stream", get(crate::call::media_stream_handler))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
