use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::{get, post};
use tower_http::timeout::TimeoutLayer;

use crate::chat::{Credentials, Dispatcher, KeyResolver, PlatformPolicy};
use crate::config::{ChatConfig, Config};
use crate::handlers;
use crate::llm::Connector;

/// Extra time the outer timeout layer allows beyond the chat deadline, so the
/// handler can answer with its own timeout error first.
const TIMEOUT_GRACE: Duration = Duration::from_secs(5);

/// Shared application state. Read-only after startup.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub chat: ChatConfig,
    pub request_timeout: Duration,
    pub idle_timeout: Duration,
}

impl AppState {
    pub fn new(config: &Config, credentials: Credentials, connector: Arc<dyn Connector>) -> Self {
        let platform = PlatformPolicy {
            enabled: config.platform.enabled,
            key_prefix: config.platform.key_prefix.clone(),
        };
        let keys = KeyResolver::new(credentials, platform);
        Self {
            dispatcher: Arc::new(Dispatcher::new(
                keys,
                connector,
                config.platform.search_k,
            )),
            chat: config.chat.clone(),
            request_timeout: Duration::from_secs(config.server.request_timeout_seconds),
            idle_timeout: Duration::from_secs(config.server.idle_timeout_seconds),
        }
    }
}

pub fn build_app(state: AppState) -> Router {
    let outer_timeout = state.request_timeout + TIMEOUT_GRACE;

    let api = Router::new()
        .route("/chat", post(handlers::chat))
        .route("/keys", get(handlers::keys))
        .route("/providers", get(handlers::list_providers))
        .with_state(state);

    Router::new()
        .route("/livez", get(handlers::livez))
        .route("/readyz", get(handlers::readyz))
        .route("/version", get(handlers::version))
        .nest("/api", api)
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            outer_timeout,
        ))
}
