use std::{path::Path, sync::Arc};

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};

pub mod auth;
pub mod availability_client;
pub mod config;
pub mod errors;
pub mod history;
pub mod http;
pub mod logging;
pub mod monitor;
pub mod notifier;
pub mod settings;

use monitor::MonitorState;
use notifier::Notifier;
use settings::SettingsStore;

#[derive(Clone)]
pub struct AppState {
    pub api_token: Arc<str>,
    pub monitor: Arc<MonitorState>,
    pub settings: Arc<dyn SettingsStore>,
    pub notifier: Arc<dyn Notifier>,
    pub log_dir: Arc<Path>,
}

impl AppState {
    pub fn new(
        api_token: String,
        monitor: Arc<MonitorState>,
        settings: Arc<dyn SettingsStore>,
        notifier: Arc<dyn Notifier>,
        log_dir: &Path,
    ) -> Self {
        Self {
            api_token: Arc::<str>::from(api_token),
            monitor,
            settings,
            notifier,
            log_dir: Arc::from(log_dir),
        }
    }
}

pub fn build_app(state: AppState) -> Router {
    let api = Router::new()
        .route("/api/status", get(http::handlers::status))
        .route("/api/start", post(http::handlers::start))
        .route("/api/stop", post(http::handlers::stop))
        .route("/api/config", put(http::handlers::update_config))
        .route("/api/history", get(http::handlers::history))
        .route("/api/test-notification", post(http::handlers::test_notification))
        .route("/api/next-7-days", get(http::handlers::next_seven_days))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_bearer_token,
        ));

    Router::new()
        .route("/health", get(http::handlers::health))
        .merge(api)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            logging::request_logging_middleware,
        ))
        .with_state(state)
}
