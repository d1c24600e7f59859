use std::time::Instant;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use crate::AppState;

pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

/// One summary line per control request, tagged with whether the poll loop
/// was running when the response left. Health checks are logged at debug.
pub async fn request_logging_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let query = request.uri().query().unwrap_or_default().to_string();
    let started_at = Instant::now();

    let response = next.run(request).await;
    let status = response.status().as_u16();
    let elapsed_ms = started_at.elapsed().as_millis();

    if path == "/health" {
        debug!(status, duration_ms = elapsed_ms, "health check");
        return response;
    }

    let monitor_running = state.monitor.is_running();
    match status {
        401 => warn!(
            method = %method,
            path = %path,
            status,
            "authentication failure"
        ),
        400..=499 => warn!(
            method = %method,
            path = %path,
            query = %query,
            status,
            duration_ms = elapsed_ms,
            monitor_running,
            "control request rejected"
        ),
        500..=599 => error!(
            method = %method,
            path = %path,
            status,
            duration_ms = elapsed_ms,
            monitor_running,
            "control request failed"
        ),
        _ => info!(
            method = %method,
            path = %path,
            query = %query,
            status,
            duration_ms = elapsed_ms,
            monitor_running,
            "control request"
        ),
    }

    response
}
