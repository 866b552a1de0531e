pub mod azid;
pub mod config;
pub mod db;
pub mod handlers;
pub mod models;
pub mod services;
pub mod utils;

use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, post},
    Router,
};
use service_core::middleware::{
    rate_limit::{create_ip_rate_limiter, ip_rate_limit_middleware, IpRateLimiter},
    tracing::request_id_middleware,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::config::RateLimitConfig;
use crate::services::{Database, IamCore};

#[derive(Clone)]
pub struct AppState {
    pub core: Arc<IamCore>,
    /// Present when running on PostgreSQL; probed by the health check.
    pub database: Option<Database>,
    pub register_rate_limiter: IpRateLimiter,
    pub token_rate_limiter: IpRateLimiter,
}

impl AppState {
    pub fn new(core: Arc<IamCore>, database: Option<Database>, limits: &RateLimitConfig) -> Self {
        Self {
            core,
            database,
            register_rate_limiter: create_ip_rate_limiter(
                limits.register_attempts,
                limits.register_window_seconds,
            ),
            token_rate_limiter: create_ip_rate_limiter(
                limits.token_attempts,
                limits.token_window_seconds,
            ),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    // Rate-limited routes
    let register_route = Router::new()
        .route("/terminals/register", post(handlers::terminals::register))
        .layer(from_fn_with_state(
            state.register_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ));

    let token_route = Router::new()
        .route("/oauth/token", post(handlers::oauth::token))
        .layer(from_fn_with_state(
            state.token_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ));

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/oauth/authorize", post(handlers::oauth::authorize))
        .route("/terminals/confirm", post(handlers::terminals::confirm))
        .route("/terminals/self", delete(handlers::terminals::delete_self))
        .merge(register_route)
        .merge(token_route)
        .with_state(state)
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
}
