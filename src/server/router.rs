use std::sync::Arc;
use std::time::Instant;

use axum::extract::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::{Router, routing::get};

use super::account::account_router;
use super::admin::admin_router;
use super::user::user_router;
use crate::auth::RateLimiter;
use crate::config::ServerConfig;
use crate::keys::TempKeyStore;
use crate::storage::BlobStorage;
use crate::store::Store;

pub struct AppState {
    pub store: Arc<dyn Store>,
    pub storage: Arc<dyn BlobStorage>,
    /// Freshly issued API key secrets awaiting their one-time reveal.
    pub temp_keys: TempKeyStore,
    pub rate_limiter: RateLimiter,
    pub config: ServerConfig,
}

impl AppState {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, storage: Arc<dyn BlobStorage>, config: ServerConfig) -> Self {
        Self {
            store,
            storage,
            temp_keys: TempKeyStore::new(config.temp_key_ttl()),
            rate_limiter: RateLimiter::default(),
            config,
        }
    }
}

async fn health() -> &'static str {
    "OK"
}

async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let response = next.run(request).await;

    let latency = start.elapsed();
    let status = response.status();

    tracing::info!(
        "{} {} {} {}ms",
        method,
        uri.path(),
        status.as_u16(),
        latency.as_millis()
    );

    response
}

pub fn create_router(state: Arc<AppState>) -> Router {
    let max_upload_bytes = usize::try_from(state.config.max_upload_bytes).unwrap_or(usize::MAX);

    Router::new()
        .route("/health", get(health))
        .nest("/api/v1/admin", admin_router())
        .nest("/api/v1", account_router())
        .nest("/api/v1", user_router(max_upload_bytes))
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}
