//! # Canopy HTTP API Module
//!
//! This module implements the HTTP REST API server using axum.
//!
//! ## Endpoints
//!
//! - `GET /health` - Health check
//! - `GET /tree` - Forest visible to the caller
//! - `GET /permitted-ids?capability=read|write` - Entities the caller may act on
//! - `POST /entities` - Create an entity
//! - `GET|PUT|DELETE /entities/{id}` - Read, update/publish/move, cascade-delete
//! - `GET /entities/{id}/item` - Content-free projection
//! - `GET /entities/{id}/versions` - Version history, newest first
//! - `GET /entities/{id}/versions/{version}` - One snapshot
//!
//! ## Security Configuration (Environment Variables)
//!
//! - `CANOPY_CORS_ORIGINS`: Comma-separated list of allowed origins, or "*" for all (default: localhost only)
//! - `CANOPY_RATE_LIMIT`: Requests per second (default: 100, 0 to disable)
//! - `CANOPY_API_KEY`: If set, requires Bearer token authentication

mod auth;
mod handlers;
mod middleware;
mod types;

pub use auth::{CallerIdentity, ROLE_HEADER, USER_ID_HEADER, get_api_key_from_env};
pub use middleware::{create_rate_limiter, get_rate_limit_from_env};
pub use types::{
    ApiError, CreateEntityRequest, CreateEntityResponse, DeleteEntityResponse, ErrorBody,
    ErrorDetail, HealthResponse, PermittedIdsQuery, PermittedIdsResponse, TreeResponse,
    UpdateEntityRequest, UpdateEntityResponse, VersionsResponse, status_for,
};

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderName, HeaderValue, Method, header},
    middleware as axum_middleware,
    routing::{get, post},
};
use canopy_core::{CallContext, CanopyError, SqliteService};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Request body limit: 2 MiB.
const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

// =============================================================================
// SERVER STATE
// =============================================================================

/// Shared server state.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<SqliteService>,
    /// Deadline for each engine call.
    pub request_timeout: Duration,
}

impl AppState {
    #[must_use]
    pub fn new(service: Arc<SqliteService>, request_timeout: Duration) -> Self {
        Self {
            service,
            request_timeout,
        }
    }

    /// Run one synchronous engine call on the blocking pool.
    ///
    /// The call gets a fresh `CallContext` bounded by the request timeout.
    /// If the request future is dropped (client disconnect), the context is
    /// cancelled and the in-flight query is interrupted.
    pub async fn run<T, F>(&self, op: F) -> Result<T, ApiError>
    where
        T: Send + 'static,
        F: FnOnce(&SqliteService, &CallContext) -> Result<T, CanopyError> + Send + 'static,
    {
        let ctx = CallContext::with_timeout(self.request_timeout);
        let _cancel = ctx.cancel_on_drop();
        let service = Arc::clone(&self.service);
        let task_ctx = ctx.clone();

        let outcome = tokio::task::spawn_blocking(move || op(&service, &task_ctx))
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Engine task failed");
                ApiError::internal("Engine task failed")
            })?;
        outcome.map_err(ApiError::from)
    }
}

// =============================================================================
// CORS CONFIGURATION
// =============================================================================

const CORS_METHODS: [Method; 5] = [
    Method::GET,
    Method::POST,
    Method::PUT,
    Method::DELETE,
    Method::OPTIONS,
];

fn cors_headers() -> [HeaderName; 4] {
    [
        header::CONTENT_TYPE,
        header::AUTHORIZATION,
        HeaderName::from_static(USER_ID_HEADER),
        HeaderName::from_static(ROLE_HEADER),
    ]
}

/// Build CORS layer from `CANOPY_CORS_ORIGINS`.
///
/// - "*": allows all origins (development only)
/// - unset: localhost only
/// - otherwise: comma-separated list of allowed origins
fn build_cors_layer() -> CorsLayer {
    let origins_env = std::env::var("CANOPY_CORS_ORIGINS").ok();

    match origins_env.as_deref() {
        Some("*") => {
            tracing::warn!(
                "CORS: Allowing ALL origins (CANOPY_CORS_ORIGINS=*). This is insecure for production!"
            );
            CorsLayer::permissive()
        }
        Some(origins) => {
            let allowed_origins: Vec<HeaderValue> = origins
                .split(',')
                .filter_map(|s| {
                    let trimmed = s.trim();
                    match trimmed.parse::<HeaderValue>() {
                        Ok(hv) => {
                            tracing::info!("CORS: Allowing origin: {}", trimmed);
                            Some(hv)
                        }
                        Err(e) => {
                            tracing::warn!("CORS: Invalid origin '{}': {}", trimmed, e);
                            None
                        }
                    }
                })
                .collect();

            if allowed_origins.is_empty() {
                tracing::warn!(
                    "CORS: No valid origins in CANOPY_CORS_ORIGINS, defaulting to localhost only"
                );
                build_localhost_cors()
            } else {
                CorsLayer::new()
                    .allow_origin(allowed_origins)
                    .allow_methods(CORS_METHODS)
                    .allow_headers(cors_headers())
            }
        }
        None => {
            tracing::info!("CORS: No CANOPY_CORS_ORIGINS set, defaulting to localhost only");
            build_localhost_cors()
        }
    }
}

/// Restrictive CORS layer that only allows localhost origins.
fn build_localhost_cors() -> CorsLayer {
    let origins: Vec<HeaderValue> = [
        "http://localhost:3000",
        "http://localhost:8080",
        "http://127.0.0.1:3000",
        "http://127.0.0.1:8080",
    ]
    .iter()
    .filter_map(|o| o.parse::<HeaderValue>().ok())
    .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(CORS_METHODS)
        .allow_headers(cors_headers())
}

// =============================================================================
// ROUTER CREATION
// =============================================================================

/// Create the axum router with all endpoints and middleware.
///
/// Middleware stack (outer to inner):
/// 1. Tracing - logs all requests
/// 2. CORS - handles preflight requests
/// 3. Body limit
/// 4. Rate limiting (if enabled)
/// 5. API key authentication (if configured)
pub fn create_router(state: AppState) -> Router {
    let cors = build_cors_layer();

    let rate_limit = get_rate_limit_from_env();
    let rate_limiter = if rate_limit > 0 {
        tracing::info!("Rate limiting enabled: {} requests/second", rate_limit);
        Some(create_rate_limiter(rate_limit))
    } else {
        tracing::info!("Rate limiting disabled");
        None
    };

    let api_key = get_api_key_from_env();
    if api_key.is_some() {
        tracing::info!("API key authentication enabled");
    } else {
        tracing::warn!(
            "API key authentication DISABLED - access control relies on the gateway headers alone. \
             Set CANOPY_API_KEY to enable authentication."
        );
    }

    let mut router = Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/tree", get(handlers::tree_handler))
        .route("/permitted-ids", get(handlers::permitted_ids_handler))
        .route("/entities", post(handlers::create_entity_handler))
        .route(
            "/entities/{id}",
            get(handlers::get_entity_handler)
                .put(handlers::update_entity_handler)
                .delete(handlers::delete_entity_handler),
        )
        .route("/entities/{id}/item", get(handlers::get_list_item_handler))
        .route(
            "/entities/{id}/versions",
            get(handlers::list_versions_handler),
        )
        .route(
            "/entities/{id}/versions/{version}",
            get(handlers::get_version_handler),
        );

    if let Some(key) = api_key {
        router = router.layer(axum_middleware::from_fn_with_state(
            Arc::<str>::from(key),
            auth::api_key_auth_middleware,
        ));
    }

    if let Some(limiter) = rate_limiter {
        router = router.layer(axum_middleware::from_fn_with_state(
            limiter,
            middleware::rate_limit_middleware,
        ));
    }

    router
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(DefaultBodyLimit::max(MAX_BODY_BYTES)),
        )
        .with_state(state)
}

// =============================================================================
// SERVER STARTUP
// =============================================================================

/// Resolve when the process receives Ctrl+C.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

/// Start the HTTP server and serve until Ctrl+C.
pub async fn run_server(addr: &str, state: AppState) -> Result<(), CanopyError> {
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| CanopyError::config(format!("Bind {} failed: {}", addr, e)))?;

    tracing::info!("Canopy HTTP server listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| CanopyError::config(format!("Server error: {}", e)))
}
