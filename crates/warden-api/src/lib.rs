//! HTTP surface of the PAM query core
//!
//! Thin axum wrappers over the broker: connect handshake, query execution,
//! per-session disconnect and the connection-pool health view, all behind
//! bearer-token authentication.

pub mod handlers;
pub mod middleware;
pub mod models;

use std::sync::Arc;

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Json, Router,
};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use warden_broker::Broker;

/// Application state shared across handlers
pub struct AppState {
    pub broker: Arc<Broker>,
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Warden PAM Broker API",
        version = "0.1.0",
        description = "Query execution over brokered database sessions"
    ),
    paths(
        handlers::connect_session,
        handlers::run_query,
        handlers::disconnect_session,
        handlers::connections_health,
    ),
    components(
        schemas(
            models::ErrorResponse,
            models::ConnectResponse,
            models::QueryRequestBody,
            models::QueryFieldDto,
            models::QueryResponse,
            models::DisconnectResponse,
            models::ConnectionPoolEntry,
            models::ConnectionsHealthResponse,
        )
    ),
    tags(
        (name = "pam-sessions", description = "Session-scoped database access")
    )
)]
struct ApiDoc;

/// Build the router with every endpoint behind bearer authentication.
pub fn build_router(state: Arc<AppState>, jwt_secret: &[u8]) -> Router {
    let jwt_state = Arc::new(middleware::JwtState::new(jwt_secret));
    let api_doc = ApiDoc::openapi();

    let protected = Router::new()
        .route(
            "/api/v1/pam/sessions/{sessionId}/connect",
            post(handlers::connect_session),
        )
        .route(
            "/api/v1/pam/sessions/{sessionId}/query",
            post(handlers::run_query),
        )
        .route(
            "/api/v1/pam/sessions/{sessionId}/disconnect",
            post(handlers::disconnect_session),
        )
        .route(
            "/api/v1/pam/sessions/connections/health",
            get(handlers::connections_health),
        )
        .with_state(state)
        .layer(axum_middleware::from_fn_with_state(
            jwt_state.clone(),
            middleware::require_auth,
        ));

    Router::new()
        .route(
            "/api/openapi.json",
            get(move || {
                let doc = api_doc.clone();
                async move { Json(doc) }
            }),
        )
        .merge(protected)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_generation() {
        let doc = ApiDoc::openapi();
        let json = serde_json::to_value(&doc).unwrap();
        let paths = json["paths"].as_object().unwrap();
        assert!(paths.contains_key("/api/v1/pam/sessions/{sessionId}/query"));
        assert!(paths.contains_key("/api/v1/pam/sessions/connections/health"));
    }
}
