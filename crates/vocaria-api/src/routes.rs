//! Router setup with all API routes and middleware.

use axum::extract::DefaultBodyLimit;
use axum::http::{header, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use vocaria_core::config::ServerConfig;
use vocaria_core::contract::CONVERSATIONS_PATH;
use vocaria_core::VocariaError;

use crate::handlers;
use crate::state::AppState;

/// Create the axum Router with all routes and middleware.
///
/// The conversation endpoints are visitor-anonymous and called from widgets
/// embedded on arbitrary origins, so CORS accepts any origin and no
/// authorization header is expected.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT]);

    let conversation = format!("{CONVERSATIONS_PATH}/{{conversation_id}}");

    Router::new()
        .route("/health", get(handlers::health))
        .route(CONVERSATIONS_PATH, post(handlers::start_conversation))
        .route(&conversation, get(handlers::get_conversation))
        .route(
            &format!("{conversation}/messages"),
            post(handlers::add_message),
        )
        .route(
            &format!("{conversation}/end"),
            post(handlers::end_conversation),
        )
        .layer(DefaultBodyLimit::max(64 * 1024))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve the API on the configured address until the process stops.
pub async fn start_server(config: &ServerConfig, state: AppState) -> Result<(), VocariaError> {
    let addr = config.bind_addr();
    let router = create_router(state);

    tracing::info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| VocariaError::Api(format!("Failed to bind {addr}: {e}")))?;

    axum::serve(listener, router)
        .await
        .map_err(|e| VocariaError::Api(format!("Server error: {e}")))?;

    Ok(())
}
