pub mod chat;
pub mod middleware;
pub mod rest;
pub mod state;

use axum::{
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;

pub use middleware::require_user;
pub use rest::ApiDoc;
pub use state::AppState;

/// Builds the API routes. Everything except the health check requires an
/// identified user.
pub fn router(state: Arc<AppState>) -> Router {
    let public_routes = Router::new().route("/ollama-health", get(rest::ollama_health_handler));

    let protected_routes = Router::new()
        .route(
            "/sections/{section_id}/documents/{document_id}/process",
            post(rest::process_document_handler),
        )
        .route("/documents/{document_id}", delete(rest::delete_document_handler))
        .route(
            "/chat/sessions",
            get(rest::list_sessions_handler).post(rest::create_session_handler),
        )
        .route("/chat/sessions/{session_id}", delete(rest::delete_session_handler))
        .route(
            "/chat/sessions/{session_id}/messages",
            get(rest::list_messages_handler).post(rest::send_message_handler),
        )
        .route(
            "/chat/sessions/{session_id}/messages/stream",
            post(chat::stream_message_handler),
        )
        .route(
            "/sections/{section_id}/exercises/generate",
            post(rest::generate_exercise_handler),
        )
        .route(
            "/sections/{section_id}/students/{student_id}/analyze",
            post(rest::analyze_student_handler),
        )
        .layer(axum_middleware::from_fn_with_state(state.clone(), require_user));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(10 * 1024 * 1024))
        .with_state(state)
}
