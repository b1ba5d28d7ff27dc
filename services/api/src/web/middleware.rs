//! services/api/src/web/middleware.rs
//!
//! Identity middleware for protecting routes.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::{error, warn};
use tutor_core::ports::PortError;

use crate::web::state::AppState;

pub const USER_ID_HEADER: &str = "x-user-id";

/// Middleware that resolves the `x-user-id` header to a stored user.
///
/// If valid, inserts the `User` into request extensions for handlers to use.
/// If missing, malformed or unknown, returns 401 Unauthorized.
pub async fn require_user(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    // 1. Extract and parse the header
    let user_id = req
        .headers()
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<i64>().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    // 2. Resolve the user through persistence
    let user = state.db.get_user(user_id).await.map_err(|e| match e {
        PortError::NotFound(_) => {
            warn!("Request from unknown user {}", user_id);
            StatusCode::UNAUTHORIZED
        }
        other => {
            error!("Failed to resolve user {}: {:?}", user_id, other);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    })?;

    // 3. Insert the user into request extensions
    req.extensions_mut().insert(user);

    // 4. Continue to the handler
    Ok(next.run(req).await)
}
