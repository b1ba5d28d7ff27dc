//! services/api/src/web/chat.rs
//!
//! The streamed variant of message sending, delivered as server-sent events.
//! Each `ChatEvent` becomes one SSE event named after its `type`.

use crate::error::ApiError;
use crate::web::rest::SendMessageRequest;
use crate::web::state::AppState;
use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    Extension, Json,
};
use futures::{Stream, StreamExt};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tracing::error;
use tutor_core::{ChatEvent, User};

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

pub fn event_name(event: &ChatEvent) -> &'static str {
    match event {
        ChatEvent::UserMessage { .. } => "user_message",
        ChatEvent::AssistantStart => "assistant_start",
        ChatEvent::AssistantChunk { .. } => "assistant_chunk",
        ChatEvent::AssistantMessage { .. } => "assistant_message",
        ChatEvent::Error { .. } => "error",
    }
}

fn to_sse(event: ChatEvent) -> Event {
    let name = event_name(&event);
    match Event::default().event(name).json_data(&event) {
        Ok(sse) => sse,
        Err(e) => {
            error!("Failed to encode {} event: {}", name, e);
            Event::default().event("error").data("encoding failure")
        }
    }
}

/// Send a message and stream the answer as it is generated.
///
/// The session is checked and the user message stored before the first event.
/// Closing the connection early stores no assistant message.
#[utoipa::path(
    post,
    path = "/chat/sessions/{session_id}/messages/stream",
    request_body = SendMessageRequest,
    responses(
        (status = 200, description = "Server-sent events: user_message, assistant_start, assistant_chunk*, assistant_message or error", body = String, content_type = "text/event-stream"),
        (status = 400, description = "Empty message"),
        (status = 403, description = "Session owned by another user"),
        (status = 404, description = "Unknown session")
    ),
    params(
        ("session_id" = i64, Path, description = "The chat session."),
        ("x-user-id" = i64, Header, description = "The requesting user.")
    )
)]
pub async fn stream_message_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(session_id): Path<i64>,
    Json(body): Json<SendMessageRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let events = state
        .conversation
        .send_message_streaming(&user, session_id, &body.content)
        .await?;
    let stream = events.map(|event| Ok::<_, Infallible>(to_sse(event)));
    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_names_match_the_serialized_type() {
        let events = [
            ChatEvent::UserMessage {
                id: 1,
                content: "Bonjour".into(),
            },
            ChatEvent::AssistantStart,
            ChatEvent::AssistantChunk { content: "Bon".into() },
            ChatEvent::AssistantMessage {
                id: 2,
                content: "Bonjour !".into(),
                declined: false,
            },
            ChatEvent::Error {
                message: "coupé".into(),
            },
        ];
        for event in events {
            let json = serde_json::to_value(&event).unwrap();
            assert_eq!(json["type"], event_name(&event));
        }
    }
}
