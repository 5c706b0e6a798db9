//! Legacy HTTP+SSE transport.
//!
//! `GET /sse` opens a session whose first event (`endpoint`) names the URL
//! to post messages to. `POST /messages?session_id=<id>` accepts one
//! JSON-RPC message with `202 Accepted`; the reply arrives as a `message`
//! event on the session's stream. Each posted message runs on its own task.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::Event;
use axum::response::{IntoResponse, Response, Sse};
use axum::routing::{get, post};
use axum::Router;
use bytes::Bytes;
use futures::StreamExt;
use serde::Deserialize;
use tokio_stream::wrappers::BroadcastStream;

use crate::mcp::server::MCPServer;
use crate::mcp::session::{event_to_sse, keep_alive, SessionGuard};
use crate::mcp::streamable_http::{derive_allowed_origins, validate_origin, HttpRejection};

pub const MESSAGES_PATH: &str = "/messages";

pub fn create_sse_router(server: Arc<MCPServer>) -> Router {
    let allowed_origins = Arc::new(derive_allowed_origins(server.config()));
    Router::new()
        .route("/sse", get(handle_sse_connect))
        .route(MESSAGES_PATH, post(handle_sse_message))
        .with_state(SseState {
            server,
            allowed_origins,
        })
}

#[derive(Clone)]
struct SseState {
    server: Arc<MCPServer>,
    allowed_origins: Arc<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct MessageQuery {
    session_id: String,
}

async fn handle_sse_connect(
    State(state): State<SseState>,
    headers: HeaderMap,
) -> Result<Sse<impl futures::Stream<Item = Result<Event, Infallible>>>, HttpRejection> {
    validate_origin(&state.allowed_origins, &headers)?;

    let sessions = state.server.sessions();
    let session = sessions.create_session(state.server.config().mcp.protocol_version.clone());
    let rx = session.subscribe();
    tracing::info!("SSE client connected, session {}", session.id);

    let endpoint = Event::default()
        .event("endpoint")
        .data(format!("{MESSAGES_PATH}?session_id={}", session.id));

    // Dropping the stream (client disconnect) ends the session
    let guard = SessionGuard::new(sessions, session.id.clone());
    let live = BroadcastStream::new(rx).filter_map(|result| async move {
        match result {
            Ok(event) => Some(event_to_sse(event)),
            Err(err) => {
                tracing::warn!("SSE subscriber lagged: {}", err);
                None
            }
        }
    });

    let stream = futures::stream::once(async move { endpoint })
        .chain(live)
        .map(move |event| {
            let _session = &guard;
            Ok::<_, Infallible>(event)
        });

    Ok(Sse::new(stream).keep_alive(keep_alive()))
}

async fn handle_sse_message(
    State(state): State<SseState>,
    Query(query): Query<MessageQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, HttpRejection> {
    validate_origin(&state.allowed_origins, &headers)?;

    let session = state
        .server
        .sessions()
        .get_session(&query.session_id)
        .ok_or_else(HttpRejection::unknown_session)?;

    let message = String::from_utf8(body.to_vec()).map_err(|_| {
        HttpRejection::bad_request("invalid_body", "Request body must be UTF-8 JSON")
    })?;
    if serde_json::from_str::<serde_json::Value>(&message).is_err() {
        return Err(HttpRejection::bad_request(
            "invalid_json",
            "Request body must be valid JSON",
        ));
    }

    let server = Arc::clone(&state.server);
    tokio::spawn(async move {
        if let Some(reply) = server.handle_message(&message).await {
            match serde_json::from_str(&reply) {
                Ok(payload) => session.publish(Some("message"), payload).await,
                Err(err) => tracing::error!("Failed to re-encode SSE reply: {}", err),
            }
        }
    });

    Ok(StatusCode::ACCEPTED.into_response())
}
