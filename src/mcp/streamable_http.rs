//! Streamable HTTP transport (MCP 2025-06-18).
//!
//! `POST /mcp` carries one JSON-RPC message, `GET /mcp` opens the session's
//! event stream with backlog replay after `Last-Event-ID`, and `DELETE /mcp`
//! ends a session. Every request except `initialize` must name a live session
//! in `Mcp-Session-Id`.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::header::{self, HeaderMap, HeaderValue};
use axum::http::StatusCode;
use axum::response::sse::Event;
use axum::response::{IntoResponse, Response, Sse};
use axum::routing::post;
use axum::{Json, Router};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use jsonrpc_core::types::request::{Call, MethodCall};
use jsonrpc_core::types::response::Output;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use crate::mcp::config::MCPConfig;
use crate::mcp::server::MCPServer;
use crate::mcp::session::{event_to_sse, keep_alive, Session};

const PROTOCOL_VERSION_HEADER: &str = "mcp-protocol-version";
const SESSION_ID_HEADER: &str = "mcp-session-id";
const LAST_EVENT_ID_HEADER: &str = "last-event-id";

const JSON: &str = "application/json";
const EVENT_STREAM: &str = "text/event-stream";

pub fn create_streamable_http_router(server: Arc<MCPServer>) -> Router {
    let allowed_origins = Arc::new(derive_allowed_origins(server.config()));
    Router::new()
        .route(
            "/mcp",
            post(handle_post).get(handle_get).delete(handle_delete),
        )
        .with_state(StreamableState {
            server,
            allowed_origins,
        })
}

#[derive(Clone)]
struct StreamableState {
    server: Arc<MCPServer>,
    allowed_origins: Arc<Vec<String>>,
}

impl StreamableState {
    fn supported_version(&self) -> &str {
        &self.server.config().mcp.protocol_version
    }

    /// The client's protocol version; absent means the server's own
    fn negotiated_version(&self, headers: &HeaderMap) -> Result<String, HttpRejection> {
        let Some(requested) = header_str(headers, PROTOCOL_VERSION_HEADER)? else {
            tracing::debug!(
                "No {} header, assuming {}",
                PROTOCOL_VERSION_HEADER,
                self.supported_version()
            );
            return Ok(self.supported_version().to_string());
        };

        if requested.trim().is_empty() {
            return Err(HttpRejection::bad_request(
                "invalid_protocol_version",
                "MCP-Protocol-Version must not be empty",
            ));
        }
        if requested != self.supported_version() {
            tracing::warn!(
                requested,
                supported = self.supported_version(),
                "Rejected unsupported protocol version"
            );
            return Err(HttpRejection::bad_request(
                "unsupported_protocol_version",
                format!(
                    "protocol version '{requested}' is not supported, use {}",
                    self.supported_version()
                ),
            ));
        }
        Ok(requested.to_string())
    }

    fn session_id<'a>(&self, headers: &'a HeaderMap) -> Result<&'a str, HttpRejection> {
        header_str(headers, SESSION_ID_HEADER)?.ok_or_else(|| {
            HttpRejection::bad_request("missing_session", "Mcp-Session-Id header is required")
        })
    }

    fn session(&self, headers: &HeaderMap) -> Result<Arc<Session>, HttpRejection> {
        let id = self.session_id(headers)?;
        self.server
            .sessions()
            .get_session(id)
            .ok_or_else(HttpRejection::unknown_session)
    }
}

async fn handle_post(
    State(state): State<StreamableState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, HttpRejection> {
    validate_origin(&state.allowed_origins, &headers)?;
    require_accept(&headers, &[JSON, EVENT_STREAM])?;
    let protocol_version = state.negotiated_version(&headers)?;

    let payload: Value = serde_json::from_slice(&body).map_err(|err| {
        tracing::warn!("Unparsable POST body: {}", err);
        HttpRejection::bad_request("invalid_json", "request body is not valid JSON")
    })?;

    // Client responses are acknowledged; the server sends no requests of its own
    if payload.get("method").is_none() && Output::deserialize(&payload).is_ok() {
        return Ok(StatusCode::ACCEPTED.into_response());
    }

    match jsonrpc_core::Request::deserialize(&payload) {
        Ok(jsonrpc_core::Request::Single(Call::MethodCall(call))) => {
            method_call(&state, &headers, call, protocol_version).await
        }
        Ok(jsonrpc_core::Request::Single(Call::Notification(notification))) => {
            tracing::debug!("Notification {}", notification.method);
            Ok(StatusCode::ACCEPTED.into_response())
        }
        Ok(jsonrpc_core::Request::Single(Call::Invalid { .. })) => Err(
            HttpRejection::bad_request("invalid_request", "not a valid JSON-RPC request"),
        ),
        Ok(jsonrpc_core::Request::Batch(_)) => Err(HttpRejection::bad_request(
            "batch_not_supported",
            "send one JSON-RPC message per request",
        )),
        Err(_) => Err(HttpRejection::bad_request(
            "invalid_message",
            "body must be a JSON-RPC request, notification or response",
        )),
    }
}

async fn method_call(
    state: &StreamableState,
    headers: &HeaderMap,
    call: MethodCall,
    protocol_version: String,
) -> Result<Response, HttpRejection> {
    let new_session = if call.method == "initialize" {
        Some(state.server.sessions().create_session(protocol_version).id.clone())
    } else {
        state.session(headers)?;
        None
    };

    let output = state.server.handle_method_call(call).await;
    json_rpc_response(&output, new_session)
}

fn json_rpc_response(
    output: &Output,
    session_id: Option<String>,
) -> Result<Response, HttpRejection> {
    let body = serde_json::to_vec(output)
        .map_err(|err| HttpRejection::internal("encode_failed", err.to_string()))?;

    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, JSON);
    if let Some(id) = session_id {
        let value = HeaderValue::from_str(&id).map_err(|_| {
            HttpRejection::internal("invalid_session", "session id is not a header value")
        })?;
        response = response.header(SESSION_ID_HEADER, value);
    }
    response
        .body(Body::from(body))
        .map_err(|err| HttpRejection::internal("response_build_failed", err.to_string()))
}

async fn handle_get(
    State(state): State<StreamableState>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, HttpRejection> {
    validate_origin(&state.allowed_origins, &headers)?;
    require_accept(&headers, &[EVENT_STREAM])?;
    let protocol_version = state.negotiated_version(&headers)?;
    let session = state.session(&headers)?;

    if session.protocol_version != protocol_version {
        return Err(HttpRejection::bad_request(
            "protocol_mismatch",
            format!(
                "session negotiated {}, request used {protocol_version}",
                session.protocol_version
            ),
        ));
    }

    let last_event_id: Option<u64> =
        header_str(&headers, LAST_EVENT_ID_HEADER)?.and_then(|v| v.parse().ok());

    let (backlog, live) = session.resume(last_event_id).await;
    let live = live.map(|received| match received {
        Ok(event) => event_to_sse(event),
        Err(BroadcastStreamRecvError::Lagged(skipped)) => Event::default()
            .event("warning")
            .data(json!({ "message": format!("dropped {skipped} events") }).to_string()),
    });
    let backlog = futures::stream::iter(backlog.into_iter().map(event_to_sse));

    Ok(Sse::new(backlog.chain(live).map(Ok::<_, Infallible>)).keep_alive(keep_alive()))
}

async fn handle_delete(
    State(state): State<StreamableState>,
    headers: HeaderMap,
) -> Result<StatusCode, HttpRejection> {
    validate_origin(&state.allowed_origins, &headers)?;
    let id = state.session_id(&headers)?;
    if state.server.sessions().remove_session(id) {
        tracing::info!("Session {} ended by client", id);
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(HttpRejection::unknown_session())
    }
}

/// A refused HTTP request, rendered as `{"error": code, "message": ...}`
#[derive(Debug)]
pub(crate) struct HttpRejection {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl HttpRejection {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub(crate) fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message)
    }

    pub(crate) fn unknown_session() -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            "unknown_session",
            "session not found or already ended",
        )
    }

    fn internal(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, code, message)
    }
}

impl IntoResponse for HttpRejection {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.code, "message": self.message }));
        (self.status, body).into_response()
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Result<Option<&'a str>, HttpRejection> {
    headers
        .get(name)
        .map(|value| {
            value.to_str().map_err(|_| {
                HttpRejection::bad_request("invalid_header", format!("{name} must be ASCII text"))
            })
        })
        .transpose()
}

/// Every media type in `required` must be acceptable
fn require_accept(headers: &HeaderMap, required: &[&str]) -> Result<(), HttpRejection> {
    let accept = header_str(headers, header::ACCEPT.as_str())?.unwrap_or_default();
    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|media| !accepts(accept, media))
        .collect();
    if missing.is_empty() {
        return Ok(());
    }
    Err(HttpRejection::new(
        StatusCode::NOT_ACCEPTABLE,
        "not_acceptable",
        format!("Accept header must include {}", missing.join(" and ")),
    ))
}

fn accepts(accept: &str, media: &str) -> bool {
    accept.split(',').map(str::trim).any(|offered| {
        offered == "*/*" || offered.split(';').next().map(str::trim) == Some(media)
    })
}

pub(crate) fn validate_origin(
    allowed_origins: &[String],
    headers: &HeaderMap,
) -> Result<(), HttpRejection> {
    let Some(origin) = header_str(headers, header::ORIGIN.as_str())? else {
        return Ok(());
    };
    if allowed_origins.iter().any(|allowed| allowed == origin) {
        return Ok(());
    }
    tracing::warn!(origin, "Rejected request from disallowed origin");
    Err(HttpRejection::new(
        StatusCode::FORBIDDEN,
        "origin_not_allowed",
        format!("origin '{origin}' is not allowed"),
    ))
}

/// Loopback origins on the configured port plus `server.allowed_origins`
pub(crate) fn derive_allowed_origins(config: &MCPConfig) -> Vec<String> {
    let port = config.server.port;
    let mut origins: Vec<String> = ["localhost", "127.0.0.1"]
        .iter()
        .flat_map(|host| [format!("http://{host}"), format!("http://{host}:{port}")])
        .chain(config.server.allowed_origins.iter().cloned())
        .collect();
    origins.sort();
    origins.dedup();
    origins
}
