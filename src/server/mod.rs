//! The companion tool server: a thin axum wrapper over the session channel
//! and the dispatcher. `GET /mcp/stream` opens the response stream and
//! announces the message endpoint; `POST /mcp/messages` is the side channel.

pub mod channel;
pub mod dispatch;
pub mod registry;
pub mod tools;

use crate::mcp::protocol::{JsonRpcResponse, ServerInfo, CHANNEL_NOT_BOUND, PARSE_ERROR};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use channel::SessionChannel;
use dispatch::Dispatcher;
use futures_util::stream::{self, Stream, StreamExt};
use registry::RegistryError;
use serde_json::json;
use std::convert::Infallible;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

pub use crate::mcp::protocol::STREAM_PATH;

pub const MESSAGES_PATH: &str = "/mcp/messages";

const KEEP_ALIVE_SECONDS: u64 = 30;

#[derive(Debug)]
pub enum ServeError {
    Registry(RegistryError),
    InvalidOrigin(String),
    Io(std::io::Error),
}

impl fmt::Display for ServeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServeError::Registry(err) => write!(f, "could not build tool registry: {err}"),
            ServeError::InvalidOrigin(origin) => {
                write!(f, "'{origin}' is not a valid CORS origin")
            }
            ServeError::Io(err) => write!(f, "server I/O error: {err}"),
        }
    }
}

impl StdError for ServeError {}

pub struct AppState {
    session: SessionChannel,
    dispatcher: Dispatcher,
}

/// Builds the application router around the built-in tool registry.
pub fn app(identity: ServerInfo, allowed_origin: Option<&str>) -> Result<Router, ServeError> {
    let registry = tools::builtin_registry().map_err(ServeError::Registry)?;
    app_with_registry(registry, identity, allowed_origin)
}

/// Same, but over an arbitrary registry.
pub fn app_with_registry(
    registry: registry::ToolRegistry,
    identity: ServerInfo,
    allowed_origin: Option<&str>,
) -> Result<Router, ServeError> {
    let state = Arc::new(AppState {
        session: SessionChannel::new(),
        dispatcher: Dispatcher::new(Arc::new(registry), identity),
    });
    let cors = match allowed_origin {
        Some(origin) => {
            let origin: HeaderValue = origin
                .parse()
                .map_err(|_| ServeError::InvalidOrigin(origin.to_string()))?;
            CorsLayer::new()
                .allow_origin(origin)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers([header::CONTENT_TYPE])
        }
        None => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::CONTENT_TYPE]),
    };
    Ok(Router::new()
        .route(STREAM_PATH, get(open_stream))
        .route(MESSAGES_PATH, post(submit_message))
        .layer(cors)
        .with_state(state))
}

/// Binds `listen_addr` and serves until the process is stopped.
pub async fn run(
    listen_addr: &str,
    identity: ServerInfo,
    allowed_origin: Option<&str>,
) -> Result<(), ServeError> {
    let router = app(identity, allowed_origin)?;
    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .map_err(ServeError::Io)?;
    let local_addr = listener.local_addr().map_err(ServeError::Io)?;
    info!(%local_addr, "Tool server listening");
    axum::serve(listener, router).await.map_err(ServeError::Io)
}

struct StreamGuard {
    state: Arc<AppState>,
    channel_id: u64,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.state.session.unbind(self.channel_id);
    }
}

/// Opens the response stream. The first event announces the message-submit
/// endpoint; every later frame is a `message` event carrying a JSON-RPC
/// payload. Dropping the connection unbinds the session, unless a newer
/// stream has already superseded it.
async fn open_stream(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let binding = state.session.bind();
    info!(channel_id = binding.channel_id, "Stream bound");
    let endpoint = Event::default()
        .event("endpoint")
        .data(format!("{MESSAGES_PATH}?session={}", binding.channel_id));
    let guard = StreamGuard {
        state: state.clone(),
        channel_id: binding.channel_id,
    };
    let frames = UnboundedReceiverStream::new(binding.receiver).map(move |frame| {
        let _ = &guard;
        Ok(Event::default().event("message").data(encode_frame(&frame)))
    });
    Sse::new(stream::once(async { Ok(endpoint) }).chain(frames))
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(KEEP_ALIVE_SECONDS)))
}

fn encode_frame(frame: &JsonRpcResponse) -> String {
    serde_json::to_string(frame).unwrap_or_default()
}

/// The side channel. Submissions while no stream is bound are refused with
/// 503 so the client knows the channel is not ready; well-formed requests
/// are accepted with 202 immediately and answered on the stream once served.
async fn submit_message(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> axum::response::Response {
    if !state.session.is_bound() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "jsonrpc": "2.0",
                "error": { "code": CHANNEL_NOT_BOUND, "message": "stream channel not bound" },
                "id": null,
            })),
        )
            .into_response();
    }
    let request = match Dispatcher::parse(&body) {
        Ok(request) => request,
        Err(err) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "jsonrpc": "2.0",
                    "error": { "code": PARSE_ERROR, "message": err.to_string() },
                    "id": null,
                })),
            )
                .into_response()
        }
    };
    tokio::spawn(async move {
        state.dispatcher.dispatch(&state.session, request).await;
    });
    StatusCode::ACCEPTED.into_response()
}
