//! Client side of the streaming channel: connection lifecycle plus the
//! invocation correlator that pairs side-channel requests with responses
//! delivered on the stream.

use crate::mcp::error::{CallError, ConnectError};
use crate::mcp::protocol::{
    ClientInfo, InitializeParams, InitializeResult, JsonRpcRequest, JsonRpcResponse, ServerInfo,
    ToolCallParams, ToolCallResult, ToolsListResult, PROTOCOL_VERSION, STREAM_PATH,
};
use crate::mcp::sse::{is_event_stream_content_type, SseEvent, SseEventParser};
use futures_util::StreamExt;
use reqwest::Url;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const HTTP_CONNECT_TIMEOUT_SECONDS: u64 = 10;
const HTTP_POOL_IDLE_TIMEOUT_SECONDS: u64 = 90;
const HANDSHAKE_TIMEOUT_SECONDS: u64 = 10;

type PendingMap = HashMap<u64, oneshot::Sender<Result<Value, CallError>>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed(String),
}

/// Connection controller for one client session.
///
/// Holds the pending-invocation table; every outstanding call is resolved by
/// exactly one of: a matching response frame, its deadline, or channel
/// closure.
pub struct Connection {
    http: reqwest::Client,
    stream_url: Url,
    identity: ClientInfo,
    default_timeout: Duration,
    handshake_timeout: Duration,
    state: Arc<StdMutex<ConnectionState>>,
    message_url: StdMutex<Option<Url>>,
    server_info: StdMutex<Option<ServerInfo>>,
    closed: StdMutex<CancellationToken>,
    pending: Arc<Mutex<PendingMap>>,
    next_token: AtomicU64,
}

impl Connection {
    /// Builds a controller in the `Disconnected` state. `base_url` is the
    /// server origin; the stream endpoint is derived from it.
    pub fn new(
        base_url: &str,
        identity: ClientInfo,
        default_timeout: Duration,
    ) -> Result<Self, ConnectError> {
        let base =
            Url::parse(base_url).map_err(|err| ConnectError::Http(format!("bad URL: {err}")))?;
        let stream_url = base
            .join(STREAM_PATH)
            .map_err(|err| ConnectError::Http(format!("bad URL: {err}")))?;
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECONDS))
            .pool_idle_timeout(Duration::from_secs(HTTP_POOL_IDLE_TIMEOUT_SECONDS))
            .build()
            .map_err(|err| ConnectError::Http(err.to_string()))?;
        Ok(Self {
            http,
            stream_url,
            identity,
            default_timeout,
            handshake_timeout: Duration::from_secs(HANDSHAKE_TIMEOUT_SECONDS),
            state: Arc::new(StdMutex::new(ConnectionState::Disconnected)),
            message_url: StdMutex::new(None),
            server_info: StdMutex::new(None),
            closed: StdMutex::new(CancellationToken::new()),
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_token: AtomicU64::new(1),
        })
    }

    /// Overrides the deadline covering the whole handshake: the wait for the
    /// `endpoint` event plus the initialize exchange.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.state.lock().unwrap().clone()
    }

    pub fn server_info(&self) -> Option<ServerInfo> {
        self.server_info.lock().unwrap().clone()
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Opens the stream, waits for the `endpoint` event, then completes the
    /// initialize exchange. Not auto-retried on failure; the controller is
    /// left in `Failed` with the cause and the caller decides. Rejected while
    /// a session is already up or being established; `close()` first.
    pub async fn connect(&self) -> Result<(), ConnectError> {
        {
            let mut state = self.state.lock().unwrap();
            match *state {
                ConnectionState::Connecting | ConnectionState::Connected => {
                    return Err(ConnectError::AlreadyConnected);
                }
                _ => *state = ConnectionState::Connecting,
            }
        }
        match self.open_channel().await {
            Ok(()) => {
                self.set_state(ConnectionState::Connected);
                Ok(())
            }
            Err(err) => {
                self.set_state(ConnectionState::Failed(err.to_string()));
                Err(err)
            }
        }
    }

    async fn open_channel(&self) -> Result<(), ConnectError> {
        let response = self
            .http
            .get(self.stream_url.clone())
            .header("Accept", "text/event-stream")
            .send()
            .await
            .map_err(|err| ConnectError::Http(err.to_string()))?;
        if !response.status().is_success() {
            return Err(ConnectError::Http(format!(
                "HTTP error: {}",
                response.status()
            )));
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("")
            .to_string();
        if !is_event_stream_content_type(&content_type) {
            return Err(ConnectError::NotAnEventStream { content_type });
        }

        let mut stream = response.bytes_stream();
        let mut parser = SseEventParser::default();

        // The server announces its message endpoint before anything else. A
        // server that accepts the stream but never announces one must not
        // strand the controller in Connecting.
        let endpoint = tokio::time::timeout(self.handshake_timeout, async {
            loop {
                let Some(chunk) = stream.next().await else {
                    return Err(ConnectError::MissingEndpoint);
                };
                let chunk = chunk.map_err(|err| ConnectError::Http(err.to_string()))?;
                if let Some(event) = parser
                    .push(&chunk)
                    .into_iter()
                    .find(|event| event.name == "endpoint")
                {
                    return Ok(event.data);
                }
            }
        })
        .await
        .map_err(|_| ConnectError::MissingEndpoint)??;
        let message_url = self
            .stream_url
            .join(&endpoint)
            .map_err(|err| ConnectError::Http(format!("bad endpoint URL: {err}")))?;
        debug!(url = %message_url, "Stream bound, message endpoint announced");
        *self.message_url.lock().unwrap() = Some(message_url);

        let closed = CancellationToken::new();
        {
            // Stop any reader left over from an earlier session before the
            // new one starts sharing the pending map.
            let mut slot = self.closed.lock().unwrap();
            slot.cancel();
            *slot = closed.clone();
        }
        self.spawn_reader(stream, parser, closed);

        self.initialize().await.map_err(|err| match err {
            CallError::Rpc { code, message } => {
                ConnectError::Handshake(format!("server error {code}: {message}"))
            }
            other => ConnectError::Handshake(other.to_string()),
        })
    }

    async fn initialize(&self) -> Result<(), CallError> {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: serde_json::json!({}),
            client_info: self.identity.clone(),
        };
        let result = self
            .request(
                "initialize",
                Some(serde_json::to_value(&params).map_err(|err| {
                    CallError::Transport(format!("unencodable initialize params: {err}"))
                })?),
                self.handshake_timeout,
            )
            .await?;
        let details: InitializeResult = serde_json::from_value(result)
            .map_err(|err| CallError::Transport(format!("unexpected initialize result: {err}")))?;
        debug!(
            server = %details.server_info.name,
            version = %details.server_info.version,
            protocol = %details.protocol_version,
            "Initialize exchange complete"
        );
        *self.server_info.lock().unwrap() =
            Some(details.server_info);

        self.send_frame(&JsonRpcRequest::notification("notifications/initialized"))
            .await
    }

    /// Invokes a named tool and waits for its correlated response.
    pub async fn invoke(
        &self,
        tool: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<ToolCallResult, CallError> {
        if self.state() != ConnectionState::Connected {
            return Err(CallError::NotConnected);
        }
        let params = ToolCallParams {
            name: tool.to_string(),
            arguments,
        };
        let result = self
            .request(
                "tools/call",
                Some(serde_json::to_value(&params).map_err(|err| {
                    CallError::Transport(format!("unencodable arguments: {err}"))
                })?),
                timeout,
            )
            .await?;
        serde_json::from_value(result)
            .map_err(|err| CallError::Transport(format!("unexpected tools/call result: {err}")))
    }

    /// Lists the tools the server advertises.
    pub async fn list_tools(&self) -> Result<ToolsListResult, CallError> {
        if self.state() != ConnectionState::Connected {
            return Err(CallError::NotConnected);
        }
        let result = self.request("tools/list", None, self.default_timeout).await?;
        serde_json::from_value(result)
            .map_err(|err| CallError::Transport(format!("unexpected tools/list result: {err}")))
    }

    /// Idempotent; rejects every still-pending invocation with
    /// `ConnectionClosed` and returns to `Disconnected`.
    pub async fn close(&self) {
        self.closed.lock().unwrap().cancel();
        fail_pending(&self.pending, CallError::ConnectionClosed).await;
        self.set_state(ConnectionState::Disconnected);
    }

    /// Registers a pending invocation, sends the frame over the side channel
    /// and suspends until response, deadline, or closure — whichever consumes
    /// the pending slot first; the other paths become no-ops.
    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, CallError> {
        let token = self.next_token.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(token, tx);

        let frame = JsonRpcRequest::new(token, method, params);
        if let Err(err) = self.send_frame(&frame).await {
            self.pending.lock().await.remove(&token);
            return Err(err);
        }
        debug!(token, method, timeout_ms = timeout.as_millis() as u64, "Invocation sent");

        await_outcome(&self.pending, rx, token, timeout).await
    }

    async fn send_frame(&self, frame: &JsonRpcRequest) -> Result<(), CallError> {
        let message_url = self
            .message_url
            .lock()
            .unwrap()
            .clone()
            .ok_or(CallError::NotConnected)?;
        let response = self
            .http
            .post(message_url)
            .json(frame)
            .send()
            .await
            .map_err(|err| CallError::Transport(err.to_string()))?;
        if !response.status().is_success() {
            return Err(CallError::Transport(format!(
                "HTTP error: {}",
                response.status()
            )));
        }
        Ok(())
    }

    fn spawn_reader(
        &self,
        mut stream: impl futures_util::Stream<Item = reqwest::Result<bytes::Bytes>>
            + Unpin
            + Send
            + 'static,
        mut parser: SseEventParser,
        closed: CancellationToken,
    ) {
        let pending = self.pending.clone();
        let state = self.state.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    // Cancelled externally, by close() or a superseding
                    // connect; teardown is theirs, not this reader's.
                    _ = closed.cancelled() => return,
                    chunk = stream.next() => match chunk {
                        Some(Ok(chunk)) => {
                            for event in parser.push(&chunk) {
                                handle_frame(&pending, event).await;
                            }
                        }
                        Some(Err(err)) => {
                            warn!(error = %err, "Stream read failed");
                            break;
                        }
                        None => break,
                    },
                }
            }
            for event in parser.finish() {
                handle_frame(&pending, event).await;
            }
            fail_pending(&pending, CallError::ConnectionClosed).await;
            closed.cancel();
            let mut state = state.lock().unwrap();
            if *state == ConnectionState::Connected {
                *state = ConnectionState::Disconnected;
            }
        });
    }

    fn set_state(&self, next: ConnectionState) {
        *self.state.lock().unwrap() = next;
    }
}

/// Matches a response frame against the pending table. Frames with no match
/// (already timed out, or an unknown token) are discarded with a diagnostic;
/// that is not an error state for the controller.
async fn handle_frame(pending: &Arc<Mutex<PendingMap>>, event: SseEvent) {
    if event.name != SseEvent::DEFAULT_NAME {
        debug!(event = %event.name, "Ignoring non-message event");
        return;
    }
    let frame = match serde_json::from_str::<JsonRpcResponse>(&event.data) {
        Ok(frame) => frame,
        Err(err) => {
            debug!(error = %err, "Discarding unparseable frame");
            return;
        }
    };
    let Some(token) = frame.token() else {
        debug!("Discarding frame without integer token");
        return;
    };
    let Some(tx) = pending.lock().await.remove(&token) else {
        debug!(token, "Discarding frame with no pending invocation");
        return;
    };
    let outcome = frame.into_outcome().map_err(|error| CallError::Rpc {
        code: error.code,
        message: error.message,
    });
    let _ = tx.send(outcome);
}

/// Suspends until the response or the deadline resolves the invocation.
/// Whichever path removes the pending slot first wins; a deadline that finds
/// the slot already consumed yields to the response in flight on the oneshot.
async fn await_outcome(
    pending: &Arc<Mutex<PendingMap>>,
    rx: oneshot::Receiver<Result<Value, CallError>>,
    token: u64,
    timeout: Duration,
) -> Result<Value, CallError> {
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);
    let mut rx = rx;
    tokio::select! {
        outcome = &mut rx => match outcome {
            Ok(result) => result,
            Err(_) => Err(CallError::ConnectionClosed),
        },
        _ = &mut deadline => {
            if pending.lock().await.remove(&token).is_some() {
                debug!(token, "Invocation timed out");
                Err(CallError::Timeout(timeout))
            } else {
                match rx.await {
                    Ok(result) => result,
                    Err(_) => Err(CallError::ConnectionClosed),
                }
            }
        }
    }
}

async fn fail_pending(pending: &Arc<Mutex<PendingMap>>, reason: CallError) {
    let drained: Vec<_> = pending.lock().await.drain().collect();
    for (token, tx) in drained {
        debug!(token, reason = %reason, "Rejecting pending invocation");
        let _ = tx.send(Err(reason.clone()));
    }
}
