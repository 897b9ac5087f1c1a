use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

/// Failure modes for establishing the streaming channel.
#[derive(Debug)]
pub enum ConnectError {
    /// The stream endpoint could not be reached or rejected the request.
    Http(String),
    /// The endpoint answered with something other than an event stream.
    NotAnEventStream { content_type: String },
    /// The stream ended, or the handshake deadline elapsed, before the
    /// server announced its message endpoint.
    MissingEndpoint,
    /// The initialize exchange failed.
    Handshake(String),
    /// `connect` was called while a session is already up or being
    /// established.
    AlreadyConnected,
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectError::Http(message) => write!(f, "stream request failed: {message}"),
            ConnectError::NotAnEventStream { content_type } => {
                write!(f, "expected text/event-stream, got {content_type:?}")
            }
            ConnectError::MissingEndpoint => {
                write!(f, "no endpoint event before the stream closed or the handshake deadline")
            }
            ConnectError::Handshake(message) => write!(f, "initialize failed: {message}"),
            ConnectError::AlreadyConnected => {
                write!(f, "already connected; close the session first")
            }
        }
    }
}

impl StdError for ConnectError {}

/// Failure modes for a single tool invocation, always surfaced to the
/// caller and never silently swallowed.
#[derive(Debug, Clone, PartialEq)]
pub enum CallError {
    /// `invoke` was called while the controller is not connected.
    NotConnected,
    /// The channel closed before the response arrived.
    ConnectionClosed,
    /// The per-call deadline elapsed first.
    Timeout(Duration),
    /// The server answered with an error frame.
    Rpc { code: i64, message: String },
    /// The side-channel send itself failed.
    Transport(String),
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallError::NotConnected => write!(f, "not connected to a tool server"),
            CallError::ConnectionClosed => write!(f, "connection closed while the call was pending"),
            CallError::Timeout(timeout) => {
                write!(f, "no response within {}ms", timeout.as_millis())
            }
            CallError::Rpc { code, message } => write!(f, "server error {code}: {message}"),
            CallError::Transport(message) => write!(f, "request could not be sent: {message}"),
        }
    }
}

impl StdError for CallError {}
