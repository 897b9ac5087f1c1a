//! The single-channel session: at most one bound SSE stream per server
//! process. Binding is last-writer-wins; a superseded stream is actively
//! ended by dropping its sender instead of stranding its caller until
//! timeout.

use crate::mcp::protocol::JsonRpcResponse;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    NotBound,
    Closed,
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelError::NotBound => write!(f, "no stream is bound to this session"),
            ChannelError::Closed => write!(f, "the bound stream has closed"),
        }
    }
}

impl StdError for ChannelError {}

/// A freshly bound stream: the receiver feeds the SSE response body, the id
/// scopes `unbind` so a stale stream's teardown cannot evict its successor.
pub struct Binding {
    pub channel_id: u64,
    pub receiver: UnboundedReceiver<JsonRpcResponse>,
}

#[derive(Default)]
struct Slot {
    sender: Option<UnboundedSender<JsonRpcResponse>>,
    channel_id: u64,
}

/// Owns the bound-channel slot. Binds are serialized through the lock;
/// sending never holds it across an await.
#[derive(Default)]
pub struct SessionChannel {
    slot: Mutex<Slot>,
}

impl SessionChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a new stream, superseding and ending any previous one.
    pub fn bind(&self) -> Binding {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut slot = self.slot.lock().unwrap();
        if slot.sender.take().is_some() {
            debug!(channel_id = slot.channel_id, "Superseding bound stream");
        }
        slot.channel_id += 1;
        slot.sender = Some(tx);
        Binding {
            channel_id: slot.channel_id,
            receiver: rx,
        }
    }

    /// Tears down the binding, but only if `channel_id` is still the bound
    /// one; a superseded stream's teardown is a no-op.
    pub fn unbind(&self, channel_id: u64) {
        let mut slot = self.slot.lock().unwrap();
        if slot.channel_id == channel_id {
            slot.sender = None;
            debug!(channel_id, "Stream unbound");
        }
    }

    pub fn is_bound(&self) -> bool {
        self.slot.lock().unwrap().sender.is_some()
    }

    /// Routes a response frame onto the bound stream. If the receiving side
    /// has gone away the binding is cleared and the frame reported lost.
    pub fn route(&self, frame: JsonRpcResponse) -> Result<(), ChannelError> {
        let mut slot = self.slot.lock().unwrap();
        let sender = slot.sender.as_ref().ok_or(ChannelError::NotBound)?;
        if sender.send(frame).is_err() {
            slot.sender = None;
            return Err(ChannelError::Closed);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frame(id: u64) -> JsonRpcResponse {
        JsonRpcResponse::result(Some(json!(id)), json!({}))
    }

    #[test]
    fn route_before_bind_fails_with_not_bound() {
        let session = SessionChannel::new();
        assert_eq!(session.route(frame(1)), Err(ChannelError::NotBound));
        assert!(!session.is_bound());
    }

    #[test]
    fn bound_frames_arrive_on_the_receiver() {
        let session = SessionChannel::new();
        let mut binding = session.bind();
        session.route(frame(1)).expect("routed");
        let received = binding.receiver.try_recv().expect("frame");
        assert_eq!(received.token(), Some(1));
    }

    #[test]
    fn rebinding_ends_the_superseded_stream() {
        let session = SessionChannel::new();
        let mut first = session.bind();
        let mut second = session.bind();

        // The first receiver's sender was dropped, so it reports closure.
        assert!(matches!(
            first.receiver.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));

        session.route(frame(2)).expect("routed to second");
        assert_eq!(second.receiver.try_recv().expect("frame").token(), Some(2));
    }

    #[test]
    fn stale_unbind_does_not_evict_the_successor() {
        let session = SessionChannel::new();
        let first = session.bind();
        let _second = session.bind();

        session.unbind(first.channel_id);
        assert!(session.is_bound());

        session.route(frame(3)).expect("still routable");
    }

    #[test]
    fn current_unbind_closes_the_session() {
        let session = SessionChannel::new();
        let binding = session.bind();
        session.unbind(binding.channel_id);
        assert!(!session.is_bound());
        assert_eq!(session.route(frame(4)), Err(ChannelError::NotBound));
    }

    #[test]
    fn dropped_receiver_reports_closed_once() {
        let session = SessionChannel::new();
        let binding = session.bind();
        drop(binding.receiver);
        assert_eq!(session.route(frame(5)), Err(ChannelError::Closed));
        // The slot was cleared, so later routes see NotBound.
        assert_eq!(session.route(frame(6)), Err(ChannelError::NotBound));
    }
}
