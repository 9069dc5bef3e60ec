//! In-memory transport
//!
//! A scriptable stand-in for a real server. The test (or demo) keeps a clone
//! of the [`MemoryConnector`] and uses it to refuse connections, push frames
//! to the client and drop the link, while the connection manager holds
//! another clone as its connector.

use super::transport::{Channel, Connector, Incoming};
use crate::core::TransportError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;

#[derive(Default)]
struct ServerState {
    /// Refuse this many upcoming connects
    refuse_next: u32,
    refuse_all: bool,
    connect_attempts: u32,
    /// Peer side of the live connection
    peer: Option<(u64, mpsc::UnboundedSender<Incoming>)>,
    next_id: u64,
    /// Every frame the client sent, across connections
    sent: Vec<String>,
    client_closes: u32,
}

#[derive(Clone, Default)]
pub struct MemoryConnector {
    state: Arc<Mutex<ServerState>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse the next `n` connection attempts
    pub fn refuse_next(&self, n: u32) {
        self.state.lock().refuse_next = n;
    }

    /// Refuse (or accept again) every connection attempt
    pub fn refuse_all(&self, refuse: bool) {
        self.state.lock().refuse_all = refuse;
    }

    pub fn connect_attempts(&self) -> u32 {
        self.state.lock().connect_attempts
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().peer.is_some()
    }

    /// Frames sent by the client so far
    pub fn sent(&self) -> Vec<String> {
        self.state.lock().sent.clone()
    }

    pub fn client_closes(&self) -> u32 {
        self.state.lock().client_closes
    }

    /// Deliver a frame to the connected client; false if nobody is connected
    pub fn push(&self, text: impl Into<String>) -> bool {
        match &self.state.lock().peer {
            Some((_, tx)) => tx.send(Incoming::Text(text.into())).is_ok(),
            None => false,
        }
    }

    /// Close the live connection from the server side
    pub fn drop_connection(&self, code: Option<u16>, reason: Option<&str>) -> bool {
        let Some((_, tx)) = self.state.lock().peer.take() else {
            return false;
        };
        tx.send(Incoming::Closed {
            code,
            reason: reason.map(str::to_string),
        })
        .is_ok()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> Result<Box<dyn Channel>, TransportError> {
        let mut state = self.state.lock();
        state.connect_attempts += 1;

        if state.refuse_all || state.refuse_next > 0 {
            state.refuse_next = state.refuse_next.saturating_sub(1);
            trace!(attempt = state.connect_attempts, "Memory connector refusing");
            return Err(TransportError::Connect("connection refused".to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        state.next_id += 1;
        let id = state.next_id;
        state.peer = Some((id, tx));

        Ok(Box::new(MemoryChannel {
            id,
            inbound: rx,
            state: Arc::clone(&self.state),
        }))
    }

    fn endpoint(&self) -> String {
        "memory://local".to_string()
    }
}

struct MemoryChannel {
    id: u64,
    inbound: mpsc::UnboundedReceiver<Incoming>,
    state: Arc<Mutex<ServerState>>,
}

impl MemoryChannel {
    fn is_live(state: &ServerState, id: u64) -> bool {
        matches!(state.peer, Some((peer, _)) if peer == id)
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if !Self::is_live(&state, self.id) {
            return Err(TransportError::Send("connection closed".to_string()));
        }
        state.sent.push(text);
        Ok(())
    }

    async fn recv(&mut self) -> Result<Incoming, TransportError> {
        Ok(self.inbound.recv().await.unwrap_or(Incoming::Closed {
            code: None,
            reason: None,
        }))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if Self::is_live(&state, self.id) {
            state.peer = None;
        }
        state.client_closes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_refusals() {
        let connector = MemoryConnector::new();
        connector.refuse_next(2);

        assert!(connector.connect().await.is_err());
        assert!(connector.connect().await.is_err());
        assert!(connector.connect().await.is_ok());
        assert_eq!(connector.connect_attempts(), 3);
    }

    #[tokio::test]
    async fn test_push_and_drop() {
        let connector = MemoryConnector::new();
        let mut channel = connector.connect().await.unwrap();

        channel.send("hello".to_string()).await.unwrap();
        assert_eq!(connector.sent(), vec!["hello".to_string()]);

        assert!(connector.push("frame"));
        assert_eq!(channel.recv().await.unwrap(), Incoming::Text("frame".to_string()));

        assert!(connector.drop_connection(Some(1006), Some("gone")));
        assert_eq!(
            channel.recv().await.unwrap(),
            Incoming::Closed {
                code: Some(1006),
                reason: Some("gone".to_string())
            }
        );
        assert!(channel.send("late".to_string()).await.is_err());
    }
}
