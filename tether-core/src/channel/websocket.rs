//! WebSocket transport over tokio-tungstenite
//!
//! Text frames carry the JSON protocol. Pings are answered by tungstenite
//! itself; binary frames are ignored. `wss://` goes through rustls with the
//! webpki root store.

use super::transport::{Channel, Connector, Incoming};
use crate::core::TransportError;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use std::sync::Once;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};
use url::Url;

static CRYPTO_PROVIDER: Once = Once::new();

/// rustls needs a process-wide provider before the first TLS handshake
fn install_crypto_provider() {
    CRYPTO_PROVIDER.call_once(|| {
        // Err means the host application already installed one
        if rustls::crypto::ring::default_provider().install_default().is_err() {
            trace!("Using the already installed TLS crypto provider");
        }
    });
}

/// Connects to a `ws://` or `wss://` endpoint
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: Url,
}

impl WsConnector {
    pub fn new(url: &str) -> Result<Self, TransportError> {
        let url = Url::parse(url).map_err(|e| TransportError::Connect(format!("invalid url {url}: {e}")))?;
        match url.scheme() {
            "ws" | "wss" => Ok(Self { url }),
            other => Err(TransportError::Connect(format!("unsupported scheme: {other}"))),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<Box<dyn Channel>, TransportError> {
        debug!(url = %self.url, "Opening WebSocket");
        if self.url.scheme() == "wss" {
            install_crypto_provider();
        }
        let (stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        Ok(Box::new(WsChannel { stream }))
    }

    fn endpoint(&self) -> String {
        self.url.to_string()
    }
}

struct WsChannel {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Channel for WsChannel {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn recv(&mut self) -> Result<Incoming, TransportError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Incoming::Text(text)),
                Some(Ok(Message::Close(frame))) => {
                    return Ok(match frame {
                        Some(frame) => Incoming::Closed {
                            code: Some(u16::from(frame.code)),
                            reason: (!frame.reason.is_empty()).then(|| frame.reason.to_string()),
                        },
                        None => Incoming::Closed {
                            code: None,
                            reason: None,
                        },
                    })
                }
                Some(Ok(other)) => trace!(kind = ?other, "Ignoring non-text frame"),
                Some(Err(e)) => return Err(TransportError::Receive(e.to_string())),
                None => {
                    return Ok(Incoming::Closed {
                        code: None,
                        reason: None,
                    })
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.stream
            .close(None)
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_websocket_urls() {
        assert!(WsConnector::new("ws://localhost:9000/events").is_ok());
        assert!(WsConnector::new("http://localhost:9000").is_err());
        assert!(WsConnector::new("not a url").is_err());
        assert!(WsConnector::new("wss://stream.example.com/events").is_ok());
    }

    #[tokio::test]
    async fn test_wss_reaches_tls_handshake() {
        // Peer accepts the TCP connection and hangs up before any TLS bytes
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((socket, _)) = listener.accept().await {
                drop(socket);
            }
        });

        let connector = WsConnector::new(&format!("wss://{addr}/events")).unwrap();
        let err = match connector.connect().await {
            Ok(_) => panic!("handshake against a silent peer cannot succeed"),
            Err(e) => e,
        };
        assert!(matches!(err, TransportError::Connect(_)));
        assert!(
            !err.to_string().contains("TLS support not compiled in"),
            "wss support missing: {err}"
        );
    }
}
