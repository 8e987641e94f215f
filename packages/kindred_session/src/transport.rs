//! Transport seam between the connection manager and the wire.
//!
//! The manager only ever sees a [`TransportHandle`]: a channel to write
//! text frames into and a stream of inbound events. [`WsConnector`] is the
//! production implementation over tokio-tungstenite; tests substitute a
//! channel-backed connector.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tracing::{debug, error};

use crate::error::SessionError;

/// Inbound side of a live transport.
#[derive(Debug)]
pub enum TransportEvent {
    /// One text frame from the backend.
    Frame(String),
    /// The transport closed: remote close, network error, or local close.
    Closed,
}

/// A live duplex connection. Dropping `outbound` closes the connection;
/// `inbound` always terminates with [`TransportEvent::Closed`].
pub struct TransportHandle {
    pub outbound: mpsc::Sender<String>,
    pub inbound: mpsc::Receiver<TransportEvent>,
}

/// Dials the backend. Exactly one implementation is live in production;
/// the seam exists so the session loop is testable without a server.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn dial(&self, url: &str) -> Result<TransportHandle, SessionError>;
}

/// WebSocket connector over tokio-tungstenite.
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn dial(&self, url: &str) -> Result<TransportHandle, SessionError> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(SessionError::from_tungstenite)?;
        debug!("websocket connected");

        let (mut ws_write, mut ws_read) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::channel::<String>(64);
        let (in_tx, in_rx) = mpsc::channel::<TransportEvent>(256);

        // Writer task: drain the outbound channel onto the socket. Ends when
        // the manager drops its sender (local close) or the socket dies.
        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(e) = ws_write.send(tungstenite::Message::Text(text.into())).await {
                    error!("websocket send failed: {}", e);
                    break;
                }
            }
            let _ = ws_write.close().await;
        });

        // Reader task: forward text frames, signal close exactly once.
        tokio::spawn(async move {
            while let Some(msg) = ws_read.next().await {
                match msg {
                    Ok(tungstenite::Message::Text(text)) => {
                        if in_tx
                            .send(TransportEvent::Frame(text.to_string()))
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                    Ok(tungstenite::Message::Close(_)) => {
                        debug!("websocket closed by peer");
                        break;
                    }
                    Err(e) => {
                        debug!("websocket read error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
            let _ = in_tx.send(TransportEvent::Closed).await;
        });

        Ok(TransportHandle {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}
