//! Kindred session - singleton realtime connection layer for the companion client.
//!
//! Every UI observer (chat view, avatar, status pill) shares one logical
//! WebSocket session. This crate owns that session: connect/disconnect
//! lifecycle, reconnection with exponential backoff, outbound queuing while
//! disconnected, inbound event dispatch, reply deduplication, token rotation
//! without reconnecting, and assistant speech playback with capture-aware
//! gain ducking. Failures never cross the public boundary as panics or
//! errors; they resolve into the connectivity signal and the event stream.
//!
//! # Example
//!
//! ```no_run
//! use kindred_session::{SessionConfig, SessionManager};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = SessionConfig::for_endpoint("wss://companion.example/realtime");
//!     let manager = SessionManager::new(config);
//!
//!     let mut events = manager.subscribe();
//!     manager.connect().await;
//!     manager.send_text("hola").await;
//!
//!     while let Ok(event) = events.recv().await {
//!         println!("{event:?}");
//!     }
//! }
//! ```

mod audio;
mod config;
mod dedup;
mod dispatch;
mod error;
mod events;
mod metrics;
mod queue;
mod session;
mod token;
mod transport;

pub use audio::{AudioPlayer, decode_payload, playback_gain};
pub use config::{AudioConfig, ConnectConfig, DedupConfig, SessionConfig};
pub use dedup::{DedupFilter, normalize_reply};
pub use dispatch::PROCESSING_FALLBACK;
pub use error::SessionError;
pub use events::{EventBroadcast, SessionEvent, create_event_broadcast};
pub use metrics::{MetricsSnapshot, SessionMetrics};
pub use queue::{OutboundQueue, QueuedFrame};
pub use session::{SessionManager, SessionStatus};
pub use token::TokenSynchronizer;
pub use transport::{Connector, TransportEvent, TransportHandle, WsConnector};

// Re-export the wire types so most consumers only need this crate.
pub use kindred_protocol::{ClientFrame, ServerFrame};
