//! Outward-facing event stream.
//!
//! Every observer (chat view, avatar, status pill) subscribes to the same
//! broadcast; the session layer is the only writer.

use tokio::sync::broadcast;

/// Events surfaced to UI observers. One logical stream for all of them.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The backend confirmed the session
    Connected { session_id: String },
    /// Connectivity signal flipped (also observable via the watch channel)
    ConnectivityChanged { connected: bool },
    /// Avatar/UI mood state update
    StateChange { state: String },
    /// Streaming partial reply text
    TextDelta { text: String },
    /// Finalized transcription of the user's own speech
    Transcription { text: String },
    /// Backend signalled it is working on a reply
    Processing { text: String },
    /// Finalized assistant reply, already past the dedup filter.
    /// `synthetic` marks locally-generated fallbacks (e.g. the processing
    /// timeout apology) rather than backend replies.
    AssistantMessage { text: String, synthetic: bool },
    /// Unsolicited assistant message
    ProactiveMessage {
        message: String,
        emotion: Option<String>,
    },
    /// Tool invocation notice
    FunctionCall {
        function: String,
        arguments: serde_json::Value,
    },
    /// Transient avatar animation cue
    IdleAnimation { emotion: String },
    /// User-visible failure reported by the backend
    Error { message: String },
    /// Informational toast
    Notice { message: String },
}

/// Broadcast channel for session events
pub type EventBroadcast = broadcast::Sender<SessionEvent>;

/// Create a new event broadcast channel
pub fn create_event_broadcast() -> EventBroadcast {
    let (tx, _) = broadcast::channel(256);
    tx
}
