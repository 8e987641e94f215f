//! Token rotation on a live session.

use kindred_protocol::ClientFrame;

/// Pushes a rotated auth token onto an open session without reconnecting.
///
/// Tracks the last token confirmed onto the wire so repeated syncs with an
/// unchanged token are skipped. The connection manager calls `sync` with
/// `force = true` once after every successful open — a rotation that
/// happened while disconnected must not be silently dropped.
#[derive(Debug, Default)]
pub struct TokenSynchronizer {
    last_sent: Option<String>,
}

impl TokenSynchronizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the `refresh_token` frame to transmit, or `None` for the
    /// idempotent skip. Recording happens here, not at transmit time; the
    /// caller owns the wire.
    pub fn sync(&mut self, token: &str, force: bool) -> Option<ClientFrame> {
        if !force && self.last_sent.as_deref() == Some(token) {
            return None;
        }
        self.last_sent = Some(token.to_string());
        Some(ClientFrame::RefreshToken {
            token: token.to_string(),
        })
    }

    pub fn last_sent(&self) -> Option<&str> {
        self.last_sent.as_deref()
    }

    /// Forget the recorded token (hard session reset).
    pub fn reset(&mut self) {
        self.last_sent = None;
    }
}
