use tokio_tungstenite::tungstenite;

/// Errors raised inside the session layer.
///
/// Nothing here crosses the public `connect`/`send`/`disconnect` boundary —
/// those resolve failures into the connectivity signal. `SessionError` is
/// what the internals pass around before a failure is absorbed.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The backend could not be reached; always retryable.
    #[error("backend is unavailable")]
    Unavailable,

    /// A frame failed to serialize or parse.
    #[error("frame codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// An audio payload could not be decoded into playable samples.
    #[error("audio decode failed: {0}")]
    AudioDecode(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SessionError {
    /// Classify a tungstenite error. Connection-level io failures become
    /// `Unavailable` so the reconnect policy treats them as non-fatal.
    pub fn from_tungstenite(err: tungstenite::Error) -> Self {
        let is_connect = match &err {
            tungstenite::Error::Io(io_err) => matches!(
                io_err.kind(),
                std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::TimedOut
            ),
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => true,
            _ => false,
        };
        if is_connect {
            Self::Unavailable
        } else {
            Self::Other(err.into())
        }
    }
}
