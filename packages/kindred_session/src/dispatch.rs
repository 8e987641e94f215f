//! Inbound frame dispatcher.
//!
//! One exhaustive match over [`ServerFrame`] routes every inbound frame to
//! its handler; adding a frame type without handling it is a compile error.
//! Frames that fail to parse (including unknown `type` values) are logged
//! and dropped, never fatal.

use kindred_protocol::ServerFrame;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::audio::AudioPlayer;
use crate::config::SessionConfig;
use crate::dedup::DedupFilter;
use crate::events::{EventBroadcast, SessionEvent};
use crate::metrics::SessionMetrics;

/// Fallback reply surfaced when the backend signalled `processing` but the
/// actual response never landed within the configured window.
pub const PROCESSING_FALLBACK: &str =
    "Sorry, that took longer than it should have. Could you say that again?";

pub(crate) struct Dispatcher {
    events: EventBroadcast,
    audio: Arc<AudioPlayer>,
    metrics: Arc<SessionMetrics>,
    dedup: DedupFilter,
    /// Accumulates streaming deltas until the finalized reply lands.
    transcript: String,
    processing_timeout: Duration,
    processing_cancel: Option<CancellationToken>,
}

impl Dispatcher {
    pub fn new(
        config: &SessionConfig,
        events: EventBroadcast,
        audio: Arc<AudioPlayer>,
        metrics: Arc<SessionMetrics>,
    ) -> Self {
        Self {
            events,
            audio,
            metrics,
            dedup: DedupFilter::new(config.dedup_window()),
            transcript: String::new(),
            processing_timeout: config.processing_timeout(),
            processing_cancel: None,
        }
    }

    /// Handle one raw inbound text frame.
    pub fn handle_raw(&mut self, text: &str) {
        match ServerFrame::from_json(text) {
            Ok(frame) => self.handle_frame(frame),
            Err(e) => {
                warn!("dropping unparseable frame: {}", e);
                self.metrics.record_malformed();
            }
        }
    }

    pub fn handle_frame(&mut self, frame: ServerFrame) {
        match frame {
            ServerFrame::Connected { session_id } => {
                info!(%session_id, "session established");
                self.emit(SessionEvent::Connected { session_id });
            }
            ServerFrame::StateChange { state } => {
                self.emit(SessionEvent::StateChange { state });
            }
            ServerFrame::TextDelta { text } => {
                self.transcript.push_str(&text);
                self.emit(SessionEvent::TextDelta { text });
            }
            ServerFrame::Transcription { text } => {
                self.emit(SessionEvent::Transcription { text });
            }
            ServerFrame::Processing { text } => {
                self.arm_processing_timeout();
                self.emit(SessionEvent::Processing { text });
            }
            ServerFrame::Response { text } => {
                self.cancel_processing_timeout();
                self.transcript.clear();
                let accepted = self.dedup.accept(&text, Instant::now());
                self.metrics.record_response(accepted);
                if accepted {
                    self.emit(SessionEvent::AssistantMessage {
                        text,
                        synthetic: false,
                    });
                } else {
                    debug!("duplicate reply suppressed");
                }
            }
            ServerFrame::AudioResponse { audio } => {
                if let Err(err) = self.audio.play(&audio) {
                    warn!(%err, "audio reply dropped");
                }
            }
            ServerFrame::TokenRefreshed => {
                debug!("token refresh acknowledged");
            }
            ServerFrame::FunctionCall {
                function,
                arguments,
            } => {
                self.emit(SessionEvent::FunctionCall {
                    function,
                    arguments,
                });
            }
            ServerFrame::Error { message } => {
                // An error resolves the interaction too; stop the fallback timer.
                self.cancel_processing_timeout();
                self.emit(SessionEvent::Error { message });
            }
            ServerFrame::Notice { message } => {
                self.emit(SessionEvent::Notice { message });
            }
            ServerFrame::ProactiveMessage { message, emotion } => {
                self.emit(SessionEvent::ProactiveMessage { message, emotion });
            }
            ServerFrame::IdleAnimation { emotion } => {
                self.emit(SessionEvent::IdleAnimation { emotion });
            }
        }
    }

    /// The accumulated streaming transcript since the last finalized reply.
    pub fn transcript(&self) -> &str {
        &self.transcript
    }

    /// Hard reset: transcript buffer, dedup record, pending fallback timer.
    pub fn reset(&mut self) {
        self.cancel_processing_timeout();
        self.transcript.clear();
        self.dedup.reset();
    }

    fn arm_processing_timeout(&mut self) {
        self.cancel_processing_timeout();
        let cancel = CancellationToken::new();
        self.processing_cancel = Some(cancel.clone());
        let events = self.events.clone();
        let timeout = self.processing_timeout;
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    warn!("reply never arrived; surfacing fallback message");
                    let _ = events.send(SessionEvent::AssistantMessage {
                        text: PROCESSING_FALLBACK.to_string(),
                        synthetic: true,
                    });
                }
            }
        });
    }

    fn cancel_processing_timeout(&mut self) {
        if let Some(cancel) = self.processing_cancel.take() {
            cancel.cancel();
        }
    }

    fn emit(&self, event: SessionEvent) {
        // No receivers is fine; observers may not have subscribed yet.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::create_event_broadcast;
    use tokio::sync::broadcast;

    fn dispatcher() -> (Dispatcher, broadcast::Receiver<SessionEvent>) {
        let config = SessionConfig::for_endpoint("wss://example.test/realtime");
        let events = create_event_broadcast();
        let rx = events.subscribe();
        let metrics = Arc::new(SessionMetrics::new());
        let audio = Arc::new(AudioPlayer::new(config.audio.clone(), metrics.clone()));
        (Dispatcher::new(&config, events, audio, metrics), rx)
    }

    fn drain(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn malformed_frames_are_dropped() {
        let (mut dispatcher, mut rx) = dispatcher();
        dispatcher.handle_raw("][ not json");
        dispatcher.handle_raw(r#"{"type":"mystery"}"#);
        assert!(drain(&mut rx).is_empty());
        assert_eq!(dispatcher.metrics.snapshot().frames_malformed, 2);
    }

    #[tokio::test]
    async fn deltas_accumulate_until_the_reply_lands() {
        let (mut dispatcher, mut rx) = dispatcher();
        dispatcher.handle_raw(r#"{"type":"text_delta","text":"Ho"}"#);
        dispatcher.handle_raw(r#"{"type":"text_delta","text":"la"}"#);
        assert_eq!(dispatcher.transcript(), "Hola");

        dispatcher.handle_raw(r#"{"type":"response","text":"Hola"}"#);
        assert_eq!(dispatcher.transcript(), "");

        let events = drain(&mut rx);
        assert!(matches!(
            events.last(),
            Some(SessionEvent::AssistantMessage { text, synthetic: false }) if text == "Hola"
        ));
    }

    #[tokio::test]
    async fn duplicate_reply_is_suppressed() {
        let (mut dispatcher, mut rx) = dispatcher();
        dispatcher.handle_frame(ServerFrame::Response {
            text: "Hola, ¿cómo estás?".into(),
        });
        drain(&mut rx);

        dispatcher.handle_frame(ServerFrame::Response {
            text: "hola, como estas".into(),
        });
        assert!(drain(&mut rx).is_empty());
        let snapshot = dispatcher.metrics.snapshot();
        assert_eq!(snapshot.responses_accepted, 1);
        assert_eq!(snapshot.responses_suppressed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn processing_timeout_surfaces_fallback() {
        let (mut dispatcher, mut rx) = dispatcher();
        dispatcher.handle_frame(ServerFrame::Processing {
            text: "thinking".into(),
        });
        drain(&mut rx);

        tokio::time::sleep(Duration::from_secs(31)).await;
        let events = drain(&mut rx);
        assert!(matches!(
            events.as_slice(),
            [SessionEvent::AssistantMessage { text, synthetic: true }] if text == PROCESSING_FALLBACK
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn reply_cancels_the_processing_timeout() {
        let (mut dispatcher, mut rx) = dispatcher();
        dispatcher.handle_frame(ServerFrame::Processing {
            text: "thinking".into(),
        });
        dispatcher.handle_frame(ServerFrame::Response {
            text: "aquí estoy".into(),
        });
        drain(&mut rx);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn undecodable_audio_is_reported_not_fatal() {
        let (mut dispatcher, mut rx) = dispatcher();
        dispatcher.handle_frame(ServerFrame::AudioResponse {
            audio: "!!!".into(),
        });
        assert!(drain(&mut rx).is_empty());
        assert_eq!(dispatcher.metrics.snapshot().audio_decode_failures, 1);
    }

    #[tokio::test]
    async fn connected_and_notice_frames_surface_as_events() {
        let (mut dispatcher, mut rx) = dispatcher();
        dispatcher.handle_raw(r#"{"type":"connected","sessionId":"s-9"}"#);
        dispatcher.handle_raw(r#"{"type":"notice","message":"maintenance soon"}"#);
        dispatcher.handle_raw(r#"{"type":"idle_animation","emotion":"sleepy"}"#);

        let events = drain(&mut rx);
        assert_eq!(events.len(), 3);
        assert!(matches!(
            &events[0],
            SessionEvent::Connected { session_id } if session_id == "s-9"
        ));
    }
}
