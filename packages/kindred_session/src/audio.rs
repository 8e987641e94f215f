//! Assistant speech playback.
//!
//! A dedicated thread owns the output device; requests arrive over a
//! channel. At most one playback is live — a new payload stops and
//! supersedes whatever is still playing. While local capture is active the
//! output is ducked, not muted, so the reply stays audible without being
//! re-captured as input.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rodio::{Decoder, OutputStream, Sink};
use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::config::AudioConfig;
use crate::error::SessionError;
use crate::metrics::SessionMetrics;

/// How often the playback thread re-applies gain and reaps finished sinks.
const PLAYBACK_TICK: Duration = Duration::from_millis(50);

/// Output gain as a pure function of the capture flag. Both call sites
/// (playback start and the periodic tick) derive gain from here so capture
/// toggles take effect mid-playback.
pub fn playback_gain(capture_active: bool, gain: f32, duck_gain: f32) -> f32 {
    if capture_active { duck_gain } else { gain }
}

/// Decode a transported base64 audio payload into raw container bytes.
pub fn decode_payload(payload: &str) -> Result<Vec<u8>, SessionError> {
    BASE64
        .decode(payload.trim())
        .map_err(|e| SessionError::AudioDecode(format!("invalid base64: {e}")))
}

fn open_decoder(bytes: Vec<u8>) -> Result<Decoder<Cursor<Vec<u8>>>, SessionError> {
    Decoder::new(Cursor::new(bytes)).map_err(|e| SessionError::AudioDecode(e.to_string()))
}

/// The slice of sink behavior the single-flight bookkeeping needs.
trait PlaybackSink {
    fn stop(&self);
    fn is_finished(&self) -> bool;
    fn set_gain(&self, gain: f32);
}

impl PlaybackSink for Sink {
    fn stop(&self) {
        Sink::stop(self)
    }

    fn is_finished(&self) -> bool {
        self.empty()
    }

    fn set_gain(&self, gain: f32) {
        self.set_volume(gain)
    }
}

/// At most one live playback node at any instant.
struct SingleFlight<S> {
    current: Option<S>,
}

impl<S: PlaybackSink> SingleFlight<S> {
    fn new() -> Self {
        Self { current: None }
    }

    /// Start a playback, stopping whatever is still in flight.
    fn begin(&mut self, sink: S) {
        if let Some(prev) = self.current.take() {
            prev.stop();
        }
        self.current = Some(sink);
    }

    /// Re-apply gain and reap a finished playback.
    /// Returns true while a playback is still live.
    fn tick(&mut self, gain: f32) -> bool {
        if let Some(sink) = &self.current {
            sink.set_gain(gain);
            if sink.is_finished() {
                self.current = None;
            }
        }
        self.current.is_some()
    }

    fn stop(&mut self) {
        if let Some(prev) = self.current.take() {
            prev.stop();
        }
    }

    fn active(&self) -> bool {
        self.current.is_some()
    }
}

/// Handle to the playback thread.
pub struct AudioPlayer {
    tx: mpsc::Sender<Vec<u8>>,
    capture_active: Arc<AtomicBool>,
    speaking_rx: watch::Receiver<bool>,
    metrics: Arc<SessionMetrics>,
}

impl AudioPlayer {
    pub fn new(config: AudioConfig, metrics: Arc<SessionMetrics>) -> Self {
        let (tx, rx) = mpsc::channel::<Vec<u8>>();
        let (speaking_tx, speaking_rx) = watch::channel(false);
        let capture_active = Arc::new(AtomicBool::new(false));

        let capture_flag = capture_active.clone();
        let thread_metrics = metrics.clone();
        thread::spawn(move || {
            run_playback_loop(rx, speaking_tx, capture_flag, config, thread_metrics);
        });

        Self {
            tx,
            capture_active,
            speaking_rx,
            metrics,
        }
    }

    /// Queue a base64 payload for playback, superseding any playback in
    /// flight. Invalid base64 is rejected here; container/codec problems
    /// surface on the playback thread. Both leave the engine idle.
    pub fn play(&self, payload: &str) -> Result<(), SessionError> {
        let bytes = match decode_payload(payload) {
            Ok(bytes) => bytes,
            Err(err) => {
                self.metrics.record_audio_decode_failure();
                return Err(err);
            }
        };
        self.tx
            .send(bytes)
            .map_err(|_| SessionError::Other(anyhow::anyhow!("audio playback thread is gone")))
    }

    /// Flip the capture flag; gain follows on the next playback tick.
    pub fn set_capture_active(&self, active: bool) {
        self.capture_active.store(active, Ordering::Relaxed);
    }

    pub fn capture_active(&self) -> bool {
        self.capture_active.load(Ordering::Relaxed)
    }

    /// True while a reply is audibly playing.
    pub fn speaking(&self) -> watch::Receiver<bool> {
        self.speaking_rx.clone()
    }

    pub fn is_speaking(&self) -> bool {
        *self.speaking_rx.borrow()
    }
}

fn run_playback_loop(
    rx: mpsc::Receiver<Vec<u8>>,
    speaking_tx: watch::Sender<bool>,
    capture_active: Arc<AtomicBool>,
    config: AudioConfig,
    metrics: Arc<SessionMetrics>,
) {
    let mut output = OutputStream::try_default().ok();
    if output.is_none() {
        warn!("audio output unavailable; replies will be silent until a device appears");
    }
    let mut playing: SingleFlight<Sink> = SingleFlight::new();

    loop {
        let gain = playback_gain(
            capture_active.load(Ordering::Relaxed),
            config.gain,
            config.duck_gain,
        );
        match rx.recv_timeout(PLAYBACK_TICK) {
            Ok(bytes) => {
                playing.stop();
                if output.is_none() {
                    output = OutputStream::try_default().ok();
                }
                let Some((_, handle)) = output.as_ref() else {
                    let _ = speaking_tx.send(false);
                    continue;
                };
                let source = match open_decoder(bytes) {
                    Ok(source) => source,
                    Err(err) => {
                        warn!(%err, "dropping undecodable audio payload");
                        metrics.record_audio_decode_failure();
                        let _ = speaking_tx.send(false);
                        continue;
                    }
                };
                let sink = match Sink::try_new(handle) {
                    Ok(sink) => sink,
                    Err(err) => {
                        warn!(?err, "failed to open playback sink");
                        let _ = speaking_tx.send(false);
                        continue;
                    }
                };
                sink.set_volume(gain);
                sink.append(source);
                playing.begin(sink);
                debug!("playback started");
                let _ = speaking_tx.send(true);
            }
            Err(RecvTimeoutError::Timeout) => {
                if playing.active() && !playing.tick(gain) {
                    debug!("playback finished");
                    let _ = speaking_tx.send(false);
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}
