//! Session counters for diagnostics and tests.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Statistics for the session layer: wire traffic, queue behavior,
/// dedup decisions, and recovery activity.
#[derive(Debug, Default)]
pub struct SessionMetrics {
    /// Frames transmitted on a live connection
    pub frames_sent: AtomicU64,
    /// Frames buffered while no connection was open
    pub frames_queued: AtomicU64,
    /// Queued frames flushed after an open
    pub frames_flushed: AtomicU64,
    /// Queued frames dropped by the capacity cap
    pub frames_dropped: AtomicU64,
    /// Inbound frames that failed to parse (logged and dropped)
    pub frames_malformed: AtomicU64,
    /// Assistant replies accepted into the transcript
    pub responses_accepted: AtomicU64,
    /// Assistant replies suppressed as near-duplicates
    pub responses_suppressed: AtomicU64,
    /// Consecutive-failure reconnect attempts recorded at close
    pub reconnect_attempts: AtomicU64,
    /// Audio payloads that failed to decode
    pub audio_decode_failures: AtomicU64,
}

impl SessionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_queued(&self) {
        self.frames_queued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flushed(&self) {
        self.frames_flushed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self, count: u64) {
        self.frames_dropped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.frames_malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_response(&self, accepted: bool) {
        if accepted {
            self.responses_accepted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.responses_suppressed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_reconnect_attempt(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_audio_decode_failure(&self) {
        self.audio_decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_queued: self.frames_queued.load(Ordering::Relaxed),
            frames_flushed: self.frames_flushed.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            frames_malformed: self.frames_malformed.load(Ordering::Relaxed),
            responses_accepted: self.responses_accepted.load(Ordering::Relaxed),
            responses_suppressed: self.responses_suppressed.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            audio_decode_failures: self.audio_decode_failures.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of session metrics (for serialization/logging)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub frames_sent: u64,
    pub frames_queued: u64,
    pub frames_flushed: u64,
    pub frames_dropped: u64,
    pub frames_malformed: u64,
    pub responses_accepted: u64,
    pub responses_suppressed: u64,
    pub reconnect_attempts: u64,
    pub audio_decode_failures: u64,
}
