//! Outbound frame buffer for disconnected periods.

use kindred_protocol::ClientFrame;
use std::collections::VecDeque;
use tokio::time::Instant;
use tracing::warn;

/// One buffered outbound frame.
#[derive(Debug, Clone)]
pub struct QueuedFrame {
    pub payload: ClientFrame,
    pub enqueued_at: Instant,
}

/// Strict FIFO buffer of frames accumulated while no connection is open.
///
/// The connection manager drains the whole queue, in enqueue order, the
/// moment a connection opens. Capacity is capped; the oldest frame is
/// dropped past the cap so a long outage cannot grow the buffer unbounded.
#[derive(Debug)]
pub struct OutboundQueue {
    frames: VecDeque<QueuedFrame>,
    cap: usize,
}

impl OutboundQueue {
    pub fn new(cap: usize) -> Self {
        Self {
            frames: VecDeque::new(),
            cap: cap.max(1),
        }
    }

    /// Append a frame. Returns the number of frames evicted by the cap.
    pub fn push(&mut self, payload: ClientFrame, now: Instant) -> u64 {
        self.frames.push_back(QueuedFrame {
            payload,
            enqueued_at: now,
        });
        let mut evicted = 0;
        while self.frames.len() > self.cap {
            self.frames.pop_front();
            evicted += 1;
        }
        if evicted > 0 {
            warn!(evicted, cap = self.cap, "outbound queue over capacity");
        }
        evicted
    }

    /// Take every buffered frame, oldest first, leaving the queue empty.
    pub fn drain(&mut self) -> Vec<QueuedFrame> {
        self.frames.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}
