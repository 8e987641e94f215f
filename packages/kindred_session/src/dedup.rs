//! Near-duplicate suppression for finalized assistant replies.
//!
//! The backend occasionally re-emits a reply it already delivered (stream
//! finalization racing a full response). The filter compares normalized
//! text against the previously accepted reply inside a short window.

use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// The most recent assistant reply accepted into the transcript.
#[derive(Debug, Clone)]
struct DedupRecord {
    normalized: String,
    accepted_at: Instant,
}

/// Decides whether an incoming assistant reply is genuine or a redundant echo.
///
/// A candidate is suppressed iff it arrives within the window of the last
/// accepted reply AND the normalized texts are equal or one contains the
/// other. Containment, not edit distance: two unrelated short replies where
/// one happens to contain the other are suppressed too — a known false
/// positive of the reference heuristic, kept for compatibility.
#[derive(Debug)]
pub struct DedupFilter {
    window: Duration,
    last: Option<DedupRecord>,
}

impl DedupFilter {
    pub fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    /// Returns true if the reply should be accepted into the transcript.
    /// Accepting updates the record; suppression leaves it untouched.
    pub fn accept(&mut self, text: &str, now: Instant) -> bool {
        let normalized = normalize_reply(text);
        if let Some(prev) = &self.last {
            let within_window = now.duration_since(prev.accepted_at) < self.window;
            let similar = normalized == prev.normalized
                || normalized.contains(prev.normalized.as_str())
                || prev.normalized.contains(normalized.as_str());
            if within_window && similar {
                debug!(reply = %text, "suppressing near-duplicate reply");
                return false;
            }
        }
        self.last = Some(DedupRecord {
            normalized,
            accepted_at: now,
        });
        true
    }

    /// Forget the previous reply (hard session reset).
    pub fn reset(&mut self) {
        self.last = None;
    }
}

/// Normalize a reply for comparison: lowercase, fold Latin diacritics,
/// drop punctuation, collapse whitespace runs to single spaces.
pub fn normalize_reply(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;
    for c in text.chars() {
        if c.is_whitespace() {
            pending_space = !out.is_empty();
            continue;
        }
        for lower in c.to_lowercase() {
            let folded = fold_latin(lower);
            if !folded.is_alphanumeric() {
                continue;
            }
            if pending_space {
                out.push(' ');
                pending_space = false;
            }
            out.push(folded);
        }
    }
    out
}

/// Strip the accents the companion's languages actually produce.
fn fold_latin(c: char) -> char {
    match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => 'a',
        'è' | 'é' | 'ê' | 'ë' => 'e',
        'ì' | 'í' | 'î' | 'ï' => 'i',
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' => 'o',
        'ù' | 'ú' | 'û' | 'ü' => 'u',
        'ñ' => 'n',
        'ç' => 'c',
        'ý' | 'ÿ' => 'y',
        other => other,
    }
}
