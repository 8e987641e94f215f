//! Kindred wire protocol - frame types for the realtime session.
//!
//! This crate defines the typed messages exchanged over the companion
//! WebSocket, in both directions, and nothing else. It carries no
//! connection state; encoding and decoding are plain serde round trips
//! so the session layer can treat the wire as `String` in / `String` out.

mod frames;

pub use frames::{ClientFrame, ServerFrame};
