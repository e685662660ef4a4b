//! Event types emitted to an embedding UI layer.
//!
//! | Event | Channel |
//! |-------|---------|
//! | `SessionStatusEvent` | `"loqui://status"` |
//! | `PlaybackEvent` | `"loqui://playback"` |

use serde::{Deserialize, Serialize};

/// Emitted on channel `"loqui://status"` when the session state changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusEvent {
    pub status: SessionStatus,
    /// Optional human-readable detail (e.g. error message).
    pub detail: Option<String>,
}

/// Current state of a voice session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Session created but `start()` not yet called.
    Idle,
    /// Capturing, uplinking and playing back.
    Live,
    /// Streams torn down; session may be restarted.
    Stopped,
    /// Unrecoverable error — restart required.
    Error,
}

/// Emitted on channel `"loqui://playback"` each time a buffer is scheduled.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    /// Output-clock time at which the buffer starts sounding, in seconds.
    pub scheduled_start: f64,
    /// Buffer duration after any time-stretching, in seconds.
    pub duration_secs: f64,
    /// Queue depth including the newly scheduled buffer.
    pub queue_len: usize,
}
