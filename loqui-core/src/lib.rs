//! # loqui-core
//!
//! Real-time audio streaming engine for live voice conversation.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → AudioCapture → SPSC RingBuffer → Uplink(spawn_blocking)
//!                                                   │ resample → PCM16
//!                                                   ▼
//!                                           OutboundTransport
//!
//! InboundEvent ─► Downlink(async task) ─► TurnAccumulator
//!                                              │ flush group
//!                                     merge → decode → TimeStretcher
//!                                              │
//!                                      PlaybackScheduler ─► PlaybackSink
//! ```
//!
//! Both audio callbacks are zero-alloc in steady state. All heap work
//! happens on the uplink thread and the downlink task.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod codec;
pub mod error;
pub mod ipc;
pub mod playback;
pub mod session;
pub mod stretch;
pub mod turn;
pub mod uplink;

// Convenience re-exports for downstream crates
pub use buffering::chunk::{PcmChunk, SampleFrame};
pub use error::LoquiError;
pub use ipc::events::{PlaybackEvent, SessionStatus, SessionStatusEvent};
pub use playback::{PlaybackScheduler, PlaybackSink, PlayableBuffer};
pub use session::{InboundEvent, SessionConfig, VoiceSession};
pub use stretch::TimeStretcher;
pub use turn::{BatchTuning, FlushPolicy, TurnAccumulator};
pub use uplink::OutboundTransport;
