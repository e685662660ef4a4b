//! Gapless playback scheduling against a monotonic output clock.
//!
//! The scheduler owns the only mutable playback state in the engine: the
//! FIFO of scheduled items and the `next_start` clock baseline. Both are
//! guarded by a single `parking_lot::Mutex`, making `enqueue` and `stop`
//! mutually exclusive — two callers can never schedule items at the same
//! start time.
//!
//! The actual device is behind the [`PlaybackSink`] trait: production uses
//! `audio::output::CpalSink`, tests drive a fake with a hand-cranked clock.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::{error::Result, ipc::events::PlaybackEvent};

/// Broadcast capacity for playback events.
const PLAYBACK_EVENT_CAP: usize = 256;

/// A merged, decoded and optionally time-stretched buffer, owned by the
/// scheduler queue from enqueue until it finishes sounding or is dropped.
#[derive(Debug, Clone)]
pub struct PlayableBuffer {
    /// Mono f32 samples at `sample_rate`.
    pub samples: Vec<f32>,
    /// Output sample rate in Hz (24 kHz in the reference deployment).
    pub sample_rate: u32,
    /// The playback-rate multiplier this buffer was produced for.
    pub requested_rate: f32,
}

impl PlayableBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32, requested_rate: f32) -> Self {
        Self {
            samples,
            sample_rate,
            requested_rate,
        }
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Queue entry: when a buffer starts on the output clock and for how long.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackItem {
    pub scheduled_start: f64,
    pub duration_secs: f64,
}

impl PlaybackItem {
    pub fn end(&self) -> f64 {
        self.scheduled_start + self.duration_secs
    }
}

/// Lifecycle of the logical output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Nothing scheduled yet.
    Idle,
    /// Items queued, first one not yet reached by the clock.
    Scheduled,
    /// An item is currently audible.
    Sounding,
    /// All scheduled items have played out.
    Finished,
    /// Halted by `stop()` or a device failure.
    Stopped,
}

/// Destination for scheduled samples.
///
/// `write` appends to the device FIFO and must accept a whole buffer at
/// once; `clear` discards everything not yet delivered to the device;
/// `position_secs` is the monotonically increasing output clock (seconds of
/// audio actually consumed by the device).
pub trait PlaybackSink: Send {
    fn write(&mut self, samples: &[f32]) -> Result<()>;
    fn clear(&mut self);
    fn position_secs(&self) -> f64;
}

struct SchedulerInner {
    sink: Box<dyn PlaybackSink>,
    /// End time of the last scheduled item; 0.0 after a baseline reset.
    next_start: f64,
    items: VecDeque<PlaybackItem>,
    state: StreamState,
    seq: u64,
}

impl SchedulerInner {
    /// Drop items the clock has fully passed and refresh the stream state.
    fn retire(&mut self) {
        let now = self.sink.position_secs();
        while let Some(front) = self.items.front() {
            if front.end() <= now {
                self.items.pop_front();
            } else {
                break;
            }
        }

        self.state = match self.items.front() {
            Some(front) if front.scheduled_start <= now => StreamState::Sounding,
            Some(_) => StreamState::Scheduled,
            None => match self.state {
                StreamState::Sounding | StreamState::Scheduled => StreamState::Finished,
                other => other,
            },
        };
    }
}

/// Owns the output clock baseline and the FIFO of scheduled buffers.
pub struct PlaybackScheduler {
    inner: Mutex<SchedulerInner>,
    playback_tx: broadcast::Sender<PlaybackEvent>,
}

impl PlaybackScheduler {
    pub fn new(sink: Box<dyn PlaybackSink>) -> Self {
        let (playback_tx, _) = broadcast::channel(PLAYBACK_EVENT_CAP);
        Self {
            inner: Mutex::new(SchedulerInner {
                sink,
                next_start: 0.0,
                items: VecDeque::new(),
                state: StreamState::Idle,
                seq: 0,
            }),
            playback_tx,
        }
    }

    /// Schedule `buffer` to start exactly when the previous item ends, or
    /// immediately if the queue is empty and nothing is sounding. Returns
    /// the computed start time on the output clock.
    ///
    /// # Errors
    /// `LoquiError::PlaybackDevice` when the sink rejects the samples; the
    /// stream transitions to `Stopped` and the caller must reinitialize the
    /// device — no retry is attempted here.
    pub fn enqueue(&self, buffer: PlayableBuffer) -> Result<f64> {
        let mut inner = self.inner.lock();
        inner.retire();

        let now = inner.sink.position_secs();
        let start = if inner.next_start <= now {
            now
        } else {
            inner.next_start
        };
        let duration_secs = buffer.duration_secs();

        if let Err(e) = inner.sink.write(&buffer.samples) {
            warn!(error = %e, "playback sink rejected buffer");
            inner.state = StreamState::Stopped;
            return Err(e);
        }

        let item = PlaybackItem {
            scheduled_start: start,
            duration_secs,
        };
        inner.items.push_back(item);
        inner.next_start = item.end();
        inner.state = if start <= now {
            StreamState::Sounding
        } else {
            StreamState::Scheduled
        };

        inner.seq += 1;
        let event = PlaybackEvent {
            seq: inner.seq,
            scheduled_start: start,
            duration_secs,
            queue_len: inner.items.len(),
        };
        debug!(
            seq = event.seq,
            scheduled_start = start,
            duration_secs,
            queue_len = event.queue_len,
            rate = buffer.requested_rate,
            "buffer scheduled"
        );
        let _ = self.playback_tx.send(event);

        Ok(start)
    }

    /// Interruption primitive: halt the sounding item, discard everything
    /// queued and reset the scheduling baseline. The device stays open so
    /// the next turn can play immediately.
    pub fn stop(&self) {
        let mut inner = self.inner.lock();
        let dropped = inner.items.len();
        inner.sink.clear();
        inner.items.clear();
        inner.next_start = 0.0;
        inner.state = StreamState::Stopped;
        if dropped > 0 {
            info!(dropped_items = dropped, "playback stopped, queue cleared");
        }
    }

    /// Retire finished items and report the current stream state.
    pub fn poll(&self) -> StreamState {
        let mut inner = self.inner.lock();
        inner.retire();
        inner.state
    }

    /// Number of items queued or sounding.
    pub fn queue_len(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.retire();
        inner.items.len()
    }

    /// Snapshot of the scheduled items, front of the queue first.
    pub fn items(&self) -> Vec<PlaybackItem> {
        self.inner.lock().items.iter().copied().collect()
    }

    /// Subscribe to per-enqueue playback events.
    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.playback_tx.subscribe()
    }
}
