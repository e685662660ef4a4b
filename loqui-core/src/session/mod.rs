//! `VoiceSession` — top-level lifecycle controller.
//!
//! ## Lifecycle
//!
//! ```text
//! VoiceSession::new()
//!     └─► start()   → mic open, uplink + downlink spawned, status = Live
//!         └─► stop() → running=false, playback halted, status = Stopped
//! ```
//!
//! `start()`/`stop()` are guarded: calling them in the wrong state returns
//! an error rather than panicking.
//!
//! ## Threading
//!
//! `cpal::Stream` is `!Send` on Windows/macOS, so the capture stream is
//! opened *inside* the `spawn_blocking` closure that runs the uplink loop
//! and never crosses a thread boundary. A sync oneshot channel propagates
//! open-device errors back to the `start()` caller. The downlink runs as an
//! ordinary async task.

pub mod downlink;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tracing::info;

use crate::{
    audio::{output::CpalSink, AudioCapture},
    buffering::create_capture_ring,
    error::{LoquiError, Result},
    ipc::events::{PlaybackEvent, SessionStatus, SessionStatusEvent},
    playback::{PlaybackScheduler, PlaybackSink},
    stretch::TimeStretcher,
    turn::{BatchTuning, FlushPolicy, TurnAccumulator},
    uplink::{self, OutboundTransport, UplinkSnapshot, UplinkStats},
};

pub use downlink::InboundEvent;

/// Broadcast capacity for status events.
const STATUS_EVENT_CAP: usize = 256;

/// Inbound event channel depth. At ~100 ms of audio per chunk this buffers
/// several seconds of model speech before the transport reader backs off.
const INBOUND_CHANNEL_CAP: usize = 256;

/// Supported playback-rate range. Values outside are rejected, matching the
/// stretch engine's useful operating window.
pub const SPEECH_RATE_MIN: f32 = 0.5;
pub const SPEECH_RATE_MAX: f32 = 2.0;

/// Configuration for [`VoiceSession`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Initial playback-rate multiplier in `[0.5, 2.0]`. Default: 1.0.
    pub speech_rate: f32,
    /// How inbound turns are flushed to the scheduler.
    pub flush_policy: FlushPolicy,
    /// Mini-batch thresholds (ignored under `OnTurnComplete`).
    pub batch: BatchTuning,
    /// Samples per encoded uplink frame. Default: 4096.
    pub capture_frame_size: usize,
    /// Rate the transport expects for microphone audio (Hz). Default: 16000.
    pub input_sample_rate: u32,
    /// Rate of model speech and the playback device (Hz). Default: 24000.
    pub output_sample_rate: u32,
    /// Preferred capture device name; `None` uses the system default.
    pub preferred_input_device: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            speech_rate: 1.0,
            flush_policy: FlushPolicy::MiniBatch,
            batch: BatchTuning::default(),
            capture_frame_size: 4_096,
            input_sample_rate: 16_000,
            output_sample_rate: 24_000,
            preferred_input_device: None,
        }
    }
}

/// The top-level session handle.
///
/// `Send + Sync` — all fields use interior mutability. Wrap in an `Arc` to
/// share between the embedding application and event-forwarding tasks.
pub struct VoiceSession {
    config: SessionConfig,
    running: Arc<AtomicBool>,
    status: Arc<Mutex<SessionStatus>>,
    status_tx: broadcast::Sender<SessionStatusEvent>,
    /// Live playback rate, shared with the downlink task.
    speech_rate: Arc<Mutex<f32>>,
    /// Present while running (and until the next `start`).
    scheduler: Mutex<Option<Arc<PlaybackScheduler>>>,
    uplink_stats: Arc<UplinkStats>,
}

impl VoiceSession {
    /// Create a session. Does not touch any device — call `start()`.
    ///
    /// # Errors
    /// `LoquiError::InvalidRate` when `config.speech_rate` is out of range.
    pub fn new(config: SessionConfig) -> Result<Self> {
        validate_rate(config.speech_rate)?;
        let (status_tx, _) = broadcast::channel(STATUS_EVENT_CAP);
        let speech_rate = Arc::new(Mutex::new(config.speech_rate));

        Ok(Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
            status: Arc::new(Mutex::new(SessionStatus::Idle)),
            status_tx,
            speech_rate,
            scheduler: Mutex::new(None),
            uplink_stats: Arc::new(UplinkStats::default()),
        })
    }

    /// Start capture, uplink and downlink against the default output device.
    ///
    /// Blocks until the microphone is confirmed open, then returns while the
    /// pipelines run in the background. Must be called within a Tokio
    /// runtime. Returns the channel on which the transport integration
    /// should deliver inbound events.
    ///
    /// # Errors
    /// - `LoquiError::AlreadyRunning` if already started.
    /// - Device errors from capture or playback open.
    pub fn start(
        &self,
        transport: Arc<dyn OutboundTransport>,
    ) -> Result<mpsc::Sender<InboundEvent>> {
        let sink = CpalSink::open(self.config.output_sample_rate)?;
        self.start_with_sink(transport, Box::new(sink))
    }

    /// `start()` with a caller-supplied playback sink. Lets embedders route
    /// output elsewhere and keeps the session testable without a device.
    pub fn start_with_sink(
        &self,
        transport: Arc<dyn OutboundTransport>,
        sink: Box<dyn PlaybackSink>,
    ) -> Result<mpsc::Sender<InboundEvent>> {
        if self.running.load(Ordering::SeqCst) {
            return Err(LoquiError::AlreadyRunning);
        }

        self.uplink_stats.reset();
        self.running.store(true, Ordering::SeqCst);

        let scheduler = Arc::new(PlaybackScheduler::new(sink));
        *self.scheduler.lock() = Some(Arc::clone(&scheduler));

        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CHANNEL_CAP);

        // ── Uplink: capture device + blocking encode loop ────────────────
        let (capture_producer, capture_consumer) = create_capture_ring();
        let running = Arc::clone(&self.running);
        let stats = Arc::clone(&self.uplink_stats);
        let config = self.config.clone();
        let preferred = self.config.preferred_input_device.clone();

        // Sync oneshot: uplink thread signals device open success/failure.
        let (open_tx, open_rx) = std::sync::mpsc::channel::<Result<u32>>();

        tokio::task::spawn_blocking(move || {
            // Must happen on THIS thread — cpal::Stream is !Send.
            let capture = match AudioCapture::open_with_preference(
                capture_producer,
                Arc::clone(&running),
                preferred.as_deref(),
            ) {
                Ok(c) => {
                    let _ = open_tx.send(Ok(c.sample_rate));
                    c
                }
                Err(e) => {
                    let _ = open_tx.send(Err(e));
                    running.store(false, Ordering::SeqCst);
                    return;
                }
            };
            let capture_sample_rate = capture.sample_rate;

            uplink::run(uplink::UplinkContext {
                consumer: capture_consumer,
                transport,
                running,
                capture_sample_rate,
                target_sample_rate: config.input_sample_rate,
                frame_size: config.capture_frame_size,
                stats,
            });

            // Stream drops here, releasing the device on this thread.
            drop(capture);
        });

        match open_rx.recv() {
            Ok(Ok(rate)) => {
                info!(capture_rate = rate, "session started");
            }
            Ok(Err(e)) => {
                self.abort_start(&e);
                return Err(e);
            }
            Err(_) => {
                // Channel closed without a message — the blocking task died.
                let e = LoquiError::Other(anyhow::anyhow!("uplink task died during start"));
                self.abort_start(&e);
                return Err(e);
            }
        }

        // ── Downlink: async turn/stretch/schedule task ───────────────────
        let rate = *self.speech_rate.lock();
        tokio::spawn(downlink::run(downlink::DownlinkContext {
            inbound_rx,
            accumulator: TurnAccumulator::new(self.config.flush_policy, self.config.batch, rate),
            stretcher: TimeStretcher::new(),
            scheduler,
            speech_rate: Arc::clone(&self.speech_rate),
            running: Arc::clone(&self.running),
            status: Arc::clone(&self.status),
            status_tx: self.status_tx.clone(),
        }));

        self.set_status(SessionStatus::Live, None);
        Ok(inbound_tx)
    }

    /// Stop capture and playback. The uplink drains buffered microphone
    /// audio before its thread exits.
    ///
    /// # Errors
    /// `LoquiError::NotRunning` if not currently running.
    pub fn stop(&self) -> Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(LoquiError::NotRunning);
        }

        self.running.store(false, Ordering::SeqCst);
        if let Some(scheduler) = self.scheduler.lock().as_ref() {
            scheduler.stop();
        }
        self.set_status(SessionStatus::Stopped, None);
        info!("session stop requested");
        Ok(())
    }

    /// Change the playback rate for subsequently flushed groups.
    ///
    /// # Errors
    /// `LoquiError::InvalidRate` for values outside `[0.5, 2.0]`.
    pub fn set_speech_rate(&self, rate: f32) -> Result<()> {
        validate_rate(rate)?;
        *self.speech_rate.lock() = rate;
        Ok(())
    }

    pub fn speech_rate(&self) -> f32 {
        *self.speech_rate.lock()
    }

    /// Current session status (snapshot).
    pub fn status(&self) -> SessionStatus {
        *self.status.lock()
    }

    /// Subscribe to status change events.
    pub fn subscribe_status(&self) -> broadcast::Receiver<SessionStatusEvent> {
        self.status_tx.subscribe()
    }

    /// Subscribe to per-buffer playback events.
    ///
    /// # Errors
    /// `LoquiError::NotRunning` before the first `start()`.
    pub fn subscribe_playback(&self) -> Result<broadcast::Receiver<PlaybackEvent>> {
        self.scheduler
            .lock()
            .as_ref()
            .map(|s| s.subscribe())
            .ok_or(LoquiError::NotRunning)
    }

    /// Snapshot of uplink counters for observability.
    pub fn uplink_stats(&self) -> UplinkSnapshot {
        self.uplink_stats.snapshot()
    }

    fn abort_start(&self, error: &LoquiError) {
        self.running.store(false, Ordering::SeqCst);
        *self.scheduler.lock() = None;
        self.set_status(SessionStatus::Error, Some(error.to_string()));
    }

    fn set_status(&self, new_status: SessionStatus, detail: Option<String>) {
        *self.status.lock() = new_status;
        let _ = self.status_tx.send(SessionStatusEvent {
            status: new_status,
            detail,
        });
    }
}

fn validate_rate(rate: f32) -> Result<()> {
    if !rate.is_finite() || !(SPEECH_RATE_MIN..=SPEECH_RATE_MAX).contains(&rate) {
        return Err(LoquiError::InvalidRate(rate));
    }
    Ok(())
}
