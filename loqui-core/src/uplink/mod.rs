//! Blocking uplink loop: capture ring → resample → PCM16 → transport.
//!
//! ```text
//! 1. Drain the capture ring (one block per iteration)
//! 2. Resample to the transport rate (16 kHz in the reference deployment)
//! 3. Slice into fixed-size frames, encode each as little-endian PCM16
//! 4. Fire-and-forget send; a disconnected transport drops audio silently
//! ```
//!
//! The loop runs inside `spawn_blocking` so the Tokio executor stays free
//! for the downlink task. Shutdown drains the ring and flushes a final
//! partial frame before returning.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::{
    audio::resample::RateConverter,
    buffering::{chunk::PcmChunk, chunk::SampleFrame, AudioConsumer, Consumer},
    codec::encode_pcm16,
    error::{LoquiError, Result},
};

/// Samples drained from the capture ring per iteration (20 ms at 48 kHz).
const DRAIN_CHUNK: usize = 960;

/// Sleep when the ring is empty, to avoid spinning a core.
const SLEEP_EMPTY_MS: u64 = 5;

/// Destination for encoded capture frames.
///
/// `send_chunk` must not block for long; implementations are expected to
/// hand the chunk to an async writer or an in-process queue. Returning
/// `LoquiError::TransportUnavailable` means "not connected right now" and
/// is treated as a silent drop, matching live-conversation semantics where
/// stale microphone audio is worthless.
pub trait OutboundTransport: Send + Sync + 'static {
    fn send_chunk(&self, chunk: PcmChunk) -> Result<()>;
}

/// Shared uplink counters for observability.
#[derive(Default)]
pub struct UplinkStats {
    pub samples_in: AtomicUsize,
    pub chunks_sent: AtomicUsize,
    pub chunks_dropped: AtomicUsize,
    pub send_errors: AtomicUsize,
}

impl UplinkStats {
    pub fn reset(&self) {
        self.samples_in.store(0, Ordering::Relaxed);
        self.chunks_sent.store(0, Ordering::Relaxed);
        self.chunks_dropped.store(0, Ordering::Relaxed);
        self.send_errors.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> UplinkSnapshot {
        UplinkSnapshot {
            samples_in: self.samples_in.load(Ordering::Relaxed),
            chunks_sent: self.chunks_sent.load(Ordering::Relaxed),
            chunks_dropped: self.chunks_dropped.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct UplinkSnapshot {
    pub samples_in: usize,
    pub chunks_sent: usize,
    pub chunks_dropped: usize,
    pub send_errors: usize,
}

/// Everything the uplink loop needs, bundled so the spawn closure stays tidy.
pub struct UplinkContext {
    pub consumer: AudioConsumer,
    pub transport: Arc<dyn OutboundTransport>,
    pub running: Arc<AtomicBool>,
    /// Rate the capture device actually delivers (Hz).
    pub capture_sample_rate: u32,
    /// Rate the transport expects (Hz).
    pub target_sample_rate: u32,
    /// Samples per encoded frame, at `target_sample_rate`.
    pub frame_size: usize,
    pub stats: Arc<UplinkStats>,
}

/// Run the blocking uplink loop until `running` clears and the ring drains.
pub fn run(mut ctx: UplinkContext) {
    info!(
        capture_rate = ctx.capture_sample_rate,
        target_rate = ctx.target_sample_rate,
        frame_size = ctx.frame_size,
        "uplink started"
    );

    let mut resampler = match RateConverter::new(
        ctx.capture_sample_rate,
        ctx.target_sample_rate,
        DRAIN_CHUNK,
    ) {
        Ok(r) => r,
        Err(e) => {
            error!("failed to create uplink resampler: {e}");
            return;
        }
    };

    let mut raw = vec![0f32; DRAIN_CHUNK];
    // Resampled samples awaiting a full frame.
    let mut pending: Vec<f32> = Vec::with_capacity(ctx.frame_size * 2);

    loop {
        let n = ctx.consumer.pop_slice(&mut raw);
        if n == 0 {
            // Ring drained: only now is shutdown honoured, so no captured
            // audio is lost on stop.
            if !ctx.running.load(Ordering::Relaxed) {
                break;
            }
            std::thread::sleep(Duration::from_millis(SLEEP_EMPTY_MS));
            continue;
        }
        ctx.stats.samples_in.fetch_add(n, Ordering::Relaxed);

        pending.extend(resampler.process(&raw[..n]));

        while pending.len() >= ctx.frame_size {
            let frame: Vec<f32> = pending.drain(..ctx.frame_size).collect();
            dispatch(&ctx, frame);
        }
    }

    // Flush the partial tail so the last words of a turn are not cut off.
    if !pending.is_empty() {
        let tail = std::mem::take(&mut pending);
        debug!(samples = tail.len(), "flushing partial uplink frame");
        dispatch(&ctx, tail);
    }

    info!("uplink stopped");
}

fn dispatch(ctx: &UplinkContext, samples: Vec<f32>) {
    let frame = SampleFrame::mono(samples, ctx.target_sample_rate);
    let chunk = encode_pcm16(&frame);
    match ctx.transport.send_chunk(chunk) {
        Ok(()) => {
            ctx.stats.chunks_sent.fetch_add(1, Ordering::Relaxed);
        }
        Err(LoquiError::TransportUnavailable) => {
            // Fire-and-forget: stale microphone audio is not worth buffering.
            ctx.stats.chunks_dropped.fetch_add(1, Ordering::Relaxed);
            debug!("transport unavailable, capture frame dropped");
        }
        Err(e) => {
            ctx.stats.send_errors.fetch_add(1, Ordering::Relaxed);
            warn!(error = %e, "uplink send failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use parking_lot::Mutex;

    use crate::buffering::{create_capture_ring, Producer};

    struct RecordingTransport {
        chunks: Mutex<Vec<PcmChunk>>,
        reject: bool,
    }

    impl RecordingTransport {
        fn new(reject: bool) -> Arc<Self> {
            Arc::new(Self {
                chunks: Mutex::new(Vec::new()),
                reject,
            })
        }
    }

    impl OutboundTransport for RecordingTransport {
        fn send_chunk(&self, chunk: PcmChunk) -> Result<()> {
            if self.reject {
                return Err(LoquiError::TransportUnavailable);
            }
            self.chunks.lock().push(chunk);
            Ok(())
        }
    }

    fn context(
        consumer: AudioConsumer,
        transport: Arc<RecordingTransport>,
        stats: Arc<UplinkStats>,
    ) -> UplinkContext {
        UplinkContext {
            consumer,
            transport,
            running: Arc::new(AtomicBool::new(false)), // drain-and-exit
            capture_sample_rate: 16_000,
            target_sample_rate: 16_000,
            frame_size: 4_096,
            stats,
        }
    }

    #[test]
    fn slices_captured_audio_into_full_frames_plus_tail() {
        let (mut producer, consumer) = create_capture_ring();
        let samples: Vec<f32> = (0..9_000).map(|i| (i as f32 / 9_000.0) - 0.5).collect();
        assert_eq!(producer.push_slice(&samples), samples.len());

        let transport = RecordingTransport::new(false);
        let stats = Arc::new(UplinkStats::default());
        run(context(consumer, Arc::clone(&transport), Arc::clone(&stats)));

        let chunks = transport.chunks.lock();
        assert_eq!(chunks.len(), 3, "two full frames and one tail");
        assert_eq!(chunks[0].frame_count(), 4_096);
        assert_eq!(chunks[1].frame_count(), 4_096);
        assert_eq!(chunks[2].frame_count(), 9_000 - 2 * 4_096);
        assert!(chunks.iter().all(|c| c.sample_rate == 16_000));

        let snap = stats.snapshot();
        assert_eq!(snap.samples_in, 9_000);
        assert_eq!(snap.chunks_sent, 3);
        assert_eq!(snap.chunks_dropped, 0);
    }

    #[test]
    fn disconnected_transport_drops_silently() {
        let (mut producer, consumer) = create_capture_ring();
        assert_eq!(producer.push_slice(&vec![0.1f32; 4_096]), 4_096);

        let transport = RecordingTransport::new(true);
        let stats = Arc::new(UplinkStats::default());
        run(context(consumer, Arc::clone(&transport), Arc::clone(&stats)));

        assert!(transport.chunks.lock().is_empty());
        let snap = stats.snapshot();
        assert_eq!(snap.chunks_dropped, 1);
        assert_eq!(snap.chunks_sent, 0);
        assert_eq!(snap.send_errors, 0);
    }

    #[test]
    fn empty_ring_sends_nothing() {
        let (_producer, consumer) = create_capture_ring();
        let transport = RecordingTransport::new(false);
        let stats = Arc::new(UplinkStats::default());
        run(context(consumer, Arc::clone(&transport), Arc::clone(&stats)));

        assert!(transport.chunks.lock().is_empty());
        assert_eq!(stats.snapshot().samples_in, 0);
    }
}
