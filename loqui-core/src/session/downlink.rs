//! Async downlink task: inbound model audio → turns → stretch → scheduler.
//!
//! One `tokio::select!` loop multiplexes three wake sources: an inbound
//! event, the accumulator's debounce deadline, and a coarse poll tick that
//! notices session shutdown. All turn policy lives in
//! [`TurnAccumulator`](crate::turn::TurnAccumulator); this task only drives
//! time into it and moves flushed groups through decode → stretch → enqueue.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::{
    buffering::chunk::PcmChunk,
    codec::{decode_pcm16, merge_chunks},
    ipc::events::{SessionStatus, SessionStatusEvent},
    playback::{PlaybackScheduler, PlayableBuffer},
    stretch::TimeStretcher,
    turn::TurnAccumulator,
};

/// Transport-side events feeding the downlink.
#[derive(Debug, Clone)]
pub enum InboundEvent {
    /// One PCM16 audio chunk of model speech.
    Audio(PcmChunk),
    /// The model finished its utterance; flush and close the open turn.
    TurnComplete,
    /// The user barged in; halt playback and discard buffered audio.
    Interrupted,
}

/// Poll interval used when no debounce deadline is armed, so shutdown is
/// noticed even if the inbound channel stays silent.
const IDLE_POLL: Duration = Duration::from_millis(100);

/// Rates closer to 1.0 than this skip the stretch engine entirely.
const UNITY_RATE_EPSILON: f32 = 1e-3;

pub struct DownlinkContext {
    pub inbound_rx: mpsc::Receiver<InboundEvent>,
    pub accumulator: TurnAccumulator,
    pub stretcher: TimeStretcher,
    pub scheduler: Arc<PlaybackScheduler>,
    /// Live playback-rate setting, shared with the session handle.
    pub speech_rate: Arc<Mutex<f32>>,
    pub running: Arc<AtomicBool>,
    pub status: Arc<Mutex<SessionStatus>>,
    pub status_tx: broadcast::Sender<SessionStatusEvent>,
}

/// Run the downlink until the session stops or the inbound channel closes.
pub async fn run(mut ctx: DownlinkContext) {
    info!("downlink started");
    let mut current_rate = *ctx.speech_rate.lock();

    loop {
        if !ctx.running.load(Ordering::Relaxed) {
            break;
        }

        // Pick up live rate changes between groups; the in-flight group is
        // unaffected.
        let rate = *ctx.speech_rate.lock();
        if rate != current_rate {
            debug!(old = current_rate, new = rate, "speech rate changed");
            ctx.accumulator.set_speech_rate(rate);
            current_rate = rate;
        }

        let deadline = ctx.accumulator.deadline();
        tokio::select! {
            event = ctx.inbound_rx.recv() => match event {
                Some(InboundEvent::Audio(chunk)) => {
                    if let Some(group) = ctx.accumulator.push(chunk, Instant::now()) {
                        play_group(&mut ctx, group, current_rate);
                    }
                }
                Some(InboundEvent::TurnComplete) => {
                    if let Some(group) = ctx.accumulator.turn_complete(Instant::now()) {
                        play_group(&mut ctx, group, current_rate);
                    }
                }
                Some(InboundEvent::Interrupted) => {
                    info!("barge-in: stopping playback, discarding buffered turn");
                    ctx.scheduler.stop();
                    ctx.accumulator.reset();
                }
                None => {
                    debug!("inbound channel closed");
                    break;
                }
            },
            () = wait(deadline) => {
                if let Some(group) = ctx.accumulator.poll_deadline(Instant::now()) {
                    play_group(&mut ctx, group, current_rate);
                }
            }
        }
    }

    let dropped = ctx.accumulator.pending_len();
    if dropped > 0 {
        debug!(dropped_chunks = dropped, "downlink exiting with unflushed audio");
    }
    info!("downlink stopped");
}

async fn wait(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(tokio::time::Instant::from_std(d)).await,
        None => tokio::time::sleep(IDLE_POLL).await,
    }
}

/// Merge, decode, stretch and schedule one flushed group.
fn play_group(ctx: &mut DownlinkContext, group: Vec<PcmChunk>, rate: f32) {
    let merged = merge_chunks(&group);
    let frame = match decode_pcm16(&merged) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(error = %e, chunks = group.len(), "discarding undecodable chunk group");
            return;
        }
    };

    let samples = if (rate - 1.0).abs() < UNITY_RATE_EPSILON {
        frame.samples
    } else {
        match ctx.stretcher.stretch(&frame.samples, rate) {
            Ok(stretched) => stretched,
            Err(e) => {
                warn!(error = %e, rate, "time-stretch failed, playing unmodified");
                frame.samples
            }
        }
    };

    let buffer = PlayableBuffer::new(samples, frame.sample_rate, rate);
    if let Err(e) = ctx.scheduler.enqueue(buffer) {
        warn!(error = %e, "playback device rejected buffer");
        *ctx.status.lock() = SessionStatus::Error;
        let _ = ctx.status_tx.send(SessionStatusEvent {
            status: SessionStatus::Error,
            detail: Some(e.to_string()),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicU64;

    use crate::{
        buffering::chunk::SampleFrame,
        codec::encode_pcm16,
        error::{LoquiError, Result},
        playback::{PlaybackSink, StreamState},
        turn::{BatchTuning, FlushPolicy},
    };

    struct TestSink {
        written: u64,
        consumed: Arc<AtomicU64>,
    }

    impl PlaybackSink for TestSink {
        fn write(&mut self, samples: &[f32]) -> Result<()> {
            self.written += samples.len() as u64;
            Ok(())
        }

        fn clear(&mut self) {}

        fn position_secs(&self) -> f64 {
            self.consumed.load(Ordering::Relaxed) as f64 / 24_000.0
        }
    }

    fn test_context(
        policy: FlushPolicy,
        rate: f32,
    ) -> (mpsc::Sender<InboundEvent>, DownlinkContext, Arc<PlaybackScheduler>) {
        let (tx, rx) = mpsc::channel(64);
        let sink = TestSink {
            written: 0,
            consumed: Arc::new(AtomicU64::new(0)),
        };
        let scheduler = Arc::new(PlaybackScheduler::new(Box::new(sink)));
        let (status_tx, _) = broadcast::channel(16);
        let ctx = DownlinkContext {
            inbound_rx: rx,
            accumulator: TurnAccumulator::new(policy, BatchTuning::default(), rate),
            stretcher: TimeStretcher::new(),
            scheduler: Arc::clone(&scheduler),
            speech_rate: Arc::new(Mutex::new(rate)),
            running: Arc::new(AtomicBool::new(true)),
            status: Arc::new(Mutex::new(SessionStatus::Live)),
            status_tx,
        };
        (tx, ctx, scheduler)
    }

    fn tone_chunk(frames: usize) -> PcmChunk {
        let samples: Vec<f32> = (0..frames)
            .map(|i| (i as f32 * 0.05).sin() * 0.4)
            .collect();
        encode_pcm16(&SampleFrame::mono(samples, 24_000))
    }

    #[tokio::test]
    async fn full_turn_is_scheduled_as_one_buffer() {
        let (tx, ctx, scheduler) = test_context(FlushPolicy::OnTurnComplete, 1.0);
        let task = tokio::spawn(run(ctx));

        for _ in 0..4 {
            tx.send(InboundEvent::Audio(tone_chunk(2_400))).await.unwrap();
        }
        tx.send(InboundEvent::TurnComplete).await.unwrap();
        drop(tx);
        task.await.unwrap();

        let items = scheduler.items();
        assert_eq!(items.len(), 1, "whole turn plays as a single buffer");
        assert!((items[0].scheduled_start - 0.0).abs() < 1e-9);
        // 4 × 2400 frames at 24 kHz = 0.4 s.
        assert!((items[0].duration_secs - 0.4).abs() < 1e-9);
        assert_eq!(scheduler.poll(), StreamState::Sounding);
    }

    #[tokio::test]
    async fn stretch_halves_duration_at_double_rate() {
        let (tx, ctx, scheduler) = test_context(FlushPolicy::OnTurnComplete, 2.0);
        let task = tokio::spawn(run(ctx));

        tx.send(InboundEvent::Audio(tone_chunk(48_000))).await.unwrap();
        tx.send(InboundEvent::TurnComplete).await.unwrap();
        drop(tx);
        task.await.unwrap();

        let items = scheduler.items();
        assert_eq!(items.len(), 1);
        // 2 s of audio at rate 2.0 → about 1 s, within one grain+hop of slack.
        let slack = 3_072.0 / 24_000.0;
        assert!(
            (items[0].duration_secs - 1.0).abs() <= slack,
            "duration {}",
            items[0].duration_secs
        );
    }

    #[tokio::test]
    async fn interruption_clears_queue_and_open_turn() {
        let (tx, ctx, scheduler) = test_context(FlushPolicy::OnTurnComplete, 1.0);
        let task = tokio::spawn(run(ctx));

        tx.send(InboundEvent::Audio(tone_chunk(2_400))).await.unwrap();
        tx.send(InboundEvent::TurnComplete).await.unwrap();
        tx.send(InboundEvent::Audio(tone_chunk(2_400))).await.unwrap();
        tx.send(InboundEvent::Interrupted).await.unwrap();
        // A new turn after the barge-in still plays.
        tx.send(InboundEvent::Audio(tone_chunk(4_800))).await.unwrap();
        tx.send(InboundEvent::TurnComplete).await.unwrap();
        drop(tx);
        task.await.unwrap();

        let items = scheduler.items();
        assert_eq!(items.len(), 1, "only the post-interruption turn remains");
        assert!((items[0].duration_secs - 0.2).abs() < 1e-9);
    }

    #[tokio::test]
    async fn undecodable_group_is_skipped_without_killing_the_task() {
        let (tx, ctx, scheduler) = test_context(FlushPolicy::OnTurnComplete, 1.0);
        let task = tokio::spawn(run(ctx));

        // Odd byte count cannot be PCM16.
        tx.send(InboundEvent::Audio(PcmChunk::new(vec![1, 2, 3], 24_000, 1)))
            .await
            .unwrap();
        tx.send(InboundEvent::TurnComplete).await.unwrap();

        tx.send(InboundEvent::Audio(tone_chunk(2_400))).await.unwrap();
        tx.send(InboundEvent::TurnComplete).await.unwrap();
        drop(tx);
        task.await.unwrap();

        assert_eq!(scheduler.items().len(), 1, "valid turn after the bad one plays");
    }
}
