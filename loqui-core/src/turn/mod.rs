//! Turn accumulation: grouping inbound PCM chunks into utterances and
//! deciding when a group is ready for playback.
//!
//! The accumulator is a pure state machine. It owns no timer of its own;
//! instead it exposes the current debounce [`deadline`](TurnAccumulator::deadline)
//! and the event loop drives time into it via
//! [`poll_deadline`](TurnAccumulator::poll_deadline). That keeps every
//! policy decision testable with plain `Instant` arithmetic.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::buffering::chunk::PcmChunk;

/// When to hand a group of buffered chunks downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushPolicy {
    /// Accumulate the whole turn; flush only on the transport's
    /// turn-complete signal. Highest first-audio latency, but the stretch
    /// engine always sees one complete utterance.
    OnTurnComplete,
    /// Flush sub-groups early to start playback sooner. Group size and
    /// debounce timeout scale inversely with the playback rate.
    MiniBatch,
}

/// Tuning constants for [`FlushPolicy::MiniBatch`].
#[derive(Debug, Clone, Copy)]
pub struct BatchTuning {
    /// Batch size at rate 1.0.
    pub n_base: usize,
    /// Floor for the rate-adjusted batch size.
    pub n_min: usize,
    /// Debounce timeout at rate 1.0, in milliseconds.
    pub t_base_ms: u64,
    /// Floor for the rate-adjusted timeout, in milliseconds.
    pub t_min_ms: u64,
}

impl Default for BatchTuning {
    fn default() -> Self {
        Self {
            n_base: 12,
            n_min: 8,
            t_base_ms: 500,
            t_min_ms: 400,
        }
    }
}

impl BatchTuning {
    /// Rate-adjusted batch size: `max(n_min, ceil(n_base / rate))`.
    ///
    /// Slower playback makes each chunk occupy more wall-clock time, so
    /// fewer, larger batches keep the scheduler queue bounded; faster
    /// playback needs the opposite.
    pub fn size_for(&self, rate: f32) -> usize {
        let adjusted = (self.n_base as f32 / rate).ceil() as usize;
        adjusted.max(self.n_min)
    }

    /// Rate-adjusted debounce timeout: `max(t_min, t_base / rate)`.
    pub fn timeout_for(&self, rate: f32) -> Duration {
        let adjusted = (self.t_base_ms as f32 / rate).ceil() as u64;
        Duration::from_millis(adjusted.max(self.t_min_ms))
    }
}

/// The currently open (unfinalized) turn. At most one exists at a time.
#[derive(Debug, Clone, Copy)]
struct OpenTurn {
    started_at: Instant,
    chunks_seen: usize,
}

/// Classifies inbound chunks into turns and emits playback-ready groups.
#[derive(Debug)]
pub struct TurnAccumulator {
    policy: FlushPolicy,
    tuning: BatchTuning,
    batch_size: usize,
    batch_timeout: Duration,
    /// Chunks of the in-progress group, in arrival order.
    pending: Vec<PcmChunk>,
    /// When the debounce timer fires, if armed.
    deadline: Option<Instant>,
    open: Option<OpenTurn>,
}

impl TurnAccumulator {
    pub fn new(policy: FlushPolicy, tuning: BatchTuning, speech_rate: f32) -> Self {
        let rate = sanitize_rate(speech_rate);
        Self {
            policy,
            tuning,
            batch_size: tuning.size_for(rate),
            batch_timeout: tuning.timeout_for(rate),
            pending: Vec::new(),
            deadline: None,
            open: None,
        }
    }

    /// Recompute batch thresholds for a new playback rate. Takes effect on
    /// the next push; the in-progress group is left alone.
    pub fn set_speech_rate(&mut self, speech_rate: f32) {
        let rate = sanitize_rate(speech_rate);
        self.batch_size = self.tuning.size_for(rate);
        self.batch_timeout = self.tuning.timeout_for(rate);
    }

    /// Append an inbound chunk, opening a turn if none is open.
    ///
    /// Returns a group of chunks to play when the mini-batch size threshold
    /// is reached; otherwise (re-)arms the debounce timer and returns
    /// `None`. Under `OnTurnComplete` this never returns a group.
    pub fn push(&mut self, chunk: PcmChunk, now: Instant) -> Option<Vec<PcmChunk>> {
        match &mut self.open {
            Some(turn) => turn.chunks_seen += 1,
            None => {
                self.open = Some(OpenTurn {
                    started_at: now,
                    chunks_seen: 1,
                });
                debug!("opened new turn");
            }
        }

        self.pending.push(chunk);

        match self.policy {
            FlushPolicy::OnTurnComplete => None,
            FlushPolicy::MiniBatch => {
                if self.pending.len() >= self.batch_size {
                    self.deadline = None;
                    Some(self.take_pending("size threshold"))
                } else {
                    self.deadline = Some(now + self.batch_timeout);
                    None
                }
            }
        }
    }

    /// Handle the transport's turn-complete signal: flush whatever is
    /// buffered and close the turn.
    pub fn turn_complete(&mut self, now: Instant) -> Option<Vec<PcmChunk>> {
        self.deadline = None;
        if let Some(turn) = self.open.take() {
            debug!(
                chunks = turn.chunks_seen,
                age_ms = now.duration_since(turn.started_at).as_millis() as u64,
                "turn finalized"
            );
        }
        if self.pending.is_empty() {
            None
        } else {
            Some(self.take_pending("turn complete"))
        }
    }

    /// Fire the debounce timer if its deadline has passed.
    pub fn poll_deadline(&mut self, now: Instant) -> Option<Vec<PcmChunk>> {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                if self.pending.is_empty() {
                    None
                } else {
                    Some(self.take_pending("debounce timeout"))
                }
            }
            _ => None,
        }
    }

    /// The armed debounce deadline, for the event loop's `sleep_until`.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Discard all buffered state. Called on interruption (barge-in) and on
    /// session stop: an interrupted turn's unflushed chunks are never
    /// resumed.
    pub fn reset(&mut self) {
        let dropped = self.pending.len();
        if dropped > 0 || self.open.is_some() {
            debug!(dropped_chunks = dropped, "turn accumulator reset");
        }
        self.pending.clear();
        self.deadline = None;
        self.open = None;
    }

    pub fn policy(&self) -> FlushPolicy {
        self.policy
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn has_open_turn(&self) -> bool {
        self.open.is_some()
    }

    fn take_pending(&mut self, reason: &str) -> Vec<PcmChunk> {
        debug!(chunks = self.pending.len(), reason, "flushing chunk group");
        std::mem::take(&mut self.pending)
    }
}

fn sanitize_rate(rate: f32) -> f32 {
    if rate.is_finite() && rate > 0.0 {
        rate
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(n: u8) -> PcmChunk {
        PcmChunk::new(vec![n, 0], 24_000, 1)
    }

    fn test_tuning() -> BatchTuning {
        BatchTuning {
            n_base: 12,
            n_min: 4,
            t_base_ms: 500,
            t_min_ms: 100,
        }
    }

    #[test]
    fn batch_size_halves_at_double_rate() {
        let tuning = test_tuning();
        assert_eq!(tuning.size_for(1.0), 12);
        assert_eq!(tuning.size_for(2.0), 6);
        assert_eq!(tuning.size_for(0.5), 24);
    }

    #[test]
    fn batch_size_is_clamped_by_floor() {
        // Production default floor is 8: at rate 2.0 the clamp wins.
        let tuning = BatchTuning::default();
        assert_eq!(tuning.size_for(2.0), 8);
        assert_eq!(tuning.timeout_for(2.0), Duration::from_millis(400));
    }

    #[test]
    fn minibatch_flushes_at_rate_adjusted_size() {
        let mut acc = TurnAccumulator::new(FlushPolicy::MiniBatch, test_tuning(), 2.0);
        let now = Instant::now();

        for i in 0..5 {
            assert!(acc.push(chunk(i), now).is_none());
        }
        let group = acc.push(chunk(5), now).expect("sixth chunk reaches threshold");
        assert_eq!(group.len(), 6);
        assert_eq!(acc.pending_len(), 0);
        assert!(acc.deadline().is_none());
    }

    #[test]
    fn debounce_deadline_fires_after_timeout() {
        let mut acc = TurnAccumulator::new(FlushPolicy::MiniBatch, test_tuning(), 2.0);
        let start = Instant::now();

        assert!(acc.push(chunk(0), start).is_none());
        assert!(acc.push(chunk(1), start).is_none());

        let deadline = acc.deadline().expect("debounce armed");
        // t_base/rate = 250 ms, above the 100 ms floor.
        assert_eq!(deadline - start, Duration::from_millis(250));

        assert!(acc.poll_deadline(start + Duration::from_millis(249)).is_none());
        let group = acc
            .poll_deadline(start + Duration::from_millis(250))
            .expect("deadline reached");
        assert_eq!(group.len(), 2);
        assert!(acc.deadline().is_none());
    }

    #[test]
    fn debounce_rearms_on_each_chunk() {
        let mut acc = TurnAccumulator::new(FlushPolicy::MiniBatch, test_tuning(), 1.0);
        let start = Instant::now();

        acc.push(chunk(0), start);
        acc.push(chunk(1), start + Duration::from_millis(300));

        let deadline = acc.deadline().unwrap();
        assert_eq!(
            deadline - start,
            Duration::from_millis(300 + 500),
            "timer restarts from the latest chunk"
        );
    }

    #[test]
    fn minibatch_flush_does_not_finalize_the_turn() {
        let mut acc = TurnAccumulator::new(FlushPolicy::MiniBatch, test_tuning(), 2.0);
        let now = Instant::now();

        for i in 0..6 {
            acc.push(chunk(i), now);
        }
        assert!(acc.has_open_turn(), "turn stays open across batch flushes");

        // Remainder arrives, then the turn-complete signal closes it.
        acc.push(chunk(6), now);
        let tail = acc.turn_complete(now).expect("remainder flushed");
        assert_eq!(tail.len(), 1);
        assert!(!acc.has_open_turn());
    }

    #[test]
    fn on_turn_complete_policy_holds_everything_until_signal() {
        let mut acc = TurnAccumulator::new(FlushPolicy::OnTurnComplete, test_tuning(), 1.0);
        let now = Instant::now();

        for i in 0..20 {
            assert!(acc.push(chunk(i), now).is_none());
            assert!(acc.deadline().is_none(), "no debounce under this policy");
        }

        let group = acc.turn_complete(now).expect("full turn flushed");
        assert_eq!(group.len(), 20);
        assert_eq!(acc.pending_len(), 0);
    }

    #[test]
    fn turn_complete_with_nothing_buffered_is_a_no_op() {
        let mut acc = TurnAccumulator::new(FlushPolicy::MiniBatch, test_tuning(), 1.0);
        assert!(acc.turn_complete(Instant::now()).is_none());
    }

    #[test]
    fn chunks_flush_in_arrival_order() {
        let mut acc = TurnAccumulator::new(FlushPolicy::MiniBatch, test_tuning(), 2.0);
        let now = Instant::now();

        let mut group = None;
        for i in 0..6 {
            group = acc.push(chunk(i), now).or(group);
        }
        let order: Vec<u8> = group.unwrap().iter().map(|c| c.bytes[0]).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn reset_discards_pending_and_open_turn() {
        let mut acc = TurnAccumulator::new(FlushPolicy::MiniBatch, test_tuning(), 1.0);
        let now = Instant::now();

        acc.push(chunk(0), now);
        acc.push(chunk(1), now);
        assert!(acc.has_open_turn());

        acc.reset();
        assert_eq!(acc.pending_len(), 0);
        assert!(acc.deadline().is_none());
        assert!(!acc.has_open_turn());
        assert!(acc.turn_complete(now).is_none(), "nothing survives a reset");
    }

    #[test]
    fn new_turn_opens_after_finalization() {
        let mut acc = TurnAccumulator::new(FlushPolicy::OnTurnComplete, test_tuning(), 1.0);
        let now = Instant::now();

        acc.push(chunk(0), now);
        acc.turn_complete(now);
        assert!(!acc.has_open_turn());

        acc.push(chunk(1), now);
        assert!(acc.has_open_turn(), "first chunk after finalization opens a turn");
    }

    #[test]
    fn invalid_rate_falls_back_to_unit_thresholds() {
        let acc = TurnAccumulator::new(FlushPolicy::MiniBatch, test_tuning(), f32::NAN);
        assert_eq!(acc.batch_size, 12);
        assert_eq!(acc.batch_timeout, Duration::from_millis(500));
    }
}
