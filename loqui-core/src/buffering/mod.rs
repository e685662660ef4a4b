//! Lock-free SPSC ring buffers for audio samples.
//!
//! Uses `ringbuf::HeapRb<f32>` which provides wait-free `push_slice` /
//! `pop_slice` safe to call from the real-time audio callbacks. Two rings
//! exist per session: capture callback → uplink loop, and playback
//! scheduler → output callback.

pub mod chunk;

use ringbuf::{traits::Split, HeapRb};

pub use ringbuf::traits::{Consumer, Observer, Producer};

/// Producer half — held by the capture callback thread.
pub type AudioProducer = ringbuf::HeapProd<f32>;

/// Consumer half — held by the uplink loop (or the playback callback).
pub type AudioConsumer = ringbuf::HeapCons<f32>;

/// Capture ring capacity: 2^20 = 1 048 576 f32 samples ≈ 21.8 s at 48 kHz.
/// Enough slack for the uplink loop to stall briefly without callback drops.
pub const CAPTURE_RING_CAPACITY: usize = 1 << 20;

/// Playback ring capacity: 2^22 = 4 194 304 f32 samples ≈ 174 s at 24 kHz.
/// Whole stretched turns are written at enqueue time, so the ring must hold
/// several long utterances queued back to back.
pub const PLAYBACK_RING_CAPACITY: usize = 1 << 22;

/// Create the capture-side producer/consumer pair.
pub fn create_capture_ring() -> (AudioProducer, AudioConsumer) {
    HeapRb::<f32>::new(CAPTURE_RING_CAPACITY).split()
}

/// Create the playback-side producer/consumer pair.
pub fn create_playback_ring() -> (AudioProducer, AudioConsumer) {
    HeapRb::<f32>::new(PLAYBACK_RING_CAPACITY).split()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_ring_round_trips_samples() {
        let (mut tx, mut rx) = create_capture_ring();
        let data = [0.25f32, -0.5, 0.75];
        assert_eq!(tx.push_slice(&data), 3);

        let mut out = [0f32; 3];
        assert_eq!(rx.pop_slice(&mut out), 3);
        assert_eq!(out, data);
    }

    #[test]
    fn playback_ring_reports_capacity() {
        let (tx, _rx) = create_playback_ring();
        assert!(tx.vacant_len() >= PLAYBACK_RING_CAPACITY);
    }
}
