//! Value types handed along the streaming pipeline.

/// A contiguous block of normalized f32 samples at a known format.
///
/// Produced by capture (after downmix/resample) and by PCM decoding on the
/// downlink. Interleaved when `channels > 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleFrame {
    /// Samples in [-1.0, 1.0], interleaved by channel.
    pub samples: Vec<f32>,
    /// Sample rate in Hz (e.g. 16000, 24000, 48000).
    pub sample_rate: u32,
    /// Channel count (1 in the reference deployment).
    pub channels: u16,
}

impl SampleFrame {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
        }
    }

    /// Convenience constructor for the mono frames this engine works with.
    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self::new(samples, sample_rate, 1)
    }

    /// Returns the duration of this frame in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0.0;
        }
        (self.samples.len() / self.channels as usize) as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// An immutable run of 16-bit signed little-endian PCM bytes.
///
/// Outbound chunks carry microphone audio toward the transport (16 kHz in
/// the reference deployment); inbound chunks carry model speech from the
/// transport toward the turn accumulator (24 kHz). Ownership transfers down
/// the pipeline; chunks are never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmChunk {
    /// Raw PCM16LE bytes, interleaved by channel.
    pub bytes: Vec<u8>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Channel count.
    pub channels: u16,
}

impl PcmChunk {
    pub fn new(bytes: Vec<u8>, sample_rate: u32, channels: u16) -> Self {
        Self {
            bytes,
            sample_rate,
            channels,
        }
    }

    /// Number of per-channel sample frames encoded in this chunk.
    pub fn frame_count(&self) -> usize {
        let stride = 2 * self.channels.max(1) as usize;
        self.bytes.len() / stride
    }

    /// Returns the duration of this chunk in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frame_count() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_duration_accounts_for_channels() {
        let frame = SampleFrame::new(vec![0.0; 48_000], 24_000, 2);
        assert!((frame.duration_secs() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn chunk_duration_from_bytes() {
        // 24_000 mono frames = 48_000 bytes = 1 s at 24 kHz.
        let chunk = PcmChunk::new(vec![0u8; 48_000], 24_000, 1);
        assert_eq!(chunk.frame_count(), 24_000);
        assert!((chunk.duration_secs() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn zero_rate_duration_is_zero() {
        let chunk = PcmChunk::new(vec![0u8; 16], 0, 1);
        assert_eq!(chunk.duration_secs(), 0.0);
    }
}
