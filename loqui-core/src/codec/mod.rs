//! Sample codec: conversions between f32 sample frames, PCM16 byte chunks
//! and a self-describing WAV container.
//!
//! Every function here is pure and deterministic. The hot paths
//! (`encode_pcm16` on the uplink, `merge_chunks` + `decode_pcm16` on the
//! downlink) run on non-RT threads, so allocation is fine.

use std::io::Cursor;

use crate::{
    buffering::chunk::{PcmChunk, SampleFrame},
    error::{LoquiError, Result},
};

/// Format applied when merging an empty chunk sequence: the reference
/// downlink format (24 kHz mono).
const MERGE_FALLBACK_RATE: u32 = 24_000;
const MERGE_FALLBACK_CHANNELS: u16 = 1;

/// Encode a frame of normalized f32 samples as 16-bit signed LE PCM.
///
/// Out-of-range inputs are clamped to the i16 domain rather than wrapped.
pub fn encode_pcm16(frame: &SampleFrame) -> PcmChunk {
    let mut bytes = Vec::with_capacity(frame.samples.len() * 2);
    for &s in &frame.samples {
        let v = (s * 32_768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    PcmChunk::new(bytes, frame.sample_rate, frame.channels)
}

/// Decode a PCM16LE chunk back to normalized f32 samples.
///
/// # Errors
/// `LoquiError::MalformedChunk` when the byte length is not a multiple of
/// `2 * channels`, or when the chunk declares zero channels.
pub fn decode_pcm16(chunk: &PcmChunk) -> Result<SampleFrame> {
    let stride = 2 * chunk.channels as usize;
    if stride == 0 || chunk.bytes.len() % stride != 0 {
        return Err(LoquiError::MalformedChunk {
            len: chunk.bytes.len(),
            channels: chunk.channels,
        });
    }

    let samples = chunk
        .bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32_768.0)
        .collect();

    Ok(SampleFrame::new(samples, chunk.sample_rate, chunk.channels))
}

/// Concatenate PCM chunks byte-for-byte in arrival order.
///
/// Byte-level concatenation is cheaper than per-chunk decode + sample
/// concat and is exact for PCM16: frames are self-delimiting. The merged
/// chunk takes the format of the first input; an empty input yields an
/// empty chunk in the reference downlink format.
pub fn merge_chunks(chunks: &[PcmChunk]) -> PcmChunk {
    let (sample_rate, channels) = chunks
        .first()
        .map(|c| (c.sample_rate, c.channels))
        .unwrap_or((MERGE_FALLBACK_RATE, MERGE_FALLBACK_CHANNELS));

    let total: usize = chunks.iter().map(|c| c.bytes.len()).sum();
    let mut bytes = Vec::with_capacity(total);
    for chunk in chunks {
        bytes.extend_from_slice(&chunk.bytes);
    }
    PcmChunk::new(bytes, sample_rate, channels)
}

/// Wrap raw PCM16 bytes in a WAV container so a generic decoder can treat
/// them as a self-describing asset.
///
/// # Errors
/// `LoquiError::MalformedChunk` on misaligned input; container write errors
/// are surfaced through `LoquiError::Other`.
pub fn wrap_wav(chunk: &PcmChunk) -> Result<Vec<u8>> {
    let stride = 2 * chunk.channels as usize;
    if stride == 0 || chunk.bytes.len() % stride != 0 {
        return Err(LoquiError::MalformedChunk {
            len: chunk.bytes.len(),
            channels: chunk.channels,
        });
    }

    let spec = hound::WavSpec {
        channels: chunk.channels,
        sample_rate: chunk.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| LoquiError::Other(e.into()))?;
        for b in chunk.bytes.chunks_exact(2) {
            writer
                .write_sample(i16::from_le_bytes([b[0], b[1]]))
                .map_err(|e| LoquiError::Other(e.into()))?;
        }
        writer.finalize().map_err(|e| LoquiError::Other(e.into()))?;
    }
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn ramp_frame(len: usize) -> SampleFrame {
        let samples = (0..len)
            .map(|i| (i as f32 / len as f32) * 2.0 - 1.0)
            .collect();
        SampleFrame::mono(samples, 16_000)
    }

    #[test]
    fn pcm16_round_trip_within_quantization_error() {
        let frame = ramp_frame(1_024);
        let decoded = decode_pcm16(&encode_pcm16(&frame)).unwrap();

        assert_eq!(decoded.samples.len(), frame.samples.len());
        assert_eq!(decoded.sample_rate, 16_000);
        for (a, b) in frame.samples.iter().zip(&decoded.samples) {
            assert_abs_diff_eq!(a, b, epsilon = 1.0 / 32_768.0);
        }
    }

    #[test]
    fn full_scale_samples_clamp_instead_of_wrapping() {
        let frame = SampleFrame::mono(vec![1.0, -1.0], 16_000);
        let decoded = decode_pcm16(&encode_pcm16(&frame)).unwrap();
        assert!(decoded.samples[0] > 0.999);
        assert!((decoded.samples[1] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn decode_rejects_odd_byte_length() {
        let chunk = PcmChunk::new(vec![0u8; 5], 24_000, 1);
        assert!(matches!(
            decode_pcm16(&chunk),
            Err(LoquiError::MalformedChunk { len: 5, channels: 1 })
        ));
    }

    #[test]
    fn decode_rejects_partial_stereo_frame() {
        // 6 bytes is 1.5 stereo frames.
        let chunk = PcmChunk::new(vec![0u8; 6], 24_000, 2);
        assert!(matches!(
            decode_pcm16(&chunk),
            Err(LoquiError::MalformedChunk { .. })
        ));
    }

    #[test]
    fn decode_rejects_zero_channels() {
        let chunk = PcmChunk::new(vec![0u8; 4], 24_000, 0);
        assert!(matches!(
            decode_pcm16(&chunk),
            Err(LoquiError::MalformedChunk { .. })
        ));
    }

    #[test]
    fn merge_is_associative_at_the_byte_level() {
        let a = PcmChunk::new(vec![1, 2, 3, 4], 24_000, 1);
        let b = PcmChunk::new(vec![5, 6], 24_000, 1);
        let c = PcmChunk::new(vec![7, 8, 9, 10], 24_000, 1);

        let flat = merge_chunks(&[a.clone(), b.clone(), c.clone()]);
        let nested = merge_chunks(&[merge_chunks(&[a, b]), c]);

        assert_eq!(flat, nested);
        assert_eq!(flat.bytes, vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
    }

    #[test]
    fn merge_of_nothing_is_empty_downlink_format() {
        let merged = merge_chunks(&[]);
        assert!(merged.is_empty());
        assert_eq!(merged.sample_rate, 24_000);
        assert_eq!(merged.channels, 1);
    }

    #[test]
    fn wav_container_reads_back_with_hound() {
        let frame = ramp_frame(240);
        let chunk = encode_pcm16(&SampleFrame::mono(frame.samples.clone(), 24_000));
        let wav = wrap_wav(&chunk).unwrap();

        let mut reader = hound::WavReader::new(Cursor::new(wav)).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.sample_rate, 24_000);
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.bits_per_sample, 16);

        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples.len(), 240);
    }

    #[test]
    fn wav_container_rejects_misaligned_bytes() {
        let chunk = PcmChunk::new(vec![0u8; 3], 24_000, 1);
        assert!(matches!(
            wrap_wav(&chunk),
            Err(LoquiError::MalformedChunk { .. })
        ));
    }
}
