//! Pitch-preserving time-stretch via synchronous overlap-add (SOLA).
//!
//! ## Algorithm
//!
//! A Hann-windowed grain of `G` samples is read from the input at position
//! `p` and overlap-added into the output at position `q`. After each grain,
//! `p` advances by `hop * rate` while `q` advances by the constant `hop`
//! (`hop = G/2`, 50% overlap). Slower rates (< 1.0) re-read input material,
//! lengthening the output; faster rates skip ahead, shortening it. Grain
//! contents are copied verbatim, so the local waveform — and therefore the
//! perceived pitch — is unchanged.
//!
//! With 50% overlap a Hann window sums to a near-constant gain, so no
//! renormalization pass is applied.

use crate::error::{LoquiError, Result};

/// Default grain length in samples. ~85 ms at 24 kHz, a reasonable speech
/// default; tune via [`TimeStretcher::with_grain`] for other rates.
pub const DEFAULT_GRAIN: usize = 2048;

/// Smallest accepted rate. Below this the output grows by more than 20x,
/// far outside the useful playback window, and the grain loop degenerates.
pub const MIN_RATE: f32 = 0.05;

/// Grain-based time stretcher with a precomputed analysis window.
#[derive(Debug, Clone)]
pub struct TimeStretcher {
    grain: usize,
    hop: usize,
    window: Vec<f32>,
}

impl Default for TimeStretcher {
    fn default() -> Self {
        Self::with_grain(DEFAULT_GRAIN)
    }
}

impl TimeStretcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a stretcher with a custom grain length (minimum 2 samples).
    /// The hop is fixed at half the grain.
    pub fn with_grain(grain: usize) -> Self {
        let grain = grain.max(2);
        let window = hann_window(grain);
        Self {
            grain,
            hop: grain / 2,
            window,
        }
    }

    pub fn grain(&self) -> usize {
        self.grain
    }

    pub fn hop(&self) -> usize {
        self.hop
    }

    /// Stretch `input` to roughly `input.len() / rate` samples at unchanged
    /// pitch.
    ///
    /// Pathologically short input (fewer samples than one loop iteration
    /// consumes) yields a single-sample silent buffer, never an empty one.
    ///
    /// # Errors
    /// `LoquiError::InvalidRate` when `rate` is not a finite number of at
    /// least [`MIN_RATE`]. Callers are expected to fall back to rate 1.0
    /// (pass-through) rather than drop the turn.
    pub fn stretch(&self, input: &[f32], rate: f32) -> Result<Vec<f32>> {
        if !rate.is_finite() || rate < MIN_RATE {
            return Err(LoquiError::InvalidRate(rate));
        }

        let in_len = input.len();
        let step = self.hop as f64 * rate as f64;
        let est_grains = (in_len as f64 / step).ceil() as usize + 2;
        let mut out = vec![0.0f32; est_grains * self.hop + self.grain];

        let mut p = 0.0f64;
        let mut q = 0usize;
        let mut grains = 0usize;

        while (p as usize) < in_len {
            let start = p as usize;
            if q + self.grain > out.len() {
                out.resize(q + self.grain, 0.0);
            }
            let copy = self.grain.min(in_len - start);
            for i in 0..copy {
                out[q + i] += input[start + i] * self.window[i];
            }
            // Past end-of-input the grain is zero-padded: nothing to add.
            p += step;
            q += self.hop;
            grains += 1;
        }

        if grains == 0 {
            return Ok(vec![0.0]);
        }

        out.truncate(q + self.grain);
        Ok(out)
    }
}

/// Symmetric raised-cosine (Hann) window of length `n`.
fn hann_window(n: usize) -> Vec<f32> {
    let denom = (n - 1) as f32;
    (0..n)
        .map(|i| 0.5 - 0.5 * (2.0 * std::f32::consts::PI * i as f32 / denom).cos())
        .collect()
}
