//! Sample-rate conversion for the uplink path.
//!
//! Capture runs at whatever rate the device reports (commonly 44.1 or
//! 48 kHz); the transport contract wants 16 kHz mono. `RateConverter`
//! bridges that on the uplink thread, where allocation is allowed. When the
//! rates already match it degrades to a passthrough and never initialises
//! rubato at all.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::error;

use crate::error::{LoquiError, Result};

/// Converts f32 mono audio from one fixed sample rate to another.
pub struct RateConverter {
    /// `None` in passthrough mode (source rate == target rate).
    resampler: Option<FastFixedIn<f32>>,
    /// Holds partial input between calls; rubato wants exact block sizes.
    carry: Vec<f32>,
    /// Input samples rubato consumes per process call.
    block: usize,
    /// Pre-allocated `[channel][frame]` output storage.
    out_buf: Vec<Vec<f32>>,
}

impl RateConverter {
    /// # Errors
    /// `LoquiError::AudioDevice` if rubato rejects the configuration.
    pub fn new(source_rate: u32, target_rate: u32, block: usize) -> Result<Self> {
        if source_rate == target_rate {
            return Ok(Self {
                resampler: None,
                carry: Vec::new(),
                block,
                out_buf: Vec::new(),
            });
        }

        let ratio = target_rate as f64 / source_rate as f64;
        let resampler = FastFixedIn::<f32>::new(
            ratio,
            1.0, // fixed ratio, no dynamic adjustment
            PolynomialDegree::Cubic,
            block,
            1, // mono
        )
        .map_err(|e| LoquiError::AudioDevice(format!("resampler init: {e}")))?;

        let max_out = resampler.output_frames_max();
        tracing::info!(source_rate, target_rate, block, max_out, "resampling enabled");

        Ok(Self {
            resampler: Some(resampler),
            carry: Vec::new(),
            block,
            out_buf: vec![vec![0f32; max_out]],
        })
    }

    /// Feed samples in, get converted samples out (possibly empty while a
    /// full block is still accumulating).
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(ref mut resampler) = self.resampler else {
            return samples.to_vec();
        };

        self.carry.extend_from_slice(samples);

        let mut converted = Vec::new();
        while self.carry.len() >= self.block {
            let input = &self.carry[..self.block];
            match resampler.process_into_buffer(&[input], &mut self.out_buf, None) {
                Ok((_consumed, produced)) => {
                    converted.extend_from_slice(&self.out_buf[0][..produced]);
                }
                Err(e) => error!("resampler process error: {e}"),
            }
            self.carry.drain(..self.block);
        }
        converted
    }

    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}
