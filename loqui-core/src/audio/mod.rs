//! Microphone capture via cpal.
//!
//! # Real-time constraints
//!
//! The input callback runs on an OS audio thread at elevated priority and
//! must not allocate, block on a lock, or perform I/O. Samples therefore go
//! straight into a lock-free SPSC ring producer; the mono scratch buffer is
//! grown on the first callback and reused afterwards.
//!
//! # Threading
//!
//! `cpal::Stream` is `!Send` on Windows (COM) and macOS (CoreAudio), so an
//! `AudioCapture` must be created and dropped on one OS thread. The session
//! arranges this by opening the stream inside `tokio::task::spawn_blocking`.

pub mod device;
pub mod output;
pub mod resample;

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, StreamTrait},
    SampleFormat, SampleRate, Stream, StreamConfig,
};

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

#[cfg(feature = "audio-cpal")]
use tracing::{error, info, warn};

use crate::buffering::AudioProducer;
#[cfg(feature = "audio-cpal")]
use crate::buffering::Producer;
use crate::error::Result;
#[cfg(not(feature = "audio-cpal"))]
use crate::error::LoquiError;

/// Handle to a live capture stream.
///
/// **Not `Send`** — see the module docs. Drop on the creating thread.
pub struct AudioCapture {
    /// Kept alive so cpal does not tear the stream down.
    #[cfg(feature = "audio-cpal")]
    _stream: Stream,
    /// Cleared to make the callback a no-op before the stream is dropped.
    running: Arc<AtomicBool>,
    /// Capture rate actually negotiated with the device (Hz).
    pub sample_rate: u32,
}

/// Downmix one callback's worth of interleaved samples to mono f32 and push
/// the result into the ring. `scratch` is reused across calls so steady
/// state never allocates.
#[cfg(feature = "audio-cpal")]
fn push_mono<S: Copy>(
    data: &[S],
    channels: usize,
    to_f32: impl Fn(S) -> f32,
    scratch: &mut Vec<f32>,
    producer: &mut AudioProducer,
) {
    let frames = data.len() / channels;
    scratch.resize(frames, 0.0);
    for (frame, slot) in data.chunks_exact(channels).zip(scratch.iter_mut()) {
        let mut acc = 0f32;
        for &s in frame {
            acc += to_f32(s);
        }
        *slot = acc / channels as f32;
    }
    let written = producer.push_slice(scratch);
    if written < frames {
        warn!("capture ring full: dropped {} frames", frames - written);
    }
}

impl AudioCapture {
    /// Open an input device (preferred name, else default, else first
    /// available) and stream mono f32 frames into `producer`.
    ///
    /// # Errors
    /// `LoquiError::NoDefaultInputDevice` when no input exists,
    /// `LoquiError::AudioDevice` / `AudioStream` when cpal refuses the
    /// configuration or the stream fails to start.
    #[cfg(feature = "audio-cpal")]
    pub fn open_with_preference(
        mut producer: AudioProducer,
        running: Arc<AtomicBool>,
        preferred_device_name: Option<&str>,
    ) -> Result<Self> {
        use crate::error::LoquiError;

        let device = device::resolve_input_device(preferred_device_name)?;
        info!(
            device = device.name().unwrap_or_default().as_str(),
            "opening input device"
        );

        let supported = device
            .default_input_config()
            .map_err(|e| LoquiError::AudioDevice(e.to_string()))?;
        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels();
        if channels == 0 {
            return Err(LoquiError::AudioDevice("device reports zero channels".into()));
        }
        info!(sample_rate, channels, "capture config selected");

        let config = StreamConfig {
            channels,
            sample_rate: SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        let ch = channels as usize;

        let running_f32 = Arc::clone(&running);
        let running_i16 = Arc::clone(&running);
        let running_u8 = Arc::clone(&running);

        let stream = match supported.sample_format() {
            SampleFormat::F32 => {
                let mut scratch: Vec<f32> = Vec::new();
                device.build_input_stream(
                    &config,
                    move |data: &[f32], _info| {
                        if !running_f32.load(Ordering::Relaxed) {
                            return;
                        }
                        if ch == 1 {
                            // Mono f32 needs no conversion at all.
                            let written = producer.push_slice(data);
                            if written < data.len() {
                                warn!(
                                    "capture ring full: dropped {} frames",
                                    data.len() - written
                                );
                            }
                        } else {
                            push_mono(data, ch, |s| s, &mut scratch, &mut producer);
                        }
                    },
                    |err| error!("capture stream error: {err}"),
                    None,
                )
            }

            SampleFormat::I16 => {
                let mut scratch: Vec<f32> = Vec::new();
                device.build_input_stream(
                    &config,
                    move |data: &[i16], _info| {
                        if !running_i16.load(Ordering::Relaxed) {
                            return;
                        }
                        push_mono(
                            data,
                            ch,
                            |s| s as f32 / 32_768.0,
                            &mut scratch,
                            &mut producer,
                        );
                    },
                    |err| error!("capture stream error: {err}"),
                    None,
                )
            }

            SampleFormat::U8 => {
                let mut scratch: Vec<f32> = Vec::new();
                device.build_input_stream(
                    &config,
                    move |data: &[u8], _info| {
                        if !running_u8.load(Ordering::Relaxed) {
                            return;
                        }
                        push_mono(
                            data,
                            ch,
                            |s| (s as f32 - 128.0) / 128.0,
                            &mut scratch,
                            &mut producer,
                        );
                    },
                    |err| error!("capture stream error: {err}"),
                    None,
                )
            }

            fmt => {
                return Err(LoquiError::AudioStream(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }
        .map_err(|e| LoquiError::AudioStream(e.to_string()))?;

        stream
            .play()
            .map_err(|e| LoquiError::AudioStream(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            running,
            sample_rate,
        })
    }

    /// Open the system default microphone.
    #[cfg(feature = "audio-cpal")]
    pub fn open_default(producer: AudioProducer, running: Arc<AtomicBool>) -> Result<Self> {
        Self::open_with_preference(producer, running, None)
    }

    /// Signal the callback to no-op from its next invocation onwards.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Stubs when compiled without the `audio-cpal` feature.
#[cfg(not(feature = "audio-cpal"))]
impl AudioCapture {
    pub fn open_with_preference(
        _producer: AudioProducer,
        _running: Arc<AtomicBool>,
        _preferred_device_name: Option<&str>,
    ) -> Result<Self> {
        Err(LoquiError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }

    pub fn open_default(producer: AudioProducer, running: Arc<AtomicBool>) -> Result<Self> {
        Self::open_with_preference(producer, running, None)
    }
}
