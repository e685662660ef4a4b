//! cpal output sink backing the playback scheduler.
//!
//! The device callback pops samples from a lock-free ring and counts every
//! frame it renders, underruns included, so [`CpalSink::position_secs`]
//! advances through silence exactly like a hardware output clock. That is
//! what lets the scheduler compute "start now vs. start at queue end"
//! without ever asking the device directly.
//!
//! `cpal::Stream` is `!Send`, so a dedicated thread builds and owns the
//! stream; `open` blocks until that thread confirms the device is live.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering},
    Arc,
};

use crate::error::{LoquiError, Result};

const STATUS_OK: u8 = 0;
const STATUS_FAILED: u8 = 1;

/// How long `open` waits for the stream thread to report success.
#[cfg(feature = "audio-cpal")]
const OPEN_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// Playback sink writing into a ring drained by a cpal output stream.
pub struct CpalSink {
    producer: crate::buffering::AudioProducer,
    consumer: Arc<parking_lot::Mutex<crate::buffering::AudioConsumer>>,
    consumed_frames: Arc<AtomicU64>,
    status: Arc<AtomicU8>,
    shutdown: Arc<AtomicBool>,
    stream_thread: Option<std::thread::JoinHandle<()>>,
    sample_rate: u32,
}

#[cfg(feature = "audio-cpal")]
impl CpalSink {
    /// Open the default output device at `sample_rate` (mono preferred,
    /// stereo fan-out as fallback) and start draining the playback ring.
    ///
    /// # Errors
    /// `LoquiError::NoDefaultOutputDevice` when no output exists,
    /// `LoquiError::PlaybackDevice` when no usable config is found, the
    /// stream fails to build, or the device does not come up in time.
    pub fn open(sample_rate: u32) -> Result<Self> {
        let (producer, consumer) = crate::buffering::create_playback_ring();
        let consumer = Arc::new(parking_lot::Mutex::new(consumer));
        let consumed_frames = Arc::new(AtomicU64::new(0));
        let status = Arc::new(AtomicU8::new(STATUS_OK));
        let shutdown = Arc::new(AtomicBool::new(false));

        let (confirm_tx, confirm_rx) = std::sync::mpsc::channel::<Result<()>>();
        let cb_consumer = Arc::clone(&consumer);
        let cb_consumed = Arc::clone(&consumed_frames);
        let cb_status = Arc::clone(&status);
        let thread_shutdown = Arc::clone(&shutdown);

        let stream_thread = std::thread::Builder::new()
            .name("loqui-playback".into())
            .spawn(move || {
                let stream = match build_stream(sample_rate, cb_consumer, cb_consumed, cb_status) {
                    Ok(stream) => {
                        let _ = confirm_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = confirm_tx.send(Err(e));
                        return;
                    }
                };
                while !thread_shutdown.load(Ordering::Acquire) {
                    std::thread::sleep(std::time::Duration::from_millis(50));
                }
                // Stream must drop on its creation thread.
                drop(stream);
            })
            .map_err(|e| LoquiError::PlaybackDevice(format!("spawn playback thread: {e}")))?;

        match confirm_rx.recv_timeout(OPEN_TIMEOUT) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = stream_thread.join();
                return Err(e);
            }
            Err(_) => {
                shutdown.store(true, Ordering::Release);
                return Err(LoquiError::PlaybackDevice(
                    "timed out opening output device".into(),
                ));
            }
        }

        Ok(Self {
            producer,
            consumer,
            consumed_frames,
            status,
            shutdown,
            stream_thread: Some(stream_thread),
            sample_rate,
        })
    }
}

#[cfg(not(feature = "audio-cpal"))]
impl CpalSink {
    pub fn open(_sample_rate: u32) -> Result<Self> {
        Err(LoquiError::PlaybackDevice(
            "compiled without audio-cpal feature".into(),
        ))
    }
}

impl crate::playback::PlaybackSink for CpalSink {
    fn write(&mut self, samples: &[f32]) -> Result<()> {
        use crate::buffering::Producer;

        if self.status.load(Ordering::Relaxed) == STATUS_FAILED {
            return Err(LoquiError::PlaybackDevice("output stream failed".into()));
        }
        let written = self.producer.push_slice(samples);
        if written < samples.len() {
            return Err(LoquiError::PlaybackDevice(format!(
                "playback ring full: {} of {} samples rejected",
                samples.len() - written,
                samples.len()
            )));
        }
        Ok(())
    }

    fn clear(&mut self) {
        use crate::buffering::Consumer;

        let drained = self.consumer.lock().pop_iter().count();
        if drained > 0 {
            tracing::debug!(drained, "discarded pending playback samples");
        }
    }

    fn position_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.consumed_frames.load(Ordering::Relaxed) as f64 / self.sample_rate as f64
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.stream_thread.take() {
            let _ = handle.join();
        }
    }
}

/// Runs on the stream-owning thread. Mono config preferred; stereo devices
/// get each sample fanned out to both channels.
#[cfg(feature = "audio-cpal")]
fn build_stream(
    sample_rate: u32,
    consumer: Arc<parking_lot::Mutex<crate::buffering::AudioConsumer>>,
    consumed_frames: Arc<AtomicU64>,
    status: Arc<AtomicU8>,
) -> Result<cpal::Stream> {
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::SampleRate;

    use crate::buffering::Consumer;

    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or(LoquiError::NoDefaultOutputDevice)?;

    let rate_ok = |c: &cpal::SupportedStreamConfigRange| {
        c.min_sample_rate() <= SampleRate(sample_rate)
            && c.max_sample_rate() >= SampleRate(sample_rate)
            && c.sample_format() == cpal::SampleFormat::F32
    };
    let supported = device
        .supported_output_configs()
        .map_err(|e| LoquiError::PlaybackDevice(e.to_string()))?
        .find(|c| c.channels() == 1 && rate_ok(c))
        .or_else(|| {
            device
                .supported_output_configs()
                .ok()?
                .find(|c| c.channels() == 2 && rate_ok(c))
        })
        .ok_or_else(|| {
            LoquiError::PlaybackDevice(format!("no f32 output config at {sample_rate} Hz"))
        })?;

    let config = supported.with_sample_rate(SampleRate(sample_rate)).config();
    let channels = config.channels as usize;
    tracing::info!(
        device = device.name().unwrap_or_default().as_str(),
        sample_rate,
        channels,
        "opening output device"
    );

    let status_cb = Arc::clone(&status);
    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _info| {
                let frames = data.len() / channels;
                consumed_frames.fetch_add(frames as u64, Ordering::Relaxed);
                // clear() holds the lock only briefly; render silence rather
                // than block the audio thread.
                if let Some(mut cons) = consumer.try_lock() {
                    for frame in data.chunks_mut(channels) {
                        let sample = cons.try_pop().unwrap_or(0.0);
                        frame.fill(sample);
                    }
                } else {
                    data.fill(0.0);
                }
            },
            move |err| {
                tracing::error!("output stream error: {err}");
                status_cb.store(STATUS_FAILED, Ordering::Relaxed);
            },
            None,
        )
        .map_err(|e| LoquiError::PlaybackDevice(e.to_string()))?;

    stream
        .play()
        .map_err(|e| LoquiError::PlaybackDevice(e.to_string()))?;
    Ok(stream)
}
