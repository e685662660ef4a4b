use thiserror::Error;

/// All errors produced by loqui-core.
#[derive(Debug, Error)]
pub enum LoquiError {
    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("no default output device found")]
    NoDefaultOutputDevice,

    #[error(
        "malformed PCM chunk: {len} bytes is not a whole number of {channels}-channel 16-bit frames"
    )]
    MalformedChunk { len: usize, channels: u16 },

    #[error("playback device unusable: {0}")]
    PlaybackDevice(String),

    #[error("invalid playback rate: {0}")]
    InvalidRate(f32),

    #[error("transport unavailable")]
    TransportUnavailable,

    #[error("session is already running")]
    AlreadyRunning,

    #[error("session is not running")]
    NotRunning,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, LoquiError>;
