//! Input device enumeration and selection.
//!
//! A language-tutoring session is ruined by accidentally capturing system
//! output (the tutor hears itself), so enumeration carries a loopback
//! heuristic and a speech-microphone recommendation the embedding UI can
//! surface in its device picker.

use serde::{Deserialize, Serialize};

/// Metadata about one audio input device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputDeviceInfo {
    /// OS-reported device name.
    pub name: String,
    /// System default input device.
    pub is_default: bool,
    /// Likely captures system output rather than a microphone.
    pub is_loopback_like: bool,
    /// Best candidate for speech capture among the enumerated devices.
    pub is_recommended: bool,
}

const LOOPBACK_KEYWORDS: &[&str] = &[
    "stereo mix",
    "what u hear",
    "what you hear",
    "loopback",
    "monitor of",
    "virtual output",
    "speakers (",
    "headphones (",
];

const SPEECH_KEYWORDS: &[&str] = &[
    "microphone",
    "mic",
    "array",
    "headset",
    "line in",
    "usb",
    "webcam",
];

/// Heuristic for loopback/system-output capture devices (Windows "Stereo
/// Mix", PulseAudio monitors, virtual cables).
pub fn is_loopback_name(name: &str) -> bool {
    let lowered = name.trim().to_ascii_lowercase();
    LOOPBACK_KEYWORDS.iter().any(|k| lowered.contains(k))
}

/// Score a device name as a speech-capture candidate. Higher is better;
/// loopback-like names score strongly negative.
pub fn speech_mic_score(name: &str) -> i32 {
    let lowered = name.trim().to_ascii_lowercase();
    let mut score = 0;
    if is_loopback_name(&lowered) {
        score -= 16;
    } else {
        score += 8;
    }
    if SPEECH_KEYWORDS.iter().any(|k| lowered.contains(k)) {
        score += 6;
    }
    score
}

/// List input devices, recommended-first. Returns an empty list when
/// enumeration fails entirely.
#[cfg(feature = "audio-cpal")]
pub fn list_input_devices() -> Vec<InputDeviceInfo> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let devices = match host.input_devices() {
        Ok(devices) => devices,
        Err(e) => {
            tracing::warn!("input device enumeration failed: {e}");
            return Vec::new();
        }
    };

    let mut list: Vec<InputDeviceInfo> = devices
        .enumerate()
        .map(|(idx, device)| {
            let name = device
                .name()
                .unwrap_or_else(|_| format!("Input Device {}", idx + 1));
            InputDeviceInfo {
                is_default: default_name.as_deref() == Some(name.as_str()),
                is_loopback_like: is_loopback_name(&name),
                is_recommended: false,
                name,
            }
        })
        .collect();

    let best = list
        .iter()
        .enumerate()
        .max_by_key(|(_, d)| speech_mic_score(&d.name) + if d.is_default { 2 } else { 0 })
        .map(|(idx, _)| idx);
    if let Some(idx) = best {
        list[idx].is_recommended = true;
    }

    list.sort_by_key(|d| {
        (
            !d.is_recommended,
            d.is_loopback_like,
            !d.is_default,
            d.name.to_ascii_lowercase(),
        )
    });
    list
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_input_devices() -> Vec<InputDeviceInfo> {
    Vec::new()
}

/// Resolve the capture device: preferred name if present, else the system
/// default, else the first enumerated input.
#[cfg(feature = "audio-cpal")]
pub(crate) fn resolve_input_device(preferred: Option<&str>) -> crate::error::Result<cpal::Device> {
    use cpal::traits::{DeviceTrait, HostTrait};

    use crate::error::LoquiError;

    let host = cpal::default_host();

    if let Some(wanted) = preferred {
        match host.input_devices() {
            Ok(mut devices) => {
                if let Some(device) =
                    devices.find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
                {
                    return Ok(device);
                }
                tracing::warn!("preferred input device '{wanted}' not found, falling back");
            }
            Err(e) => tracing::warn!("device listing failed while resolving '{wanted}': {e}"),
        }
    }

    if let Some(default) = host.default_input_device() {
        return Ok(default);
    }

    let mut devices = host
        .input_devices()
        .map_err(|e| LoquiError::AudioDevice(e.to_string()))?;
    let first = devices.next().ok_or(LoquiError::NoDefaultInputDevice)?;
    tracing::warn!("no default input device, using first available");
    Ok(first)
}

#[cfg(test)]
mod tests {
    use super::{is_loopback_name, speech_mic_score};

    #[test]
    fn flags_system_output_captures() {
        assert!(is_loopback_name("Stereo Mix (Realtek Audio)"));
        assert!(is_loopback_name("Monitor of Built-in Audio"));
        assert!(is_loopback_name("Speakers (High Definition Audio)"));
        assert!(!is_loopback_name("Microphone Array (Intel Smart Sound)"));
    }

    #[test]
    fn prefers_microphones_over_loopbacks() {
        let mic = speech_mic_score("Headset Microphone (USB Audio)");
        let loopback = speech_mic_score("Stereo Mix (Realtek Audio)");
        assert!(mic > 0);
        assert!(loopback < 0);
        assert!(mic > loopback);
    }
}
